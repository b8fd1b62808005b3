//! Timer registry for script-visible timeouts and intervals
//!
//! Timers are kept in a map keyed by id plus an ordered set of
//! `(deadline, id)` pairs, so expiry scans walk deadlines in order and
//! equal deadlines fire in id order.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Identifier handed back to scripts by `setTimeout`/`setInterval`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u32);

/// Whether a timer fires once or keeps rearming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Repeating { period: Duration },
}

/// Payload released by [`TimerRegistry::take_due`]
#[derive(Debug)]
pub enum Fired<T> {
    /// The timer is gone; the payload is owned by the caller
    Once(T),
    /// The timer stays registered but disarmed until [`TimerRegistry::rearm`]
    Repeating(T),
}

#[derive(Debug)]
struct TimerEntry<T> {
    deadline: Instant,
    kind: TimerKind,
    payload: T,
    armed: bool,
}

/// All live timers of a runtime
pub struct TimerRegistry<T> {
    timers: HashMap<TimerId, TimerEntry<T>>,
    queue: BTreeSet<(Instant, TimerId)>,
    next_id: u32,
}

impl<T: Clone> TimerRegistry<T> {
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
            queue: BTreeSet::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> TimerId {
        loop {
            let id = TimerId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                self.next_id = 1;
            }
            if !self.timers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Schedule a timer firing at `deadline`
    pub fn schedule(&mut self, deadline: Instant, kind: TimerKind, payload: T) -> TimerId {
        let id = self.allocate_id();
        self.timers.insert(
            id,
            TimerEntry {
                deadline,
                kind,
                payload,
                armed: true,
            },
        );
        self.queue.insert((deadline, id));
        id
    }

    /// Cancel a timer, returning its payload. Unknown ids yield `None`.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let entry = self.timers.remove(&id)?;
        if entry.armed {
            self.queue.remove(&(entry.deadline, id));
        }
        Some(entry.payload)
    }

    /// Ids of every armed timer whose deadline is at or before `now`,
    /// in firing order
    pub fn due(&self, now: Instant) -> Vec<TimerId> {
        self.queue
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .map(|&(_, id)| id)
            .collect()
    }

    /// Release the payload of a due timer. Returns `None` if the timer was
    /// cancelled or disarmed since [`due`](Self::due) listed it.
    pub fn take_due(&mut self, id: TimerId) -> Option<Fired<T>> {
        let entry = self.timers.get_mut(&id)?;
        if !entry.armed {
            return None;
        }
        let deadline = entry.deadline;
        let fired = match entry.kind {
            TimerKind::OneShot => None,
            TimerKind::Repeating { .. } => {
                entry.armed = false;
                Some(Fired::Repeating(entry.payload.clone()))
            }
        };
        self.queue.remove(&(deadline, id));
        match fired {
            Some(fired) => Some(fired),
            None => self.timers.remove(&id).map(|e| Fired::Once(e.payload)),
        }
    }

    /// Rearm a repeating timer one period after `now`. Returns false when the
    /// timer no longer exists (it was cleared from inside its own callback).
    pub fn rearm(&mut self, id: TimerId, now: Instant) -> bool {
        let Some(entry) = self.timers.get_mut(&id) else {
            return false;
        };
        let TimerKind::Repeating { period } = entry.kind else {
            return false;
        };
        if entry.armed {
            return true;
        }
        entry.deadline = now + period;
        entry.armed = true;
        self.queue.insert((entry.deadline, id));
        true
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.iter().next().map(|&(deadline, _)| deadline)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Number of live timers, armed or not
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<T: Clone> Default for TimerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let mut timers = TimerRegistry::new();
        let now = Instant::now();
        let a = timers.schedule(now, TimerKind::OneShot, "a");
        let b = timers.schedule(now, TimerKind::OneShot, "b");
        assert_eq!(a, TimerId(1));
        assert_eq!(b, TimerId(2));
    }

    #[test]
    fn test_due_orders_by_deadline_then_id() {
        let mut timers = TimerRegistry::new();
        let now = Instant::now();
        let late = timers.schedule(now + Duration::from_millis(5), TimerKind::OneShot, 1);
        let first = timers.schedule(now, TimerKind::OneShot, 2);
        let second = timers.schedule(now, TimerKind::OneShot, 3);
        let future = timers.schedule(now + Duration::from_secs(60), TimerKind::OneShot, 4);

        let due = timers.due(now + Duration::from_millis(10));
        assert_eq!(due, vec![first, second, late]);
        assert!(!due.contains(&future));
    }

    #[test]
    fn test_one_shot_take_removes() {
        let mut timers = TimerRegistry::new();
        let now = Instant::now();
        let id = timers.schedule(now, TimerKind::OneShot, "cb");

        match timers.take_due(id) {
            Some(Fired::Once(payload)) => assert_eq!(payload, "cb"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!timers.contains(id));
        assert!(timers.take_due(id).is_none());
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn test_cancel_before_fire() {
        let mut timers = TimerRegistry::new();
        let now = Instant::now();
        let a = timers.schedule(now, TimerKind::OneShot, 1);
        let b = timers.schedule(now, TimerKind::OneShot, 2);

        let due = timers.due(now);
        assert_eq!(timers.cancel(b), Some(2));
        assert!(matches!(timers.take_due(due[0]), Some(Fired::Once(1))));
        assert!(timers.take_due(due[1]).is_none());
        assert!(timers.is_empty());
        assert!(timers.cancel(a).is_none());
    }

    #[test]
    fn test_repeating_rearm() {
        let mut timers = TimerRegistry::new();
        let now = Instant::now();
        let period = Duration::from_millis(10);
        let id = timers.schedule(now, TimerKind::Repeating { period }, "tick");

        assert!(matches!(timers.take_due(id), Some(Fired::Repeating("tick"))));
        // Disarmed while its callback runs
        assert!(timers.due(now + Duration::from_secs(1)).is_empty());
        assert!(timers.contains(id));

        let later = now + Duration::from_millis(3);
        assert!(timers.rearm(id, later));
        assert_eq!(timers.next_deadline(), Some(later + period));
    }

    #[test]
    fn test_repeating_cleared_inside_callback() {
        let mut timers = TimerRegistry::new();
        let now = Instant::now();
        let id = timers.schedule(
            now,
            TimerKind::Repeating {
                period: Duration::from_millis(1),
            },
            (),
        );
        assert!(timers.take_due(id).is_some());
        assert!(timers.cancel(id).is_some());
        assert!(!timers.rearm(id, now));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_id_wrap_skips_live_ids() {
        let mut timers = TimerRegistry::new();
        let now = Instant::now();
        let kept = timers.schedule(now, TimerKind::OneShot, ());
        timers.next_id = u32::MAX;
        let max = timers.schedule(now, TimerKind::OneShot, ());
        assert_eq!(max, TimerId(u32::MAX));
        let wrapped = timers.schedule(now, TimerKind::OneShot, ());
        assert_ne!(wrapped, kept);
        assert_eq!(wrapped, TimerId(2));
    }
}
