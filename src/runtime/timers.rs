//! `setTimeout` / `setInterval` / `clearTimeout` on the runtime

use super::async_io::{TimerId, TimerKind};
use super::{CallbackRef, HostError, HostResult, Runtime, Value};
use log::trace;
use std::rc::Rc;
use std::time::{Duration, Instant};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Convert a script delay to a duration. Fractional milliseconds truncate.
pub fn delay_from_value(value: &Value) -> HostResult<Duration> {
    match value {
        Value::Number(ms) if ms.is_finite() && *ms >= 0.0 => {
            Ok(Duration::from_millis(ms.trunc().min(u64::MAX as f64) as u64))
        }
        Value::Number(ms) => Err(HostError::invalid(format!(
            "delay must be a finite non-negative number, got {}",
            ms
        ))),
        other => Err(HostError::invalid(format!(
            "delay must be a number, got {}",
            other.type_name()
        ))),
    }
}

impl Runtime {
    /// Run `callback` once after `delay`
    pub fn set_timeout(&self, callback: CallbackRef, delay: Duration) -> TimerId {
        self.schedule_timer(callback, delay, TimerKind::OneShot)
    }

    /// Run `callback` every `period` until cleared. Periods under 1ms are
    /// raised to 1ms.
    pub fn set_interval(&self, callback: CallbackRef, period: Duration) -> TimerId {
        let period = period.max(MIN_INTERVAL);
        self.schedule_timer(callback, period, TimerKind::Repeating { period })
    }

    fn schedule_timer(&self, callback: CallbackRef, delay: Duration, kind: TimerKind) -> TimerId {
        let pin = Rc::new(self.pin(callback));
        let deadline = Instant::now() + delay;
        let id = self
            .inner()
            .timers
            .borrow_mut()
            .schedule(deadline, kind, pin);
        trace!("timer {} scheduled in {:?}", id.0, delay);
        id
    }

    /// Cancel a timer. Unknown and already-fired ids are ignored.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        let removed = self.inner().timers.borrow_mut().cancel(id);
        match removed {
            Some(pin) => {
                trace!("timer {} cleared", id.0);
                drop(pin);
                true
            }
            None => false,
        }
    }
}
