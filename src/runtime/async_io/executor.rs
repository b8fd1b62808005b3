//! Deferred job queue
//!
//! Holds work posted for a later reactor pass: staged file operations,
//! HTTP completions and callbacks raised while reactor state was borrowed.
//! Jobs queued during a pass run in the next one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique task identifier, shared by every job a task posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct Scheduled<J> {
    task: TaskId,
    seq: u64,
    job: J,
}

/// FIFO of jobs tagged with the task that posted them
pub struct Executor<J> {
    queue: VecDeque<Scheduled<J>>,
    next_seq: u64,
}

impl<J> Executor<J> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Queue a job for `task`
    pub fn spawn(&mut self, task: TaskId, job: J) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(Scheduled { task, seq, job });
    }

    /// Mark the start of a pass. Jobs spawned after this call are not
    /// returned by [`next_ready`](Self::next_ready) with the returned boundary.
    pub fn begin_pass(&self) -> u64 {
        self.next_seq
    }

    /// Pop the oldest job queued before `boundary`
    pub fn next_ready(&mut self, boundary: u64) -> Option<(TaskId, J)> {
        match self.queue.front() {
            Some(front) if front.seq < boundary => {
                self.queue.pop_front().map(|s| (s.task, s.job))
            }
            _ => None,
        }
    }

    /// Remove every queued job belonging to `task`. The jobs are returned so
    /// the caller can drop them after releasing any borrow on the executor.
    pub fn cancel(&mut self, task: TaskId) -> Vec<J> {
        let mut cancelled = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for scheduled in self.queue.drain(..) {
            if scheduled.task == task {
                cancelled.push(scheduled.job);
            } else {
                kept.push_back(scheduled);
            }
        }
        self.queue = kept;
        cancelled
    }

    /// Check if any job is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending jobs
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<J> Default for Executor<J> {
    fn default() -> Self {
        Self::new()
    }
}
