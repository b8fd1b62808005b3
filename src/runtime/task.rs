//! Completion record for one native operation
//!
//! An [`AsyncTask`] owns the pinned callback and any buffers of an
//! in-flight operation. The terminal transitions consume the task, so the
//! callback can run at most once and the pin is released exactly once.

use super::async_io::TaskId;
use super::{Pinned, Value};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Completed,
    Cancelled,
}

pub struct AsyncTask {
    id: TaskId,
    pin: Option<Pinned>,
    buffers: Vec<Vec<u8>>,
    state: TaskState,
}

impl AsyncTask {
    pub fn new(pin: Pinned) -> Self {
        Self {
            id: TaskId::next(),
            pin: Some(pin),
            buffers: Vec::new(),
            state: TaskState::Pending,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Keep `buffer` alive until the task finishes; returns its index
    pub fn hold(&mut self, buffer: Vec<u8>) -> usize {
        self.buffers.push(buffer);
        self.buffers.len() - 1
    }

    pub fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).map(|b| b.as_slice())
    }

    /// Invoke the callback with `args`, then release everything
    pub fn complete(mut self, args: Vec<Value>) {
        self.state = TaskState::Completed;
        self.buffers.clear();
        if let Some(pin) = self.pin.take() {
            pin.invoke(args);
        }
    }

    /// Error-first completion: `(null, value)` or `(message, null)`
    pub fn complete_with(self, result: Result<Value, String>) {
        let args = match result {
            Ok(value) => vec![Value::Null, value],
            Err(message) => vec![Value::String(message), Value::Null],
        };
        self.complete(args);
    }

    /// Completion for write-style operations: `(null)` or `(message)`
    pub fn complete_unit(self, result: Result<(), String>) {
        let args = match result {
            Ok(()) => vec![Value::Null],
            Err(message) => vec![Value::String(message)],
        };
        self.complete(args);
    }

    /// Release the callback without invoking it
    pub fn cancel(mut self) {
        self.state = TaskState::Cancelled;
        self.buffers.clear();
        self.pin = None;
    }
}

impl Drop for AsyncTask {
    fn drop(&mut self) {
        if self.state == TaskState::Pending {
            debug!("task {} dropped while pending, cancelling", self.id.0);
            self.state = TaskState::Cancelled;
        }
    }
}
