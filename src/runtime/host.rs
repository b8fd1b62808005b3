//! The host runtime: one reactor, its timers, deferred jobs and sockets
//!
//! # Loop pass
//!
//! ```text
//!   ┌─> due timers (snapshot taken at phase start)
//!   │   deferred jobs queued before this pass
//!   │   poll: 0 if jobs are queued, else until next timer, else forever
//!   └── dispatch readiness to listeners and connections
//! ```
//!
//! Script callbacks run only from the timer and job phases, never while
//! reactor state is borrowed. I/O dispatch posts jobs instead of calling
//! into the engine.

use super::async_io::{
    Event, Executor, Fired, Interest, Reactor, Source, TaskId, TimerRegistry, Token,
};
use super::net::{self, Connection, Listener};
use super::{CallbackRef, Pinned, ScriptEngine};
use crate::config::HostConfig;
use log::{debug, trace, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Work posted for a later loop pass
pub type Job = Box<dyn FnOnce(&Runtime)>;

pub(crate) struct Inner {
    engine: Rc<dyn ScriptEngine>,
    config: HostConfig,
    pub(crate) reactor: RefCell<Reactor>,
    pub(crate) timers: RefCell<TimerRegistry<Rc<Pinned>>>,
    executor: RefCell<Executor<Job>>,
    pub(crate) listeners: RefCell<HashMap<Token, Listener>>,
    pub(crate) connections: RefCell<HashMap<Token, Connection>>,
    exit_code: Cell<Option<i32>>,
}

/// Handle to the single-threaded host runtime. Cloning is cheap and every
/// clone drives the same loop.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

/// Non-owning runtime reference held by script-visible objects
#[derive(Clone)]
pub struct WeakRuntime {
    inner: Weak<Inner>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

/// Runtime statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    pub registered_fds: usize,
    pub pending_timers: usize,
    pub pending_jobs: usize,
    pub listeners: usize,
    pub connections: usize,
}

impl Runtime {
    /// Create a runtime with default configuration
    pub fn new(engine: Rc<dyn ScriptEngine>) -> io::Result<Self> {
        Self::with_config(engine, HostConfig::default())
    }

    /// Create a runtime. Fails if the OS multiplexer cannot be created.
    pub fn with_config(engine: Rc<dyn ScriptEngine>, config: HostConfig) -> io::Result<Self> {
        let reactor = Reactor::new(config.reactor.max_events)?;
        Ok(Self {
            inner: Rc::new(Inner {
                engine,
                config,
                reactor: RefCell::new(reactor),
                timers: RefCell::new(TimerRegistry::new()),
                executor: RefCell::new(Executor::new()),
                listeners: RefCell::new(HashMap::new()),
                connections: RefCell::new(HashMap::new()),
                exit_code: Cell::new(None),
            }),
        })
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    pub fn engine(&self) -> &Rc<dyn ScriptEngine> {
        &self.inner.engine
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Pin `callback` for the lifetime of the returned guard
    pub fn pin(&self, callback: CallbackRef) -> Pinned {
        Pinned::new(self.inner.engine.clone(), callback)
    }

    /// Post `job` to run on the next loop pass on behalf of `task`
    pub fn defer<F>(&self, task: TaskId, job: F)
    where
        F: FnOnce(&Runtime) + 'static,
    {
        self.inner.executor.borrow_mut().spawn(task, Box::new(job));
    }

    /// Drop every queued stage of `task` without running it. Returns whether
    /// anything was cancelled.
    pub fn cancel_task(&self, task: TaskId) -> bool {
        let jobs = self.inner.executor.borrow_mut().cancel(task);
        let cancelled = !jobs.is_empty();
        // Dropping the jobs releases their pins; the executor is no longer borrowed.
        drop(jobs);
        if cancelled {
            debug!("cancelled task {}", task.0);
        }
        cancelled
    }

    pub(crate) fn register(&self, fd: i32, source: Source, interest: Interest) -> io::Result<Token> {
        self.inner.reactor.borrow_mut().register(fd, source, interest)
    }

    pub(crate) fn deregister(&self, token: Token) {
        if let Err(e) = self.inner.reactor.borrow_mut().deregister(token) {
            warn!("failed to deregister token {}: {}", token.0, e);
        }
    }

    /// Stop the loop after the current callback; [`run`](Self::run) returns `code`
    pub fn exit(&self, code: i32) {
        debug!("exit requested with code {}", code);
        self.inner.exit_code.set(Some(code));
    }

    fn exit_requested(&self) -> bool {
        self.inner.exit_code.get().is_some()
    }

    /// Whether any timer, job, listener or connection keeps the loop running
    pub fn is_alive(&self) -> bool {
        !self.inner.timers.borrow().is_empty()
            || !self.inner.executor.borrow().is_empty()
            || !self.inner.listeners.borrow().is_empty()
            || !self.inner.connections.borrow().is_empty()
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            registered_fds: self.inner.reactor.borrow().len(),
            pending_timers: self.inner.timers.borrow().len(),
            pending_jobs: self.inner.executor.borrow().len(),
            listeners: self.inner.listeners.borrow().len(),
            connections: self.inner.connections.borrow().len(),
        }
    }

    /// Run until nothing is left to do or an exit is requested. Returns the
    /// exit code: 0 when the loop drained, otherwise the requested code.
    pub fn run(&self) -> io::Result<i32> {
        let mut events = Vec::with_capacity(self.inner.config.reactor.max_events);
        loop {
            if let Some(code) = self.inner.exit_code.get() {
                return Ok(code);
            }

            self.run_timers();
            self.run_jobs();

            if let Some(code) = self.inner.exit_code.get() {
                return Ok(code);
            }
            if !self.is_alive() {
                debug!("no active handles left, loop finished");
                return Ok(0);
            }

            let timeout = self.poll_timeout();
            events.clear();
            let count = self.inner.reactor.borrow_mut().poll(&mut events, timeout)?;
            trace!("poll returned {} events (timeout {:?})", count, timeout);

            for event in &events {
                self.dispatch(*event);
            }
        }
    }

    fn poll_timeout(&self) -> Option<Duration> {
        if !self.inner.executor.borrow().is_empty() {
            return Some(Duration::ZERO);
        }
        let next = self.inner.timers.borrow().next_deadline();
        next.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn run_timers(&self) {
        let due = self.inner.timers.borrow().due(Instant::now());
        for id in due {
            if self.exit_requested() {
                return;
            }
            let fired = self.inner.timers.borrow_mut().take_due(id);
            match fired {
                Some(Fired::Once(callback)) => {
                    trace!("timer {} fired", id.0);
                    callback.invoke(Vec::new());
                }
                Some(Fired::Repeating(callback)) => {
                    trace!("interval {} fired", id.0);
                    callback.invoke(Vec::new());
                    drop(callback);
                    self.inner.timers.borrow_mut().rearm(id, Instant::now());
                }
                None => {}
            }
        }
    }

    fn run_jobs(&self) {
        let boundary = self.inner.executor.borrow().begin_pass();
        loop {
            if self.exit_requested() {
                return;
            }
            let next = self.inner.executor.borrow_mut().next_ready(boundary);
            match next {
                Some((_task, job)) => job(self),
                None => return,
            }
        }
    }

    fn dispatch(&self, event: Event) {
        let source = self.inner.reactor.borrow().source(event.token);
        match source {
            Some(Source::Listener) => net::accept_ready(self, event.token),
            Some(Source::Connection) => net::connection_ready(self, event.token, event.interest),
            None => trace!("event for stale token {}", event.token.0),
        }
    }
}
