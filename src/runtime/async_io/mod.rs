//! Async I/O primitives for the host runtime
//!
//! Provides non-blocking I/O building blocks with platform-specific
//! readiness multiplexers:
//! - Linux: epoll
//! - macOS/BSD: kqueue
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    ASYNC I/O PRIMITIVES                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EventLoop: Platform-specific event notification                │
//! │  Reactor: Token table for registered listeners and streams      │
//! │  TimerRegistry: Ordered timeouts and intervals                  │
//! │  Executor: Deferred jobs run on the next loop pass              │
//! │  AsyncSocket / AsyncFile: Non-blocking handles                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is single-threaded; the [`Runtime`](crate::runtime::Runtime)
//! composes these pieces into the loop that scripts see.

mod event_loop;
mod executor;
mod file;
mod reactor;
mod socket;
mod timer;

pub use event_loop::{Event, EventLoop, Interest, Token};
pub use executor::{Executor, TaskId};
pub use file::{AsyncFile, FileState, OpenOptions};
pub use reactor::{Reactor, Source};
pub use socket::{AsyncSocket, SocketState};
pub use timer::{Fired, TimerId, TimerKind, TimerRegistry};

use std::sync::atomic::{AtomicU64, Ordering};

/// Global token counter for unique identification
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique token
pub fn next_token() -> Token {
    Token(TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed))
}
