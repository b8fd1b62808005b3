//! Runtime module
//!
//! Contains the host runtime that scripts call into, the async I/O
//! primitives it is built on, and the host function registry.
//!
//! # Async I/O
//!
//! The async_io module provides non-blocking I/O operations with platform-specific
//! event loops:
//! - Linux: epoll
//! - macOS/BSD: kqueue
//!
//! # Host functions
//!
//! Scripts reach the runtime through named host functions (`setTimeout`,
//! `fs.readFile`, `http.get`, `net.createServer`, ...). Each one validates
//! its arguments synchronously, pins the callback and returns immediately;
//! results arrive later as error-first callback invocations.

pub mod async_io;
pub mod bindings;
mod engine;
mod error;
mod fs;
mod host;
pub mod http;
pub mod net;
mod task;
mod timers;
mod value;

pub use async_io::{Interest, TaskId, TimerId, Token};
pub use bindings::{HostCategory, HostFunction, HostRegistry};
pub use engine::{CallbackRef, NativeEngine, Pinned, ScriptEngine};
pub use error::{HostError, HostResult};
pub use host::{Job, Runtime, RuntimeStats, WeakRuntime};
pub use http::{Method, ServerResponse};
pub use net::{ServerHandle, ServerKind, SocketHandle};
pub use task::{AsyncTask, TaskState};
pub use timers::delay_from_value;
pub use value::{HostObject, Object, Value};
