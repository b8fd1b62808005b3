//! evhost - Event-driven I/O host for embedded script engines
//!
//! A single-threaded runtime that gives a script engine timers, file
//! access, raw TCP servers and a minimal HTTP/1.1 client and server.
//!
//! # Architecture
//!
//! ```text
//! script ──> HostRegistry ──> Runtime ──> timers / fs / http / net
//!                               │
//!                               └── run(): timers ─> jobs ─> poll ─> dispatch
//! ```
//!
//! Host functions validate their arguments, pin the script callback and
//! return at once. Results come back on a later pass of the event loop as
//! error-first callback invocations `(err, result)`.
//!
//! # Example
//!
//! ```no_run
//! use evhost::{HostRegistry, NativeEngine, Runtime, Value};
//! use std::rc::Rc;
//!
//! let engine = Rc::new(NativeEngine::new());
//! let rt = Runtime::new(engine.clone()).unwrap();
//! let registry = HostRegistry::new();
//!
//! let cb = engine.function(|args| println!("fired with {} args", args.len()));
//! registry.call(&rt, "setTimeout", &[cb, Value::Number(10.0)]).unwrap();
//! rt.run().unwrap();
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod runtime;

pub use config::{ConfigError, HostConfig};
pub use runtime::{
    CallbackRef, HostCategory, HostError, HostFunction, HostObject, HostRegistry, HostResult,
    NativeEngine, Object, Pinned, Runtime, ScriptEngine, ServerHandle, ServerKind, SocketHandle,
    Value,
};
