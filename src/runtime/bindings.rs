//! Host function registry
//!
//! Every function a script can call is registered here under its global
//! name. An engine integration installs them by name and forwards calls to
//! [`HostRegistry::call`]; methods on host objects take the receiver as the
//! first argument.
//!
//! | Category | Functions |
//! |----------|-----------|
//! | Timers | `setTimeout`, `setInterval`, `clearTimeout`, `clearInterval` |
//! | FileSystem | `fs.readFile`, `fs.writeFile` |
//! | Http | `http.get`, `http.post`, `http.put`, `http.delete`, `http.createServer`, `ServerResponse.end` |
//! | Net | `net.createServer`, `Server.listen`, `Server.close`, `Socket.write`, `Socket.end` |
//! | Process | `process.exit` |

use super::async_io::TimerId;
use super::http::{self, Method};
use super::net::ServerKind;
use super::{
    delay_from_value, CallbackRef, HostError, HostObject, HostResult, Runtime, ServerHandle,
    ServerResponse, SocketHandle, Value,
};
use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCategory {
    Timers,
    FileSystem,
    Http,
    Net,
    Process,
}

impl fmt::Display for HostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCategory::Timers => write!(f, "timers"),
            HostCategory::FileSystem => write!(f, "filesystem"),
            HostCategory::Http => write!(f, "http"),
            HostCategory::Net => write!(f, "net"),
            HostCategory::Process => write!(f, "process"),
        }
    }
}

/// Host function: (runtime, args) -> value returned to the script
pub type HostFn = Rc<dyn Fn(&Runtime, &[Value]) -> HostResult<Value>>;

#[derive(Clone)]
pub struct HostFunction {
    pub name: String,
    pub description: String,
    pub min_args: usize,
    pub category: HostCategory,
    pub func: HostFn,
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("category", &self.category)
            .finish()
    }
}

// =============================================================================
// Host Registry
// =============================================================================

pub struct HostRegistry {
    by_id: HashMap<u32, HostFunction>,
    by_name: HashMap<String, u32>,
    next_id: u32,
}

impl HostRegistry {
    /// Create a new registry with all built-in host functions registered
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }

    /// Create a registry with nothing registered
    pub fn empty() -> Self {
        Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a function and return its ID. Re-registering a name
    /// replaces the earlier function.
    pub fn register<F>(
        &mut self,
        name: &str,
        description: &str,
        min_args: usize,
        category: HostCategory,
        func: F,
    ) -> u32
    where
        F: Fn(&Runtime, &[Value]) -> HostResult<Value> + 'static,
    {
        let id = match self.by_name.get(name) {
            Some(&id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };

        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(
            id,
            HostFunction {
                name: name.to_string(),
                description: description.to_string(),
                min_args,
                category,
                func: Rc::new(func),
            },
        );

        id
    }

    pub fn get(&self, id: u32) -> Option<&HostFunction> {
        self.by_id.get(&id)
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&HostFunction> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Call a host function by name
    pub fn call(&self, rt: &Runtime, name: &str, args: &[Value]) -> HostResult<Value> {
        let function = self
            .get_by_name(name)
            .ok_or_else(|| HostError::invalid(format!("{} is not a host function", name)))?;

        if args.len() < function.min_args {
            return Err(HostError::invalid(format!(
                "{} expects at least {} arguments, got {}",
                name,
                function.min_args,
                args.len()
            )));
        }

        (function.func)(rt, args)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Functions in `category`, in registration order
    pub fn list_by_category(&self, category: HostCategory) -> Vec<&HostFunction> {
        let mut ids: Vec<u32> = self
            .by_id
            .iter()
            .filter(|(_, f)| f.category == category)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids.iter().filter_map(|id| self.by_id.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Register all built-in host functions
    fn register_builtins(&mut self) {
        register_timers(self);
        register_fs(self);
        register_http(self);
        register_net(self);
        register_process(self);
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

fn callback_arg(args: &[Value], index: usize, what: &str) -> HostResult<CallbackRef> {
    args.get(index)
        .and_then(Value::as_callback)
        .ok_or_else(|| HostError::invalid(format!("{} must be a function", what)))
}

fn string_arg<'a>(args: &'a [Value], index: usize, what: &str) -> HostResult<&'a str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| HostError::invalid(format!("{} must be a string", what)))
}

fn port_arg(args: &[Value], index: usize) -> HostResult<u16> {
    match args.get(index) {
        Some(Value::Number(n)) if n.fract() == 0.0 && (0.0..=65535.0).contains(n) => Ok(*n as u16),
        Some(other) => Err(HostError::invalid(format!(
            "port must be an integer between 0 and 65535, got {}",
            other.type_name()
        ))),
        None => Err(HostError::invalid("port is required")),
    }
}

/// Request body: strings pass through, objects are sent as JSON
fn body_arg(value: &Value) -> HostResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Object(_) => Ok(value.to_json().to_string()),
        other => Err(HostError::invalid(format!(
            "request body must be a string or object, got {}",
            other.type_name()
        ))),
    }
}

fn server_receiver(args: &[Value]) -> HostResult<&ServerHandle> {
    match args.first() {
        Some(Value::Host(HostObject::Server(server))) => Ok(server),
        _ => Err(HostError::invalid("receiver must be a Server")),
    }
}

fn socket_receiver(args: &[Value]) -> HostResult<&SocketHandle> {
    match args.first() {
        Some(Value::Host(HostObject::Socket(socket))) => Ok(socket),
        _ => Err(HostError::invalid("receiver must be a Socket")),
    }
}

fn response_receiver(args: &[Value]) -> HostResult<&ServerResponse> {
    match args.first() {
        Some(Value::Host(HostObject::Response(response))) => Ok(response),
        _ => Err(HostError::invalid("receiver must be a ServerResponse")),
    }
}

// =============================================================================
// Built-ins
// =============================================================================

fn register_timers(registry: &mut HostRegistry) {
    registry.register(
        "setTimeout",
        "Run a function once after a delay in milliseconds",
        2,
        HostCategory::Timers,
        |rt, args| {
            let callback = callback_arg(args, 0, "setTimeout callback")?;
            let delay = delay_from_value(&args[1])?;
            Ok(Value::from(rt.set_timeout(callback, delay).0))
        },
    );
    registry.register(
        "setInterval",
        "Run a function every period milliseconds until cleared",
        2,
        HostCategory::Timers,
        |rt, args| {
            let callback = callback_arg(args, 0, "setInterval callback")?;
            let period = delay_from_value(&args[1])?;
            Ok(Value::from(rt.set_interval(callback, period).0))
        },
    );
    for name in ["clearTimeout", "clearInterval"] {
        registry.register(
            name,
            "Cancel a timer; unknown ids are ignored",
            0,
            HostCategory::Timers,
            |rt, args| {
                match args.first() {
                    None | Some(Value::Undefined) | Some(Value::Null) => {}
                    Some(Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 => {
                        rt.clear_timer(TimerId(*n as u32));
                    }
                    Some(Value::Number(_)) => {}
                    Some(other) => {
                        return Err(HostError::invalid(format!(
                            "timer id must be a number, got {}",
                            other.type_name()
                        )))
                    }
                }
                Ok(Value::Undefined)
            },
        );
    }
}

fn register_fs(registry: &mut HostRegistry) {
    registry.register(
        "fs.readFile",
        "Read a whole file; cb(err, contents)",
        2,
        HostCategory::FileSystem,
        |rt, args| {
            let path = string_arg(args, 0, "path")?;
            let callback = callback_arg(args, 1, "readFile callback")?;
            rt.read_file(path, callback);
            Ok(Value::Undefined)
        },
    );
    registry.register(
        "fs.writeFile",
        "Create or truncate a file and write a string; cb(err)",
        3,
        HostCategory::FileSystem,
        |rt, args| {
            let path = string_arg(args, 0, "path")?;
            let content = string_arg(args, 1, "content")?;
            let callback = callback_arg(args, 2, "writeFile callback")?;
            rt.write_file(path, content.as_bytes(), callback);
            Ok(Value::Undefined)
        },
    );
}

/// `(url, cb)` or `(url, data, cb)`
fn http_call(rt: &Runtime, args: &[Value], method: Option<Method>, body_required: bool) -> HostResult<Value> {
    let url = string_arg(args, 0, "url")?;
    let (body, callback) = if args.len() >= 3 {
        (Some(body_arg(&args[1])?), callback_arg(args, 2, "request callback")?)
    } else if body_required {
        return Err(HostError::invalid("request body is required"));
    } else {
        (None, callback_arg(args, 1, "request callback")?)
    };
    http::request(rt, method, url, body, callback)?;
    Ok(Value::Undefined)
}

fn register_http(registry: &mut HostRegistry) {
    registry.register(
        "http.get",
        "GET a URL; cb(err, {statusCode, headers, body})",
        2,
        HostCategory::Http,
        |rt, args| http_call(rt, args, None, false),
    );
    registry.register(
        "http.post",
        "POST a body to a URL; cb(err, {statusCode, headers, body})",
        3,
        HostCategory::Http,
        |rt, args| http_call(rt, args, Some(Method::Post), true),
    );
    registry.register(
        "http.put",
        "PUT a body to a URL; cb(err, {statusCode, headers, body})",
        3,
        HostCategory::Http,
        |rt, args| http_call(rt, args, Some(Method::Put), true),
    );
    registry.register(
        "http.delete",
        "DELETE a URL; cb(err, {statusCode, headers, body})",
        2,
        HostCategory::Http,
        |rt, args| http_call(rt, args, Some(Method::Delete), false),
    );
    registry.register(
        "http.createServer",
        "Create an HTTP server; cb(req, res) per request",
        1,
        HostCategory::Http,
        |rt, args| {
            let callback = callback_arg(args, 0, "request handler")?;
            Ok(Value::Host(HostObject::Server(
                rt.create_server(ServerKind::Http, callback),
            )))
        },
    );
    registry.register(
        "ServerResponse.end",
        "Send the response, optionally with a body, and close",
        1,
        HostCategory::Http,
        |_rt, args| {
            let response = response_receiver(args)?;
            match args.get(1) {
                None | Some(Value::Undefined) => response.end(None),
                Some(Value::String(body)) => response.end(Some(body)),
                Some(other) => {
                    return Err(HostError::invalid(format!(
                        "response body must be a string, got {}",
                        other.type_name()
                    )))
                }
            }
            Ok(Value::Undefined)
        },
    );
}

fn register_net(registry: &mut HostRegistry) {
    registry.register(
        "net.createServer",
        "Create a TCP server; cb(socket) per connection",
        1,
        HostCategory::Net,
        |rt, args| {
            let callback = callback_arg(args, 0, "connection handler")?;
            Ok(Value::Host(HostObject::Server(
                rt.create_server(ServerKind::Net, callback),
            )))
        },
    );
    registry.register(
        "Server.listen",
        "Bind a server to a port and start accepting",
        2,
        HostCategory::Net,
        |_rt, args| {
            let server = server_receiver(args)?;
            let port = port_arg(args, 1)?;
            match server.listen(port) {
                Ok(addr) => Ok(Value::from(addr.port())),
                Err(e) if e.is_invalid_argument() => Err(e),
                // Already logged; the server stays inert
                Err(_) => Ok(Value::Undefined),
            }
        },
    );
    registry.register(
        "Server.close",
        "Stop accepting new connections",
        1,
        HostCategory::Net,
        |_rt, args| {
            let server = server_receiver(args)?;
            Ok(Value::Bool(server.close()))
        },
    );
    registry.register(
        "Socket.write",
        "Queue data on a socket",
        2,
        HostCategory::Net,
        |_rt, args| {
            let socket = socket_receiver(args)?;
            let data = string_arg(args, 1, "data")?;
            socket.write(data.as_bytes());
            Ok(Value::Undefined)
        },
    );
    registry.register(
        "Socket.end",
        "Close a socket once queued data is sent",
        1,
        HostCategory::Net,
        |_rt, args| {
            socket_receiver(args)?.end();
            Ok(Value::Undefined)
        },
    );
}

fn register_process(registry: &mut HostRegistry) {
    registry.register(
        "process.exit",
        "Stop the event loop with an exit code",
        0,
        HostCategory::Process,
        |rt, args| {
            let code = match args.first() {
                None | Some(Value::Undefined) => 0,
                Some(Value::Number(n)) if n.is_finite() => *n as i32,
                Some(other) => {
                    warn!("process.exit called with {}, using 1", other.type_name());
                    1
                }
            };
            rt.exit(code);
            Ok(Value::Undefined)
        },
    );
}
