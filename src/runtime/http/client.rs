//! HTTP client transaction
//!
//! ```text
//! Resolving ─> Connecting ─> Sending ─> ReceivingHeaders ─> ReceivingBody ─> Done
//!     └────────────┴────────────┴──────────────┴──────────────────┴────────> Failed
//! ```
//!
//! Resolution and connect start run as deferred jobs. Once connected the
//! transaction lives in the connection table and is driven by readiness.
//! Completion is always posted as a job, never run from I/O dispatch.

use super::{HttpUrl, Method, ResponseParser};
use crate::runtime::async_io::{AsyncSocket, Interest, Source, TaskId};
use crate::runtime::net::Connection;
use crate::runtime::{AsyncTask, CallbackRef, HostResult, Runtime};
use log::{debug, trace};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Resolving,
    Connecting,
    Sending,
    ReceivingHeaders,
    ReceivingBody,
    Done,
    Failed,
}

/// Frame a request. A body adds `Content-Type` (JSON if it looks like an
/// object literal) and `Content-Length`.
pub fn frame_request(method: Method, url: &HttpUrl, body: Option<&str>) -> Vec<u8> {
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
        method,
        url.path,
        url.host_header()
    );
    if let Some(body) = body {
        let content_type = if body.starts_with('{') && body.ends_with('}') {
            "application/json"
        } else {
            "application/x-www-form-urlencoded"
        };
        head.push_str(&format!(
            "Content-Type: {}\r\nContent-Length: {}\r\n",
            content_type,
            body.len()
        ));
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    if let Some(body) = body {
        out.extend_from_slice(body.as_bytes());
    }
    out
}

/// Client half of a connection
pub struct ClientTransaction {
    state: ClientState,
    url: HttpUrl,
    method: Method,
    request: Option<Vec<u8>>,
    parser: ResponseParser,
    task: Option<AsyncTask>,
}

impl ClientTransaction {
    fn new(url: HttpUrl, method: Method, request: Vec<u8>, task: AsyncTask) -> Self {
        Self {
            state: ClientState::Resolving,
            url,
            method,
            request: Some(request),
            parser: ResponseParser::new(),
            task: Some(task),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Connected: hand back the request bytes to queue
    pub(crate) fn on_connected(&mut self) -> Option<Vec<u8>> {
        trace!("connected to {}:{}", self.url.host, self.url.port);
        self.state = ClientState::Sending;
        self.request.take()
    }

    /// The write queue drained
    pub(crate) fn on_flushed(&mut self) {
        if self.state == ClientState::Sending {
            self.state = ClientState::ReceivingHeaders;
        }
    }

    /// Response bytes may arrive in the same readiness event that flushed
    /// the request, so the state advances here whatever `on_flushed` saw.
    pub(crate) fn on_data(&mut self, data: &[u8]) {
        let headers_done = self.parser.feed(data);
        match self.state {
            ClientState::Sending | ClientState::ReceivingHeaders if headers_done => {
                trace!(
                    "{} {}: status {}",
                    self.method,
                    self.url.path,
                    self.parser.status_code()
                );
                self.state = ClientState::ReceivingBody;
            }
            ClientState::Sending => self.state = ClientState::ReceivingHeaders,
            _ => {}
        }
    }

    /// Peer closed: complete with the accumulated response
    pub(crate) fn on_eof(&mut self, rt: &Runtime) {
        let Some(task) = self.task.take() else {
            return;
        };
        let parser = std::mem::take(&mut self.parser);
        let result = parser.finish().map(|response| response.to_value());
        self.state = if result.is_ok() {
            ClientState::Done
        } else {
            ClientState::Failed
        };
        debug!(
            "{} http://{}:{}{} finished: {:?}",
            self.method, self.url.host, self.url.port, self.url.path, self.state
        );
        rt.defer(task.id(), move |_| task.complete_with(result));
    }

    /// The connection went away; fails the transaction if still pending
    pub(crate) fn on_closed(&mut self, rt: &Runtime, reason: Option<String>) {
        if let Some(task) = self.task.take() {
            self.state = ClientState::Failed;
            let message = reason.unwrap_or_else(|| "connection closed".to_string());
            debug!(
                "{} http://{}:{}{} failed: {}",
                self.method, self.url.host, self.url.port, self.url.path, message
            );
            rt.defer(task.id(), move |_| task.complete_with(Err(message)));
        }
    }
}

/// Start a request; `callback` receives `(err, {statusCode, headers, body})`
pub fn request(
    rt: &Runtime,
    method: Option<Method>,
    url: &str,
    body: Option<String>,
    callback: CallbackRef,
) -> HostResult<TaskId> {
    let url = HttpUrl::parse(url, rt.config().http.default_port)?;
    let method = Method::resolve(method, body.is_some());
    let request = frame_request(method, &url, body.as_deref());

    let task = AsyncTask::new(rt.pin(callback));
    let id = task.id();
    debug!("{} http://{}:{}{} queued as task {}", method, url.host, url.port, url.path, id.0);
    let transaction = ClientTransaction::new(url, method, request, task);
    rt.defer(id, move |rt| resolve_and_connect(rt, transaction));
    Ok(id)
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not resolve host {}", host),
            )
        })
}

fn resolve_and_connect(rt: &Runtime, mut transaction: ClientTransaction) {
    let started = resolve(&transaction.url.host, transaction.url.port)
        .and_then(|addr| {
            trace!("{} resolved to {}", transaction.url.host, addr);
            transaction.state = ClientState::Connecting;
            AsyncSocket::connect(addr)
        })
        .and_then(|socket| {
            let token = rt.register(
                socket.fd(),
                Source::Connection,
                Interest::READABLE | Interest::WRITABLE,
            )?;
            Ok((socket, token))
        });

    match started {
        Ok((socket, token)) => {
            let connection = Connection::client(socket, token, transaction);
            rt.inner().connections.borrow_mut().insert(token, connection);
        }
        Err(e) => {
            transaction.state = ClientState::Failed;
            debug!("http://{}:{} failed: {}", transaction.url.host, transaction.url.port, e);
            if let Some(task) = transaction.task.take() {
                task.complete_with(Err(e.to_string()));
            }
        }
    }
}
