//! HTTP server exchange: request line in, one `200 OK` out
//!
//! Only the request line is parsed. Headers and body are read and ignored.
//! The script callback receives `req = {method, url}` and a
//! [`ServerResponse`] whose `end()` frames and sends the reply, after which
//! the connection closes.

use crate::runtime::async_io::{TaskId, Token};
use crate::runtime::{HostError, HostObject, HostResult, Object, Pinned, Runtime, Value, WeakRuntime};
use log::{debug, info, warn};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Parsed `METHOD SP URL [SP VERSION]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub url: String,
    pub version: Option<String>,
}

impl RequestLine {
    pub fn to_value(&self) -> Value {
        Value::Object(
            Object::new()
                .with("method", self.method.as_str())
                .with("url", self.url.as_str()),
        )
    }
}

/// Parse a request line (without the trailing CRLF)
pub fn parse_request_line(line: &[u8]) -> HostResult<RequestLine> {
    let text = String::from_utf8_lossy(line);
    let mut parts = text.split_whitespace();
    let (method, url) = match (parts.next(), parts.next()) {
        (Some(method), Some(url)) => (method, url),
        _ => {
            return Err(HostError::ProtocolParse(format!(
                "malformed request line: {:?}",
                text
            )))
        }
    };
    if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(HostError::ProtocolParse(format!(
            "invalid request method: {:?}",
            method
        )));
    }
    Ok(RequestLine {
        method: method.to_string(),
        url: url.to_string(),
        version: parts.next().map(str::to_string),
    })
}

/// Frame a `200 OK` text response
pub fn format_response(body: &str) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body.as_bytes());
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    AwaitingRequestLine,
    Dispatched,
    Rejected,
}

/// Per-connection server state
pub struct ServerExchange {
    phase: ExchangePhase,
    callback: Rc<Pinned>,
}

impl ServerExchange {
    pub fn new(callback: Rc<Pinned>) -> Self {
        Self {
            phase: ExchangePhase::AwaitingRequestLine,
            callback,
        }
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    /// Look for a complete request line in `buffer`. Consumed input is
    /// cleared; once the exchange left `AwaitingRequestLine` all further
    /// input is discarded.
    pub fn parse(&mut self, buffer: &mut Vec<u8>, max_line: usize) -> Option<HostResult<RequestLine>> {
        if self.phase != ExchangePhase::AwaitingRequestLine {
            buffer.clear();
            return None;
        }

        let line_end = buffer.windows(2).position(|w| w == b"\r\n");
        let result = match line_end {
            Some(end) if end <= max_line => parse_request_line(&buffer[..end]),
            Some(end) => Err(HostError::ProtocolParse(format!(
                "request line of {} bytes exceeds limit of {}",
                end, max_line
            ))),
            None if buffer.len() > max_line => Err(HostError::ProtocolParse(format!(
                "request line exceeds limit of {} bytes",
                max_line
            ))),
            None => return None,
        };

        buffer.clear();
        self.phase = match result {
            Ok(_) => ExchangePhase::Dispatched,
            Err(_) => ExchangePhase::Rejected,
        };
        Some(result)
    }

    /// Feed newly read bytes; on a complete request line the script callback
    /// is posted for the next pass.
    pub(crate) fn on_data(&mut self, rt: &Runtime, token: Token, buffer: &mut Vec<u8>) {
        match self.parse(buffer, rt.config().http.max_request_line) {
            Some(Ok(request)) => {
                info!("{} {}", request.method, request.url);
                let callback = self.callback.clone();
                let response = ServerResponse::new(rt.downgrade(), token);
                rt.defer(TaskId::next(), move |_| {
                    callback.invoke(vec![
                        request.to_value(),
                        Value::Host(HostObject::Response(response)),
                    ]);
                });
            }
            Some(Err(e)) => warn!("connection {}: {}", token.0, e),
            None => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Open,
    Ended,
}

/// Script-visible response handle
#[derive(Clone)]
pub struct ServerResponse {
    runtime: WeakRuntime,
    token: Token,
    state: Rc<Cell<ResponseState>>,
}

impl ServerResponse {
    pub(crate) fn new(runtime: WeakRuntime, token: Token) -> Self {
        Self {
            runtime,
            token,
            state: Rc::new(Cell::new(ResponseState::Open)),
        }
    }

    pub fn state(&self) -> ResponseState {
        self.state.get()
    }

    /// Send the response and close the connection once it is flushed.
    /// Without a body the configured default is sent. Only the first call
    /// has any effect.
    pub fn end(&self, body: Option<&str>) {
        if self.state.replace(ResponseState::Ended) == ResponseState::Ended {
            debug!("response on connection {} already ended", self.token.0);
            return;
        }
        let Some(rt) = self.runtime.upgrade() else {
            return;
        };
        let body = body.unwrap_or(&rt.config().http.response_body);
        rt.queue_write(self.token, format_response(body), true);
    }
}

impl PartialEq for ServerResponse {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerResponse")
            .field("connection", &self.token.0)
            .field("state", &self.state.get())
            .finish()
    }
}
