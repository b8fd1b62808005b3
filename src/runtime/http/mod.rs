//! Minimal HTTP/1.1 over the reactor's raw sockets
//!
//! - `client`: one request per connection, response completed at EOF
//! - `server`: request-line only parsing, fixed `200 OK` responses
//!
//! No chunked encoding, keep-alive or TLS.

mod client;
mod response;
mod server;
mod url;

pub use client::{frame_request, request, ClientState, ClientTransaction};
pub use response::{HttpResponse, ResponseParser};
pub use server::{
    format_response, parse_request_line, ExchangePhase, RequestLine, ResponseState,
    ServerExchange, ServerResponse,
};
pub use url::HttpUrl;

use super::Value;
use std::fmt;

/// Request methods the client can send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// An explicit method wins; otherwise a body means POST
    pub fn resolve(explicit: Option<Method>, has_body: bool) -> Method {
        match explicit {
            Some(method) => method,
            None if has_body => Method::Post,
            None => Method::Get,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list; a repeated name overwrites the earlier value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Exact-name lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive lookup
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let mut object = super::Object::new();
        for (name, value) in self.iter() {
            object.set(name, value);
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_resolution() {
        assert_eq!(Method::resolve(None, false), Method::Get);
        assert_eq!(Method::resolve(None, true), Method::Post);
        assert_eq!(Method::resolve(Some(Method::Put), true), Method::Put);
        assert_eq!(Method::resolve(Some(Method::Delete), false), Method::Delete);
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_headers_last_wins_in_place() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("X-A", "1");
        headers.insert("Content-Type", "text/plain");

        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Content-Type", "X-A"]);
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), None);
        assert_eq!(headers.get_ignore_case("content-type"), Some("text/plain"));
    }
}
