//! Incremental HTTP response accumulation
//!
//! Bytes are appended as they arrive. The header block is parsed once the
//! first `\r\n\r\n` shows up; everything after it is body. The response is
//! only complete when the peer closes the connection.

use super::Headers;
use crate::runtime::{Object, Value};

const HEADER_END: &[u8] = b"\r\n\r\n";

/// A finished response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: Headers,
    pub body: String,
}

impl HttpResponse {
    /// `{statusCode, headers, body}`
    pub fn to_value(&self) -> Value {
        Value::Object(
            Object::new()
                .with("statusCode", self.status_code)
                .with("headers", self.headers.to_value())
                .with("body", self.body.as_str()),
        )
    }
}

#[derive(Debug, Default)]
pub struct ResponseParser {
    buffer: Vec<u8>,
    /// Offset of the `\r\n\r\n` boundary once seen
    header_end: Option<usize>,
    status_code: u16,
    headers: Headers,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes. Returns true once the header block is parsed.
    pub fn feed(&mut self, data: &[u8]) -> bool {
        let searched = self.buffer.len();
        self.buffer.extend_from_slice(data);

        if self.header_end.is_none() {
            // The boundary may straddle the previous chunk
            let from = searched.saturating_sub(HEADER_END.len() - 1);
            if let Some(pos) = find(&self.buffer[from..], HEADER_END) {
                let end = from + pos;
                self.header_end = Some(end);
                self.parse_head(end);
            }
        }
        self.header_end.is_some()
    }

    pub fn headers_complete(&self) -> bool {
        self.header_end.is_some()
    }

    /// Status code, 0 until headers are parsed or if the status line is malformed
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Bytes buffered so far, headers included
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn parse_head(&mut self, end: usize) {
        let head = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
        let mut lines = head.split("\r\n");

        if let Some(status_line) = lines.next() {
            self.status_code = parse_status_line(status_line);
        }

        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                self.headers
                    .insert(name, value.trim_start_matches([' ', '\t']));
            }
        }
    }

    /// Finish at end of stream. Fails if the header boundary never arrived.
    pub fn finish(self) -> Result<HttpResponse, String> {
        let end = self.header_end.ok_or_else(|| {
            if self.buffer.is_empty() {
                "connection closed without a response".to_string()
            } else {
                "connection closed before response headers were complete".to_string()
            }
        })?;

        let body = &self.buffer[end + HEADER_END.len()..];
        let body = if body.is_empty() {
            "{}".to_string()
        } else {
            String::from_utf8_lossy(body).into_owned()
        };

        Ok(HttpResponse {
            status_code: self.status_code,
            headers: self.headers,
            body,
        })
    }
}

/// `HTTP/1.1 200 OK` → 200; anything unparseable → 0
fn parse_status_line(line: &str) -> u16 {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code.parse().unwrap_or(0),
        _ => 0,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_response() {
        let mut parser = ResponseParser::new();
        assert!(parser.feed(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nHello"));
        assert_eq!(parser.status_code(), 200);

        let response = parser.finish().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(response.body, "Hello");
    }

    #[test]
    fn test_boundary_split_across_chunks() {
        let mut parser = ResponseParser::new();
        assert!(!parser.feed(b"HTTP/1.1 404 Not Found\r\nX-A: 1\r"));
        assert!(!parser.feed(b"\n\r"));
        assert!(parser.feed(b"\nmissing"));
        let response = parser.finish().unwrap();
        assert_eq!(response.status_code, 404);
        assert_eq!(response.headers.get("X-A"), Some("1"));
        assert_eq!(response.body, "missing");
    }

    #[test]
    fn test_empty_body_becomes_braces() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(parser.finish().unwrap().body, "{}");
    }

    #[test]
    fn test_duplicate_headers_last_wins() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\nSet: a\r\nOther:  x\r\nSet: b\r\nnocolon\r\n\r\n");
        let response = parser.finish().unwrap();
        assert_eq!(response.headers.len(), 2);
        assert_eq!(response.headers.get("Set"), Some("b"));
        assert_eq!(response.headers.get("Other"), Some("x"));
    }

    #[test]
    fn test_body_containing_boundary_kept() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\n\r\na\r\n\r\nb");
        assert_eq!(parser.finish().unwrap().body, "a\r\n\r\nb");
    }

    #[test]
    fn test_eof_without_boundary_fails() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\nContent-");
        assert!(parser.finish().is_err());
        assert!(ResponseParser::new().finish().is_err());
    }

    #[test]
    fn test_malformed_status_line() {
        assert_eq!(parse_status_line("HTTP/1.0 301 Moved"), 301);
        assert_eq!(parse_status_line("garbage"), 0);
        assert_eq!(parse_status_line("HTTP/1.1 abc"), 0);
    }

    #[test]
    fn test_to_value() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\nA: b\r\n\r\nbody");
        let value = parser.finish().unwrap().to_value();
        assert_eq!(
            value.to_json(),
            serde_json::json!({"statusCode": 200, "headers": {"A": "b"}, "body": "body"})
        );
    }
}
