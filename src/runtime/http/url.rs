//! `http://host[:port][/path]` URLs

use crate::runtime::{HostError, HostResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpUrl {
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`
    pub path: String,
}

impl HttpUrl {
    /// Parse an absolute `http` URL. A missing port means `default_port`,
    /// a missing path means `/`.
    pub fn parse(url: &str, default_port: u16) -> HostResult<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| HostError::invalid(format!("not an absolute URL: {}", url)))?;
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(HostError::UnsupportedScheme(scheme.to_string()));
        }

        let (authority, path) = match rest.find(['/', '?']) {
            Some(i) if rest.as_bytes()[i] == b'?' => (&rest[..i], format!("/{}", &rest[i..])),
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, "/".to_string()),
        };

        // Credentials are not supported but must not be mistaken for a host
        if authority.contains('@') {
            return Err(HostError::invalid(format!(
                "credentials in URL are not supported: {}",
                url
            )));
        }

        let (host, port) = split_host_port(authority, default_port)?;
        if host.is_empty() {
            return Err(HostError::invalid(format!("URL has no host: {}", url)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Value for the `Host` request header
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

fn split_host_port(authority: &str, default_port: u16) -> HostResult<(&str, u16)> {
    // Bracketed IPv6 literal
    if let Some(rest) = authority.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| HostError::invalid(format!("unterminated IPv6 literal: {}", authority)))?;
        let host = &rest[..end];
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None => default_port,
        };
        return Ok((host, port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((authority, default_port)),
    }
}

fn parse_port(port: &str) -> HostResult<u16> {
    port.parse::<u16>()
        .map_err(|_| HostError::invalid(format!("invalid port: {}", port)))
}
