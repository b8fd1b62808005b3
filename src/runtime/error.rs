//! Errors raised synchronously by host functions

use thiserror::Error;

/// Errors returned to the script at call time
///
/// Failures of the asynchronous work itself never surface here; they are
/// delivered to the operation's callback as an error string.
#[derive(Debug, Error)]
pub enum HostError {
    /// Bad argument count, type or range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// URL with a scheme other than `http`
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Native I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed protocol data
    #[error("protocol parse error: {0}")]
    ProtocolParse(String),
}

impl HostError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        HostError::InvalidArgument(msg.into())
    }

    /// Whether the error belongs to the invalid-argument class
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            HostError::InvalidArgument(_) | HostError::UnsupportedScheme(_)
        )
    }
}

pub type HostResult<T> = Result<T, HostError>;
