//! Error taxonomy for the proxy.
//!
//! Every failure inside a connection pipeline is a [`ProxyError`], and each
//! variant maps onto exactly one HTTP status that the client receives in a
//! synthesized error response. Failures never escape a single connection.

use std::io;
use thiserror::Error;

/// Statuses the proxy produces on its own (everything else is relayed verbatim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    NotSupported,
}

impl StatusCode {
    /// Numeric status code
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::NotSupported => 501,
        }
    }

    /// Reason phrase used on the status line and in the HTML title
    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotSupported => "Not Supported",
        }
    }

    /// Short human readable message for the HTML body
    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::BadRequest => "Bad Request.",
            StatusCode::Forbidden => "Access denied.",
            StatusCode::NotFound => "File not found.",
            StatusCode::InternalServerError => "Some server side error.",
            StatusCode::NotSupported => "Method is not supported.",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// Per-connection failure, resolved locally into an HTTP error response.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("could not resolve host: {0}")]
    UnresolvedHost(String),

    #[error("access to {0} denied by filter")]
    Forbidden(String),

    #[error("filter lookup failed: {0}")]
    FilterLookup(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Status sent to the client for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Malformed(_) => StatusCode::BadRequest,
            ProxyError::UnsupportedMethod(_) => StatusCode::NotSupported,
            ProxyError::UnresolvedHost(_) => StatusCode::NotFound,
            ProxyError::Forbidden(_) => StatusCode::Forbidden,
            ProxyError::FilterLookup(_) | ProxyError::Upstream(_) | ProxyError::Io(_) => {
                StatusCode::InternalServerError
            }
        }
    }
}

/// Worker pool construction failure. Fatal to startup.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool size {0} is outside [{min}, {max}]", min = crate::pool::MIN_POOL_SIZE, max = crate::pool::MAX_POOL_SIZE)]
    InvalidSize(usize),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_maps_to_status() {
        assert_eq!(ProxyError::Malformed("x").status().as_u16(), 400);
        assert_eq!(ProxyError::UnsupportedMethod("POST".into()).status().as_u16(), 501);
        assert_eq!(ProxyError::UnresolvedHost("nope".into()).status().as_u16(), 404);
        assert_eq!(ProxyError::Forbidden("a.com".into()).status().as_u16(), 403);
        assert_eq!(ProxyError::FilterLookup("gone".into()).status().as_u16(), 500);
        assert_eq!(ProxyError::Upstream("reset".into()).status().as_u16(), 500);

        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(ProxyError::from(io_err).status(), StatusCode::InternalServerError);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StatusCode::NotSupported.to_string(), "501 Not Supported");
        assert_eq!(StatusCode::InternalServerError.to_string(), "500 Internal Server Error");
    }

    #[test]
    fn test_pool_error_message() {
        let msg = PoolError::InvalidSize(0).to_string();
        assert!(msg.contains("[1, 200]"), "{msg}");
    }
}
