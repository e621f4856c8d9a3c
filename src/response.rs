//! Synthesized error responses.
//!
//! Every response the proxy produces itself is an HTTP/1.1 error page that
//! closes the connection. It depends only on the status and the clock.

use chrono::{DateTime, Utc};
use std::io::Write;
use tracing::debug;

use crate::config::DEFAULT_SERVER_NAME;
use crate::error::StatusCode;

/// Builds and sends canonical error responses
#[derive(Debug, Clone)]
pub struct ErrorResponder {
    server_name: String,
}

impl Default for ErrorResponder {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_NAME)
    }
}

impl ErrorResponder {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    /// Response for `status`, dated now
    pub fn build(&self, status: StatusCode) -> Vec<u8> {
        self.build_at(status, Utc::now()).into_bytes()
    }

    /// Response for `status`, dated `now`
    pub fn build_at(&self, status: StatusCode, now: DateTime<Utc>) -> String {
        let body = format!(
            "<HTML><HEAD><TITLE>{status}</TITLE></HEAD>\r\n<BODY><H4>{status}</H4>\r\n{message}\r\n</BODY></HTML>\r\n",
            status = status,
            message = status.message(),
        );

        format!(
            "HTTP/1.1 {status}\r\n\
             Server: {server}\r\n\
             Date: {date}\r\n\
             Content-Type: text/html\r\n\
             Content-Length: {length}\r\n\
             Connection: close\r\n\
             \r\n\
             {body}",
            status = status,
            server = self.server_name,
            date = http_date(now),
            length = body.len(),
            body = body,
        )
    }

    /// Write the response for `status` to `out`, best effort.
    ///
    /// The peer may already be gone, so failures are only logged.
    pub fn send<W: Write>(&self, out: &mut W, status: StatusCode) {
        let response = self.build(status);
        if let Err(e) = out.write_all(&response).and_then(|_| out.flush()) {
            debug!(status = status.as_u16(), error = %e, "Failed to send error response");
        }
    }
}

/// RFC 1123 date as used in the `Date` header
fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
