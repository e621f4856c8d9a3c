//! Request head reading and parsing.
//!
//! [`read_head`] collects bytes from the client until the blank line that
//! ends the head, and [`ParsedRequest::parse`] pulls out the handful of fields
//! the proxy needs: method, target, protocol, target port and the `Host`
//! header.
//!
//! ## Author
//! a13x.h.cc@gmail.com

use std::io::{self, Read};
use tracing::debug;

use super::{find, HEAD_TERMINATOR};
use crate::error::ProxyError;

/// Port used when the absolute URI does not name one
pub const DEFAULT_PORT: u16 = 80;

const READ_CHUNK: usize = 1024;

/// Protocol versions the proxy accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http10,
    Http11,
}

impl Protocol {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(Protocol::Http10),
            "HTTP/1.1" => Some(Protocol::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http10 => "HTTP/1.0",
            Protocol::Http11 => "HTTP/1.1",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields of a client request the proxy acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// Request target exactly as sent, usually an absolute URI
    pub path: String,
    pub protocol: Protocol,
    /// `Host` header value without any `:port` suffix
    pub host: String,
    /// Port from the absolute URI, or [`DEFAULT_PORT`]
    pub port: u16,
}

impl ParsedRequest {
    /// Parse a request head.
    ///
    /// Tokens are split on spaces and line endings: method, target and
    /// protocol come first, then the token following `Host:` is the host.
    /// Any missing piece, a protocol other than `HTTP/1.0`/`HTTP/1.1`, or a
    /// bad port in the absolute URI is a malformed request.
    #[tracing::instrument(skip(raw), fields(len = raw.len()), level = "debug")]
    pub fn parse(raw: &[u8]) -> Result<Self, ProxyError> {
        let text = String::from_utf8_lossy(raw);
        let mut tokens = text
            .split(|c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n')
            .filter(|token| !token.is_empty());

        let method = tokens
            .next()
            .ok_or(ProxyError::Malformed("missing method"))?
            .to_string();
        let path = tokens
            .next()
            .ok_or(ProxyError::Malformed("missing request target"))?
            .to_string();
        let port = target_port(&path)?;
        let protocol = tokens
            .next()
            .and_then(Protocol::from_token)
            .ok_or(ProxyError::Malformed("missing or unsupported protocol"))?;
        debug!(%method, %path, %protocol, port, "Parsed request line");

        while let Some(token) = tokens.next() {
            if token.eq_ignore_ascii_case("host:") {
                let value = tokens.next().ok_or(ProxyError::Malformed("empty Host header"))?;
                let host = strip_port(value);
                if host.is_empty() {
                    return Err(ProxyError::Malformed("empty Host header"));
                }
                return Ok(ParsedRequest {
                    method,
                    path,
                    protocol,
                    host: host.to_string(),
                    port,
                });
            }
        }

        Err(ProxyError::Malformed("missing Host header"))
    }
}

/// Port named in an absolute-URI target, [`DEFAULT_PORT`] otherwise
fn target_port(target: &str) -> Result<u16, ProxyError> {
    let rest = match target.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http://") => &target[7..],
        _ => return Ok(DEFAULT_PORT),
    };

    let authority = rest.split('/').next().unwrap_or_default();
    match authority.rsplit_once(':') {
        Some((_, port)) => port
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or(ProxyError::Malformed("invalid port in request target")),
        None => Ok(DEFAULT_PORT),
    }
}

/// Host part of `host[:port]`. The suffix is only dropped when it is a
/// numeric port.
pub fn strip_port(value: &str) -> &str {
    match value.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => value,
    }
}

/// Read from `reader` until the head terminator is seen, the peer stops
/// sending, or `max_bytes` have been collected.
///
/// Bytes that arrive after the terminator in the same read are kept. An IO
/// error after some data was received ends the read with what was collected.
pub fn read_head<R: Read>(reader: &mut R, max_bytes: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(READ_CHUNK.min(max_bytes));
    let mut chunk = [0u8; READ_CHUNK];

    while buf.len() < max_bytes {
        let want = (max_bytes - buf.len()).min(READ_CHUNK);
        let n = match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if !buf.is_empty() => {
                debug!(error = %e, received = buf.len(), "Read ended early");
                break;
            }
            Err(e) => return Err(e),
        };

        // The terminator may straddle two reads
        let search_from = buf.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        buf.extend_from_slice(&chunk[..n]);
        if find(&buf[search_from..], HEAD_TERMINATOR).is_some() {
            break;
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn status_of(raw: &str) -> u16 {
        ParsedRequest::parse(raw.as_bytes()).unwrap_err().status().as_u16()
    }

    #[test]
    fn test_parse_absolute_uri() {
        let req = ParsedRequest::parse(
            b"GET http://example.com/index.html HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n",
        )
        .unwrap();

        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "http://example.com/index.html");
        assert_eq!(req.protocol, Protocol::Http11);
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 80);
    }

    #[test]
    fn test_parse_explicit_port() {
        let req = ParsedRequest::parse(
            b"GET http://example.org:8080/ HTTP/1.0\r\nHost: example.org:8080\r\n\r\n",
        )
        .unwrap();

        assert_eq!(req.port, 8080);
        assert_eq!(req.host, "example.org");
        assert_eq!(req.protocol, Protocol::Http10);
    }

    #[test]
    fn test_origin_form_defaults_to_port_80() {
        let req = ParsedRequest::parse(b"GET /a/b HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(req.port, DEFAULT_PORT);
        assert_eq!(req.path, "/a/b");
    }

    #[test]
    fn test_non_get_still_parses() {
        let req = ParsedRequest::parse(b"POST http://a.com/ HTTP/1.1\r\nHost: a.com\r\n\r\n").unwrap();
        assert_eq!(req.method, "POST");
    }

    #[test]
    fn test_malformed_requests_are_400() {
        assert_eq!(status_of(""), 400);
        assert_eq!(status_of("\r\n\r\n"), 400);
        assert_eq!(status_of("GET\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com/\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com/ HTTP/2.0\r\nHost: a.com\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com/ http/1.1\r\nHost: a.com\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com/ HTTP/1.1\r\nAccept: */*\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com/ HTTP/1.1\r\nHost:\r\n\r\n"), 400);
    }

    #[test]
    fn test_bad_port_is_400() {
        assert_eq!(status_of("GET http://a.com:/ HTTP/1.1\r\nHost: a.com\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com:0/ HTTP/1.1\r\nHost: a.com\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com:99999/ HTTP/1.1\r\nHost: a.com\r\n\r\n"), 400);
        assert_eq!(status_of("GET http://a.com:web/ HTTP/1.1\r\nHost: a.com\r\n\r\n"), 400);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("a.com:81"), "a.com");
        assert_eq!(strip_port("a.com"), "a.com");
        assert_eq!(strip_port("a.com:x"), "a.com:x");
    }

    #[test]
    fn test_read_head_stops_at_terminator() {
        let mut input = Cursor::new(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec());
        let head = read_head(&mut input, 8192).unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    }

    #[test]
    fn test_read_head_respects_cap() {
        let mut input = Cursor::new(vec![b'a'; 10_000]);
        let head = read_head(&mut input, 4096).unwrap();
        assert_eq!(head.len(), 4096);
    }

    /// Hands out one byte per read, so the terminator spans many reads
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = buf.len().min(1);
            self.0.read(&mut buf[..limit])
        }
    }

    #[test]
    fn test_read_head_across_reads() {
        let mut input = Trickle(Cursor::new(b"GET / HTTP/1.1\r\n\r\nleftover".to_vec()));
        let head = read_head(&mut input, 8192).unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\n\r\n");
    }
}
