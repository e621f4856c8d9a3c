//! Request rewriting before forwarding.
//!
//! Upstream servers expect origin-form targets, and the proxy relays exactly
//! one response per connection, so every forwarded request is rewritten to
//! `GET /path HTTP/1.x` and carries `Connection: close`.

use tracing::debug;

use super::{find, HEAD_TERMINATOR};

const SCHEME: &[u8] = b"http://";
const CONNECTION_CLOSE_LINE: &[u8] = b"\r\nConnection: close";

/// Origin form plus forced connection closure
pub fn rewrite_request(raw: &[u8]) -> Vec<u8> {
    let mut rewritten = to_origin_form(raw);
    force_connection_close(&mut rewritten);
    rewritten
}

/// Strip `http://host[:port]` from an absolute-URI request target.
///
/// Only the target token of the request line is considered, and only when it
/// starts with the scheme. A target with no `/` after the authority is
/// returned unchanged.
pub fn to_origin_form(raw: &[u8]) -> Vec<u8> {
    let line_end = raw
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .unwrap_or(raw.len());
    let line = &raw[..line_end];

    let Some(method_end) = line.iter().position(|b| *b == b' ' || *b == b'\t') else {
        return raw.to_vec();
    };
    let Some(target_start) = line[method_end..]
        .iter()
        .position(|b| *b != b' ' && *b != b'\t')
        .map(|p| method_end + p)
    else {
        return raw.to_vec();
    };
    let target_end = line[target_start..]
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .map_or(line.len(), |p| target_start + p);
    let target = &line[target_start..target_end];

    if target.len() < SCHEME.len() || !target[..SCHEME.len()].eq_ignore_ascii_case(SCHEME) {
        return raw.to_vec();
    }
    let authority_start = target_start + SCHEME.len();

    let Some(slash) = line[authority_start..target_end].iter().position(|b| *b == b'/') else {
        return raw.to_vec();
    };

    let mut out = Vec::with_capacity(raw.len());
    out.extend_from_slice(&raw[..target_start]);
    out.extend_from_slice(&raw[authority_start + slash..]);
    out
}

/// Make the request ask for a non-persistent connection.
///
/// `Connection: close` is left alone, `Connection: keep-alive` has its value
/// replaced in place, and otherwise a `Connection: close` header is inserted
/// just before the blank line ending the head. A head without the blank line
/// is left unchanged.
pub fn force_connection_close(buf: &mut Vec<u8>) {
    let head_end = find(buf, HEAD_TERMINATOR);
    // Include the CRLF that ends the last header line
    let head_len = head_end.map_or(buf.len(), |i| i + 2);

    let mut start = match find(&buf[..head_len], b"\r\n") {
        Some(i) => i + 2,
        None => head_len,
    };

    while start < head_len {
        let Some(len) = find(&buf[start..head_len], b"\r\n") else {
            break;
        };
        let end = start + len;

        if let Some((value_start, value_end)) = connection_value(&buf[start..end]) {
            let value = &buf[start + value_start..start + value_end];
            if value.eq_ignore_ascii_case(b"close") {
                return;
            }
            if value.eq_ignore_ascii_case(b"keep-alive") {
                debug!("Replacing Connection: keep-alive with close");
                buf.splice(start + value_start..start + value_end, b"close".iter().copied());
                return;
            }
        }
        start = end + 2;
    }

    if let Some(at) = head_end {
        debug!("Adding Connection: close");
        buf.splice(at..at, CONNECTION_CLOSE_LINE.iter().copied());
    }
}

/// Span of the value within a `Connection:` header line, trimmed of spaces
fn connection_value(line: &[u8]) -> Option<(usize, usize)> {
    let colon = line.iter().position(|b| *b == b':')?;
    if !line[..colon].trim_ascii().eq_ignore_ascii_case(b"connection") {
        return None;
    }

    let mut value_start = colon + 1;
    while value_start < line.len() && (line[value_start] == b' ' || line[value_start] == b'\t') {
        value_start += 1;
    }
    let mut value_end = line.len();
    while value_end > value_start && (line[value_end - 1] == b' ' || line[value_end - 1] == b'\t') {
        value_end -= 1;
    }
    Some((value_start, value_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(raw: &str) -> String {
        String::from_utf8(rewrite_request(raw.as_bytes())).unwrap()
    }

    #[test]
    fn test_keep_alive_request_round_trip() {
        let out = rewrite(
            "GET http://example.com/path HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\n\r\n",
        );
        assert_eq!(
            out,
            "GET /path HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_close_is_untouched() {
        let raw = "GET /x HTTP/1.0\r\nHost: a.com\r\nConnection: close\r\nAccept: */*\r\n\r\n";
        assert_eq!(rewrite(raw), raw);
    }

    #[test]
    fn test_connection_header_inserted() {
        let out = rewrite("GET http://a.com:8080/q?x=1 HTTP/1.1\r\nHost: a.com\r\n\r\n");
        assert_eq!(out, "GET /q?x=1 HTTP/1.1\r\nHost: a.com\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn test_insert_with_no_headers() {
        let out = rewrite("GET http://a.com/ HTTP/1.0\r\n\r\n");
        assert_eq!(out, "GET / HTTP/1.0\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn test_target_without_path_is_unchanged() {
        let out = to_origin_form(b"GET http://a.com HTTP/1.1\r\nHost: a.com\r\n\r\n");
        assert_eq!(out, b"GET http://a.com HTTP/1.1\r\nHost: a.com\r\n\r\n");
    }

    #[test]
    fn test_scheme_in_headers_is_ignored() {
        let raw = b"GET /page HTTP/1.1\r\nReferer: http://other.com/x\r\n\r\n";
        assert_eq!(to_origin_form(raw), raw.to_vec());
    }

    #[test]
    fn test_url_in_query_is_not_a_target() {
        let raw = b"GET /redirect?to=http://other.com/landing HTTP/1.1\r\nHost: a.com\r\n\r\n";
        assert_eq!(to_origin_form(raw), raw.to_vec());
    }

    #[test]
    fn test_absolute_target_with_url_in_query() {
        let out = to_origin_form(b"GET HTTP://a.com/go?to=http://b.com/x HTTP/1.1\r\n\r\n");
        assert_eq!(out, b"GET /go?to=http://b.com/x HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_body_bytes_preserved() {
        let out = rewrite("GET http://a.com/p HTTP/1.1\r\nHost: a.com\r\n\r\nbody");
        assert_eq!(out, "GET /p HTTP/1.1\r\nHost: a.com\r\nConnection: close\r\n\r\nbody");
    }

    #[test]
    fn test_connection_header_case_insensitive() {
        let out = rewrite("GET / HTTP/1.1\r\nconnection:Keep-Alive\r\n\r\n");
        assert_eq!(out, "GET / HTTP/1.1\r\nconnection:close\r\n\r\n");
    }

    #[test]
    fn test_incomplete_head_left_alone() {
        let out = rewrite("GET http://a.com/p HTTP/1.1\r\nHost: a.com\r\n");
        assert_eq!(out, "GET /p HTTP/1.1\r\nHost: a.com\r\n");
    }
}
