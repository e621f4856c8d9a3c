//! HTTP request handling for the proxy.
//!
//! The proxy reads only the request head from the client, parses just enough
//! of it to route and filter the request, and rewrites it into origin form
//! before forwarding. Everything operates on raw bytes so that anything the
//! proxy does not touch is forwarded untouched.
//!
//! ## Author
//! a13x.h.cc@gmail.com

mod request;
mod rewrite;

pub use request::{read_head, strip_port, ParsedRequest, Protocol, DEFAULT_PORT};
pub use rewrite::{force_connection_close, rewrite_request, to_origin_form};

/// Blank line that terminates the request head
pub(crate) const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Position of the first occurrence of `needle` in `haystack`
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
