//! Host name resolution.
//!
//! The pipeline resolves the client-supplied host once to decide between 404
//! and the filter checks, and the forwarder resolves it again to connect.
//! Both go through [`Resolve`] so tests can substitute a fixed table.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use tracing::debug;

/// Maps a host name onto an IPv4 address
pub trait Resolve: Send + Sync {
    /// First IPv4 address of `host`, or `None` if the lookup fails
    fn resolve(&self, host: &str) -> Option<Ipv4Addr>;
}

/// Resolver backed by the system's name service
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        // Port is irrelevant here, ToSocketAddrs just needs one
        let addrs = match (host, 0u16).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(%host, error = %e, "Host lookup failed");
                return None;
            }
        };

        addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .next()
    }
}
