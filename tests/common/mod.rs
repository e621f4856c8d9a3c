//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use filter_proxy::parsers::read_head;
use filter_proxy::resolver::Resolve;

/// Resolver backed by a fixed table
pub struct StaticResolver(pub HashMap<&'static str, Ipv4Addr>);

impl Resolve for StaticResolver {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        self.0.get(host).copied()
    }
}

/// Origin server that answers `connections` requests with `reply` and
/// returns the request heads it received.
pub fn start_origin(reply: &'static [u8], connections: usize) -> (u16, JoinHandle<Vec<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..connections {
            let (mut stream, _) = listener.accept().unwrap();
            seen.push(read_head(&mut stream, 8192).unwrap());
            stream.write_all(reply).unwrap();
        }
        seen
    });

    (port, handle)
}

/// Send one raw request through the proxy and read until it closes
pub fn send(proxy: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", proxy.port())).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(request.as_bytes()).unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
