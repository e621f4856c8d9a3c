//! Upstream forwarding.
//!
//! Opens a fresh connection per request, sends the rewritten request and
//! streams the upstream response back to the client chunk by chunk until the
//! upstream closes. The response is relayed byte for byte; the proxy never
//! looks at the status line or body.

use std::io::{self, Read, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ProxyError, StatusCode};
use crate::resolver::Resolve;
use crate::response::ErrorResponder;

/// Sends a request upstream and relays the response
#[derive(Clone)]
pub struct UpstreamForwarder {
    resolver: Arc<dyn Resolve>,
    responder: ErrorResponder,
    io_timeout: Option<Duration>,
    buffer_size: usize,
}

impl UpstreamForwarder {
    pub fn new(
        resolver: Arc<dyn Resolve>,
        responder: ErrorResponder,
        io_timeout: Option<Duration>,
        buffer_size: usize,
    ) -> Self {
        Self {
            resolver,
            responder,
            io_timeout,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Forward `request` to `host:port` and relay the answer into `client`.
    ///
    /// Returns the number of response bytes relayed. On failure a 500 has
    /// already been written to the client (after any partial response), and
    /// the upstream connection is closed before this returns.
    #[tracing::instrument(skip(self, request, client), fields(request_len = request.len()), level = "debug")]
    pub fn forward<W: Write>(
        &self,
        host: &str,
        port: u16,
        request: &[u8],
        client: &mut W,
    ) -> Result<u64, ProxyError> {
        let result = self.relay(host, port, request, client);

        if let Err(e) = &result {
            warn!(%host, port, error = %e, "Forwarding failed");
            self.responder.send(client, StatusCode::InternalServerError);
        }
        result
    }

    fn relay<W: Write>(
        &self,
        host: &str,
        port: u16,
        request: &[u8],
        client: &mut W,
    ) -> Result<u64, ProxyError> {
        let ip = self
            .resolver
            .resolve(host)
            .ok_or_else(|| ProxyError::Upstream(format!("cannot resolve {}", host)))?;
        let addr = SocketAddrV4::new(ip, port);

        let mut upstream = self
            .connect(addr)
            .map_err(|e| ProxyError::Upstream(format!("connect to {} failed: {}", addr, e)))?;
        debug!(%addr, "Connected to upstream");

        upstream
            .write_all(request)
            .and_then(|_| upstream.flush())
            .map_err(|e| ProxyError::Upstream(format!("send to {} failed: {}", addr, e)))?;

        let mut buf = vec![0u8; self.buffer_size];
        let mut relayed = 0u64;
        loop {
            let n = match upstream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ProxyError::Upstream(format!(
                        "receive from {} failed after {} bytes: {}",
                        addr, relayed, e
                    )))
                }
            };

            client.write_all(&buf[..n])?;
            relayed += n as u64;
        }
        client.flush()?;

        debug!(%addr, relayed, "Upstream closed");
        Ok(relayed)
    }

    fn connect(&self, addr: SocketAddrV4) -> io::Result<TcpStream> {
        let stream = match self.io_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr.into(), timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    struct StaticResolver(HashMap<String, Ipv4Addr>);

    impl Resolve for StaticResolver {
        fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
            self.0.get(host).copied()
        }
    }

    fn forwarder(buffer_size: usize) -> UpstreamForwarder {
        let table = HashMap::from([("upstream.test".to_string(), Ipv4Addr::LOCALHOST)]);
        UpstreamForwarder::new(
            Arc::new(StaticResolver(table)),
            ErrorResponder::default(),
            Some(Duration::from_secs(5)),
            buffer_size,
        )
    }

    /// Accepts one connection, records the request head, replies with `reply`
    fn one_shot_upstream(reply: &'static [u8]) -> (u16, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = crate::parsers::read_head(&mut stream, 8192).unwrap();
            stream.write_all(reply).unwrap();
            request
        });
        (port, handle)
    }

    #[test]
    fn test_relays_response_unchanged() {
        let reply: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Odd:  spacing \r\n\r\nhello";
        let (port, upstream) = one_shot_upstream(reply);

        let mut client = Vec::new();
        let request = b"GET / HTTP/1.1\r\nHost: upstream.test\r\nConnection: close\r\n\r\n";
        // Small buffer so the relay takes several reads
        let relayed = forwarder(7).forward("upstream.test", port, request, &mut client).unwrap();

        assert_eq!(client, reply);
        assert_eq!(relayed, reply.len() as u64);
        assert_eq!(upstream.join().unwrap(), request.to_vec());
    }

    #[test]
    fn test_unresolvable_host_is_500() {
        let mut client = Vec::new();
        let err = forwarder(64)
            .forward("elsewhere.test", 80, b"GET / HTTP/1.1\r\n\r\n", &mut client)
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::InternalServerError);
        assert!(client.starts_with(b"HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[test]
    fn test_refused_connection_is_500() {
        // Grab a free port and release it so nothing is listening there
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let mut client = Vec::new();
        let err = forwarder(64)
            .forward("upstream.test", port, b"GET / HTTP/1.1\r\n\r\n", &mut client)
            .unwrap_err();

        assert!(matches!(err, ProxyError::Upstream(_)));
        assert!(client.starts_with(b"HTTP/1.1 500 "));
    }

    /// Client sink that accepts a few bytes, then fails
    struct BrokenClient {
        accepted: Vec<u8>,
        budget: usize,
    }

    impl Write for BrokenClient {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_short_write_to_client_is_error() {
        let (port, upstream) = one_shot_upstream(b"HTTP/1.1 200 OK\r\n\r\nsome longer body text");

        let mut client = BrokenClient { accepted: Vec::new(), budget: 4 };
        let err = forwarder(64)
            .forward("upstream.test", port, b"GET / HTTP/1.1\r\n\r\n", &mut client)
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::InternalServerError);
        assert_eq!(client.accepted, b"HTTP");
        upstream.join().unwrap();
    }
}
