//! TCP listener with a bounded accept loop.
//!
//! # Responsibilities
//! - Bind the listening socket with a backlog equal to the request budget
//! - Accept until the configured number of connections has been taken
//! - Hand each accepted connection off without doing any proxy work itself
//!
//! Accept failures are transient: they are logged and the loop keeps going.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for listener operations.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
}

/// Listening socket that stops after `max_requests` accepted connections
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    max_requests: usize,
}

impl Listener {
    /// Listen on all IPv4 interfaces
    pub fn bind(port: u16, max_requests: usize) -> Result<Self, ListenerError> {
        Self::bind_addr(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port), max_requests)
    }

    /// Listen on a specific IPv4 address
    pub fn bind_addr(addr: SocketAddrV4, max_requests: usize) -> Result<Self, ListenerError> {
        let inner = open_socket(addr, max_requests).map_err(|source| ListenerError::Bind { addr, source })?;

        info!(
            address = %addr,
            max_requests,
            "Listener bound"
        );

        Ok(Self { inner, max_requests })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept connections and pass each one to `dispatch` until the request
    /// budget is used up. Returns the number of connections accepted.
    pub fn serve<F>(&self, mut dispatch: F) -> usize
    where
        F: FnMut(TcpStream),
    {
        let mut accepted = 0;

        while accepted < self.max_requests {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    accepted += 1;
                    debug!(%peer, accepted, remaining = self.max_requests - accepted, "Connection accepted");
                    dispatch(stream);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!(accepted, "Request budget reached, no longer accepting");
        accepted
    }
}

fn open_socket(addr: SocketAddrV4, backlog: usize) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    Ok(socket.into())
}
