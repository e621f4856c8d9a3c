//! Per-connection proxy pipeline.
//!
//! One pass per accepted connection, strictly in order:
//!
//! ```text
//! Receive → Parse → ValidateMethod → ResolveHost → Filter → Rewrite → Forward → Close
//!    │        │          │               │           │                  │
//!    └─ 500   └─ 400     └─ 501          └─ 404      └─ 403 / 500       └─ 500 (sent by forwarder)
//! ```
//!
//! The first failing stage answers the client with a synthesized error
//! response. `Close` is always reached and shuts the client socket down, so no
//! connection outlives its pipeline pass.

use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

use crate::config::Config;
use crate::error::ProxyError;
use crate::filter::HostFilter;
use crate::forwarder::UpstreamForwarder;
use crate::parsers::{read_head, rewrite_request, ParsedRequest};
use crate::resolver::{Resolve, SystemResolver};
use crate::response::ErrorResponder;

/// The only method the proxy forwards
const SUPPORTED_METHOD: &str = "GET";

/// Relaxed ordering is enough, ids only need to be unique
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier used to correlate a connection's log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Receive,
    Parse,
    ValidateMethod,
    ResolveHost,
    Filter,
    Rewrite,
    Forward,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Receive => "receive",
            Stage::Parse => "parse",
            Stage::ValidateMethod => "validate-method",
            Stage::ResolveHost => "resolve-host",
            Stage::Filter => "filter",
            Stage::Rewrite => "rewrite",
            Stage::Forward => "forward",
        };
        f.write_str(name)
    }
}

/// A failure together with the stage that produced it
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub error: ProxyError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for StageError {}

fn at(stage: Stage) -> impl FnOnce(ProxyError) -> StageError {
    move |error| StageError { stage, error }
}

/// A request that passed every check and is ready to forward
struct Prepared {
    request: ParsedRequest,
    rewritten: Vec<u8>,
}

/// Everything one connection needs, shared read-only by all workers
#[derive(Clone)]
pub struct ConnectionPipeline {
    filter: HostFilter,
    resolver: Arc<dyn Resolve>,
    forwarder: UpstreamForwarder,
    responder: ErrorResponder,
    max_request_bytes: usize,
    io_timeout: Option<Duration>,
}

impl ConnectionPipeline {
    /// Pipeline using the system resolver
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::new(SystemResolver))
    }

    pub fn new(config: &Config, resolver: Arc<dyn Resolve>) -> Self {
        let responder = ErrorResponder::new(config.proxy.server_name.clone());
        let io_timeout = config.proxy.io_timeout();
        let forwarder = UpstreamForwarder::new(
            Arc::clone(&resolver),
            responder.clone(),
            io_timeout,
            config.proxy.relay_buffer_bytes,
        );

        Self {
            filter: HostFilter::new(config.filter_path.clone()),
            resolver,
            forwarder,
            responder,
            max_request_bytes: config.proxy.max_request_bytes,
            io_timeout,
        }
    }

    /// Run one full pass over an accepted client connection, then close it.
    pub fn handle(&self, stream: TcpStream) {
        let id = ConnectionId::new();
        let peer = stream.peer_addr().ok();
        let span = info_span!("connection", id = %id, peer = ?peer);
        let _enter = span.enter();
        debug!("Connection accepted by worker");

        let mut stream = stream;
        if let Err(e) = stream
            .set_read_timeout(self.io_timeout)
            .and_then(|_| stream.set_write_timeout(self.io_timeout))
        {
            warn!(error = %e, "Failed to apply client deadlines");
        }

        match self.serve(&mut stream) {
            Ok(relayed) => info!(relayed, "Request proxied"),
            Err(e) => info!(stage = %e.stage, status = e.error.status().as_u16(), error = %e.error, "Request failed"),
        }

        // Close
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!(error = %e, "Client already disconnected");
        }
    }

    /// Run the pipeline over any duplex byte stream.
    ///
    /// Returns the number of response bytes relayed from upstream. Every
    /// error has already been answered on `client` when this returns.
    pub fn serve<S: Read + Write>(&self, client: &mut S) -> Result<u64, StageError> {
        let prepared = match self.prepare(client) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.responder.send(client, e.error.status());
                return Err(e);
            }
        };

        let ParsedRequest { host, port, .. } = &prepared.request;
        self.forwarder
            .forward(host, *port, &prepared.rewritten, client)
            .map_err(at(Stage::Forward))
    }

    /// Every stage up to and including the rewrite
    fn prepare<R: Read>(&self, client: &mut R) -> Result<Prepared, StageError> {
        let raw = read_head(client, self.max_request_bytes)
            .map_err(ProxyError::from)
            .map_err(at(Stage::Receive))?;

        let request = ParsedRequest::parse(&raw).map_err(at(Stage::Parse))?;
        info!(method = %request.method, target = %request.path, host = %request.host, port = request.port, "Request received");

        if request.method != SUPPORTED_METHOD {
            return Err(StageError {
                stage: Stage::ValidateMethod,
                error: ProxyError::UnsupportedMethod(request.method.clone()),
            });
        }

        let ip = self
            .resolver
            .resolve(&request.host)
            .ok_or_else(|| ProxyError::UnresolvedHost(request.host.clone()))
            .map_err(at(Stage::ResolveHost))?;
        debug!(host = %request.host, %ip, "Host resolved");

        self.filter
            .check(&request.host, ip)
            .map_err(at(Stage::Filter))?;

        let rewritten = rewrite_request(&raw);
        debug!(stage = %Stage::Rewrite, bytes = rewritten.len(), "Request rewritten");

        Ok(Prepared { request, rewritten })
    }
}
