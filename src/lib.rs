//! # filter-proxy
//!
//! A forward HTTP proxy for plain `GET` traffic. Each accepted connection is
//! handed to a bounded worker pool, checked against a hostname/CIDR filter
//! file, rewritten to origin form with `Connection: close`, and relayed to the
//! origin server. The process exits after a fixed number of connections.
//!
//! ## Modules
//! - [`pool`]: fixed-size worker pool with drain-then-stop shutdown
//! - [`listener`]: bounded accept loop
//! - [`pipeline`]: the per-connection stage sequence
//! - [`parsers`]: request head reading, parsing and rewriting
//! - [`filter`]: hostname substring and IPv4 CIDR blocking
//! - [`forwarder`]: upstream connection and response relay
//! - [`response`]: synthesized error pages

pub mod config;
pub mod error;
pub mod filter;
pub mod forwarder;
pub mod listener;
pub mod logging;
pub mod parsers;
pub mod pipeline;
pub mod pool;
pub mod resolver;
pub mod response;
pub mod server;

pub use config::{Config, ProxySettings};
pub use error::{PoolError, ProxyError, StatusCode};
pub use pipeline::ConnectionPipeline;
pub use pool::{Dispatch, WorkerPool};
pub use server::{Proxy, StartupError};
