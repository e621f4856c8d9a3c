//! Process wiring: worker pool, listener and pipeline.
//!
//! [`Proxy::bind`] performs every fallible startup step (pool first, then the
//! listening socket). [`Proxy::run`] accepts until the request budget is used
//! up, then drains the pool and joins its workers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::error::PoolError;
use crate::listener::{Listener, ListenerError};
use crate::pipeline::ConnectionPipeline;
use crate::pool::{Dispatch, WorkerPool};
use crate::resolver::{Resolve, SystemResolver};

/// Fatal startup failures
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// A bound, ready-to-run proxy
pub struct Proxy {
    listener: Listener,
    pool: WorkerPool,
    pipeline: Arc<ConnectionPipeline>,
}

impl Proxy {
    pub fn bind(config: &Config) -> Result<Self, StartupError> {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Like [`Proxy::bind`], resolving hosts through `resolver`
    pub fn with_resolver(config: &Config, resolver: Arc<dyn Resolve>) -> Result<Self, StartupError> {
        config.validate()?;

        let pool = WorkerPool::new(config.pool_size)?;
        let listener = Listener::bind(config.port, config.max_requests)?;
        let pipeline = Arc::new(ConnectionPipeline::new(config, resolver));

        info!(
            port = config.port,
            pool_size = config.pool_size,
            max_requests = config.max_requests,
            filter = %config.filter_path.display(),
            "Proxy ready"
        );

        Ok(Self {
            listener,
            pool,
            pipeline,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the request budget is used up, then shut the pool down.
    ///
    /// Returns the number of connections accepted. Every accepted connection
    /// has been fully handled when this returns.
    pub fn run(self) -> usize {
        let Proxy {
            listener,
            mut pool,
            pipeline,
        } = self;

        let accepted = listener.serve(|stream| {
            let pipeline = Arc::clone(&pipeline);
            if pool.dispatch(move || pipeline.handle(stream)) == Dispatch::Dropped {
                info!("Connection discarded");
            }
        });

        debug!(accepted, queued = pool.queued(), "Accept loop finished");
        pool.shutdown();
        info!("Proxy stopped");
        accepted
    }
}
