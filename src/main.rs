//! # filter-proxy
//!
//! Forward HTTP proxy serving a fixed number of connections from a bounded
//! worker pool, with hostname and CIDR blocking read from a filter file.
//!
//! ```text
//! filter-proxy <PORT> <POOL_SIZE> <MAX_REQUESTS> <FILTER_FILE> [--config proxy.toml] [--log-level debug]
//! ```
//!
//! ## Author
//! a13x.h.cc@gmail.com

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use filter_proxy::config::{Config, ProxySettings};
use filter_proxy::{logging, Proxy};

#[derive(Parser, Debug)]
#[command(name = "filter-proxy")]
#[command(version)]
#[command(about = "Forward HTTP proxy with a bounded worker pool and host filtering")]
struct Args {
    /// Port to listen on
    port: u16,

    /// Number of worker threads (1-200)
    pool_size: usize,

    /// Connections to serve before exiting
    max_requests: usize,

    /// Filter file: one hostname fragment or IPv4 CIDR per line
    filter: PathBuf,

    /// TOML file with a [proxy] table of tuning knobs
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("filter-proxy: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => ProxySettings::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ProxySettings::default(),
    };
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }

    logging::init(&settings.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "filter-proxy starting");

    let config = Config::new(args.port, args.pool_size, args.max_requests, args.filter).with_settings(settings);
    let proxy = Proxy::bind(&config).context("Startup failed")?;

    let served = proxy.run();
    tracing::info!(served, "Request budget exhausted, exiting");
    Ok(())
}
