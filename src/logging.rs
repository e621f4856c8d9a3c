//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to the
//! whole process.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// Safe to call more than once: later calls leave the first subscriber in
/// place and return `false`.
pub fn init(level: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init()
        .is_ok()
}
