//! Configuration module for the filter proxy.
//!
//! The four startup parameters come from the command line; optional tuning
//! knobs may be layered on top from a TOML file.
//!
//! ## Author
//! a13x.h.cc@gmail.com

mod config;

pub use config::{Config, ConfigError, ProxySettings, DEFAULT_SERVER_NAME};
