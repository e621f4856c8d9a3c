//! Host and IPv4 subnet filtering.
//!
//! The filter file is plain text with one entry per line. A line is either a
//! hostname pattern or an `a.b.c.d[/prefix]` CIDR entry:
//!
//! ```text
//! facebook.com
//! ads.
//! 10.0.0.0/8
//! 93.184.216.34
//! ```
//!
//! The file is opened and read on every lookup, so edits take effect for the
//! next request without a reload. Every line participates in the hostname
//! check; lines that are not valid CIDR entries are ignored by the IP check.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ProxyError;

/// Lookup failure. Maps to a 500 response.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("cannot read filter file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),
}

impl From<FilterError> for ProxyError {
    fn from(e: FilterError) -> Self {
        ProxyError::FilterLookup(e.to_string())
    }
}

/// A parsed `address/prefix` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrEntry {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl CidrEntry {
    /// Parse a filter line. Returns `None` for anything that is not a valid
    /// IPv4 address with an optional prefix length in `0..=32`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(2, '/');
        let addr = parts.next()?.trim();
        let prefix_len = match parts.next() {
            Some(bits) => bits.trim().parse::<u8>().ok().filter(|b| *b <= 32)?,
            None => 32,
        };
        let network = addr.parse::<Ipv4Addr>().ok()?;

        Some(CidrEntry { network, prefix_len })
    }

    /// Whether `ip` agrees with this entry on the top `prefix_len` bits
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        network_bits(self.network, self.prefix_len) == network_bits(ip, self.prefix_len)
    }
}

fn network_bits(addr: Ipv4Addr, prefix_len: u8) -> u32 {
    // A /0 shifts by 32, which leaves no network bits at all
    u32::from(addr)
        .checked_shr(32 - u32::from(prefix_len))
        .unwrap_or(0)
}

/// Evaluates hosts and addresses against the filter file
#[derive(Debug, Clone)]
pub struct HostFilter {
    file_path: PathBuf,
}

impl HostFilter {
    /// Create a filter that reads `file_path` on every lookup
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// Whether any filter line contains `host` as a substring
    pub fn is_host_blocked(&self, host: &str) -> Result<bool, FilterError> {
        if host.is_empty() {
            return Ok(false);
        }

        for line in self.read_lines()? {
            if line.contains(host) {
                debug!(%host, entry = %line, "Hostname matched filter entry");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether `ip` falls inside any CIDR entry of the filter file
    pub fn is_ip_blocked(&self, ip: &str) -> Result<bool, FilterError> {
        let lines = self.read_lines()?;
        let addr: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| FilterError::InvalidAddress(ip.to_string()))?;

        for line in lines {
            if let Some(entry) = CidrEntry::parse(&line) {
                if entry.contains(addr) {
                    debug!(%addr, entry = %line, "Address matched filter entry");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Run both checks. Either match forbids the request (403) even if the
    /// other check failed; otherwise a lookup failure yields a 500.
    pub fn check(&self, host: &str, ip: Ipv4Addr) -> Result<(), ProxyError> {
        let host_result = self.is_host_blocked(host);
        let ip_result = self.is_ip_blocked(&ip.to_string());

        if matches!(host_result, Ok(true)) || matches!(ip_result, Ok(true)) {
            return Err(ProxyError::Forbidden(host.to_string()));
        }

        host_result?;
        ip_result?;
        Ok(())
    }

    /// Read the filter file fresh, one trimmed non-empty entry per line
    fn read_lines(&self) -> Result<Vec<String>, FilterError> {
        let file = File::open(&self.file_path).map_err(|source| {
            warn!(path = %self.file_path.display(), error = %source, "Failed to open filter file");
            FilterError::Open {
                path: self.file_path.clone(),
                source,
            }
        })?;

        let mut lines = Vec::new();
        for chunk in BufReader::new(file).split(b'\n') {
            let chunk = chunk.map_err(|source| FilterError::Open {
                path: self.file_path.clone(),
                source,
            })?;
            let line = String::from_utf8_lossy(&chunk);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }
}
