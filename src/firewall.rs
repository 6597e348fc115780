//! Boundary to the external enforcement daemon.
//!
//! The daemon owns the live connection table and the named block filters;
//! everything the rest of the crate needs from it fits behind
//! [`FirewallSession`]: fetch a connection snapshot, read a filter's ranges,
//! replace a filter's ranges. Concrete transports implement the trait (see
//! [`crate::rpc`] for the TCP adapter).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

/// One observed connection in a snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionRecord {
    /// Remote endpoint address.
    pub remote: IpAddr,
    /// Filesystem path of the process that owns the connection.
    pub process_path: String,
    /// Whether the connection has already been closed.
    #[serde(default)]
    pub closed: bool,
}

/// A contiguous address range held by a block filter.
///
/// A single blocked address is the degenerate range `(addr, addr)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl BlockRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Self {
        Self { start, end }
    }

    /// Degenerate range covering exactly one address.
    pub fn single(addr: IpAddr) -> Self {
        Self { start: addr, end: addr }
    }

    /// Per-byte containment test: every address component must lie within
    /// the corresponding components of `start` and `end`. Addresses of a
    /// different family than the range are never contained.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        fn octets(addr: &IpAddr) -> Vec<u8> {
            match addr {
                IpAddr::V4(v4) => v4.octets().to_vec(),
                IpAddr::V6(v6) => v6.octets().to_vec(),
            }
        }

        let start = octets(&self.start);
        let end = octets(&self.end);
        let ip = octets(addr);

        if start.len() != ip.len() || end.len() != ip.len() {
            return false;
        }

        ip.iter()
            .zip(start.iter().zip(end.iter()))
            .all(|(b, (lo, hi))| b >= lo && b <= hi)
    }
}

/// Errors from the enforcement daemon boundary.
#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session with the enforcement daemon.
///
/// The daemon's rule-set is the single source of truth; implementations must
/// not cache filter contents across calls.
#[async_trait]
pub trait FirewallSession: Send + Sync {
    /// Fetch a point-in-time ordered snapshot of all live connections.
    async fn snapshot(&self) -> Result<Vec<ConnectionRecord>, FirewallError>;

    /// Read the address ranges of the named filter, or `None` if no filter
    /// with that name exists.
    async fn filter_ranges(&self, name: &str) -> Result<Option<Vec<BlockRange>>, FirewallError>;

    /// Replace the named filter's ranges with `ranges`.
    async fn replace_filter_ranges(
        &self,
        name: &str,
        ranges: &[BlockRange],
    ) -> Result<(), FirewallError>;
}
