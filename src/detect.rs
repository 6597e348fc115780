//! Per-address threshold detection.

use crate::config::WhitelistEntry;
use std::net::IpAddr;

/// What to do with an address this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Whitelisted: report only, no side effect.
    Protected,
    /// Over the connection limit: block immediately, skip the reputation
    /// check for this cycle.
    VolumeExceeded,
    /// Dispatch a reputation check.
    NeedsCheck,
}

/// Applies whitelist and volume rules to each address of a cycle.
pub struct ThresholdDetector {
    whitelist: Vec<WhitelistEntry>,
    connection_limit: u32,
}

impl ThresholdDetector {
    pub fn new(whitelist: Vec<WhitelistEntry>, connection_limit: u32) -> Self {
        Self {
            whitelist,
            connection_limit,
        }
    }

    fn is_whitelisted(&self, addr: &IpAddr) -> bool {
        self.whitelist.iter().any(|entry| entry.contains(addr))
    }

    /// Decide an address's disposition from its per-cycle count.
    ///
    /// Whitelist wins over everything; the volume rule wins over the
    /// reputation check, so an over-limit address is never dispatched.
    pub fn classify(&self, addr: &IpAddr, count: u32) -> Disposition {
        if self.is_whitelisted(addr) {
            Disposition::Protected
        } else if count > self.connection_limit {
            Disposition::VolumeExceeded
        } else {
            Disposition::NeedsCheck
        }
    }
}
