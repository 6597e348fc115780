//! Idempotent block-list synchronization.

use crate::firewall::{BlockRange, FirewallError, FirewallSession};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Result of one `ensure_blocked` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// A degenerate range for the address was appended.
    Added,
    /// An existing range already covers the address; nothing written.
    AlreadyBlocked,
    /// The named filter does not exist on the daemon. Reportable, not fatal.
    FilterMissing,
}

impl fmt::Display for BlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOutcome::Added => write!(f, "Added to the block filter."),
            BlockOutcome::AlreadyBlocked => write!(f, "Already within a blocked range."),
            BlockOutcome::FilterMissing => write!(f, "Block filter not found."),
        }
    }
}

/// Merges flagged addresses into the daemon's named block filter.
///
/// The daemon's rule-set is the only authoritative copy; every call re-reads
/// it. The read-modify-write is guarded by one async mutex so concurrent
/// calls within a cycle cannot lose each other's appends.
pub struct BlockSync {
    session: Arc<dyn FirewallSession>,
    filter_name: String,
    write_lock: Mutex<()>,
}

impl BlockSync {
    pub fn new(session: Arc<dyn FirewallSession>, filter_name: impl Into<String>) -> Self {
        Self {
            session,
            filter_name: filter_name.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Make sure `addr` is covered by the block filter.
    pub async fn ensure_blocked(&self, addr: IpAddr) -> Result<BlockOutcome, FirewallError> {
        let _guard = self.write_lock.lock().await;

        let Some(mut ranges) = self.session.filter_ranges(&self.filter_name).await? else {
            debug!(filter = %self.filter_name, "Block filter missing");
            return Ok(BlockOutcome::FilterMissing);
        };

        if ranges.iter().any(|range| range.contains(&addr)) {
            debug!(ip = %addr, "Address already covered by a block range");
            return Ok(BlockOutcome::AlreadyBlocked);
        }

        ranges.push(BlockRange::single(addr));
        self.session
            .replace_filter_ranges(&self.filter_name, &ranges)
            .await?;

        info!(ip = %addr, filter = %self.filter_name, "Address added to block filter");
        Ok(BlockOutcome::Added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryFirewall;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    const FILTER: &str = "Blocked VPN Addresses";

    fn sync_with(firewall: Arc<MemoryFirewall>) -> BlockSync {
        BlockSync::new(firewall, FILTER)
    }

    #[tokio::test]
    async fn test_added_then_already_blocked() {
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        let sync = sync_with(firewall.clone());

        assert_eq!(
            sync.ensure_blocked(ip("1.2.3.4")).await.unwrap(),
            BlockOutcome::Added
        );
        assert_eq!(
            sync.ensure_blocked(ip("1.2.3.4")).await.unwrap(),
            BlockOutcome::AlreadyBlocked
        );

        let ranges = firewall.ranges(FILTER);
        assert_eq!(ranges, vec![BlockRange::single(ip("1.2.3.4"))]);
    }

    #[tokio::test]
    async fn test_containment_in_wide_range_adds_nothing() {
        let firewall = Arc::new(MemoryFirewall::with_filter(
            FILTER,
            vec![BlockRange::new(ip("10.0.0.1"), ip("10.0.0.5"))],
        ));
        let sync = sync_with(firewall.clone());

        assert_eq!(
            sync.ensure_blocked(ip("10.0.0.3")).await.unwrap(),
            BlockOutcome::AlreadyBlocked
        );
        assert_eq!(firewall.ranges(FILTER).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_filter_is_reported_not_fatal() {
        let firewall = Arc::new(MemoryFirewall::default());
        let sync = sync_with(firewall);

        assert_eq!(
            sync.ensure_blocked(ip("1.2.3.4")).await.unwrap(),
            BlockOutcome::FilterMissing
        );
    }

    #[tokio::test]
    async fn test_concurrent_adds_lose_no_updates() {
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        let sync = Arc::new(sync_with(firewall.clone()));

        let mut handles = Vec::new();
        for i in 1..=8u8 {
            let sync = sync.clone();
            handles.push(tokio::spawn(async move {
                sync.ensure_blocked(ip(&format!("198.51.100.{i}"))).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), BlockOutcome::Added);
        }

        assert_eq!(firewall.ranges(FILTER).len(), 8);
    }

    #[tokio::test]
    async fn test_distinct_addresses_each_get_a_range() {
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        let sync = sync_with(firewall.clone());

        sync.ensure_blocked(ip("1.1.1.1")).await.unwrap();
        sync.ensure_blocked(ip("2.2.2.2")).await.unwrap();

        let ranges = firewall.ranges(FILTER);
        assert_eq!(
            ranges,
            vec![
                BlockRange::single(ip("1.1.1.1")),
                BlockRange::single(ip("2.2.2.2")),
            ]
        );
    }
}
