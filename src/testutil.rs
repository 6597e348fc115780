//! In-memory fakes for the session and provider seams, shared by tests.

use crate::firewall::{BlockRange, ConnectionRecord, FirewallError, FirewallSession};
use crate::providers::{ReputationProvider, Verdict};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

/// Scripted enforcement daemon holding a snapshot and named filters.
#[derive(Default)]
pub(crate) struct MemoryFirewall {
    snapshot: Mutex<Vec<ConnectionRecord>>,
    filters: Mutex<HashMap<String, Vec<BlockRange>>>,
}

impl MemoryFirewall {
    pub fn with_filter(name: &str, ranges: Vec<BlockRange>) -> Self {
        let firewall = Self::default();
        firewall
            .filters
            .lock()
            .unwrap()
            .insert(name.to_string(), ranges);
        firewall
    }

    pub fn set_snapshot(&self, records: Vec<ConnectionRecord>) {
        *self.snapshot.lock().unwrap() = records;
    }

    pub fn ranges(&self, name: &str) -> Vec<BlockRange> {
        self.filters
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl FirewallSession for MemoryFirewall {
    async fn snapshot(&self) -> Result<Vec<ConnectionRecord>, FirewallError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn filter_ranges(&self, name: &str) -> Result<Option<Vec<BlockRange>>, FirewallError> {
        Ok(self.filters.lock().unwrap().get(name).cloned())
    }

    async fn replace_filter_ranges(
        &self,
        name: &str,
        ranges: &[BlockRange],
    ) -> Result<(), FirewallError> {
        self.filters
            .lock()
            .unwrap()
            .insert(name.to_string(), ranges.to_vec());
        Ok(())
    }
}

/// Provider fake returning scripted verdicts and recording every address it
/// was asked about. Unscripted addresses get the safe default, mirroring a
/// failed lookup.
#[derive(Default)]
pub(crate) struct StaticChecker {
    verdicts: HashMap<IpAddr, Verdict>,
    asked: Mutex<Vec<IpAddr>>,
}

impl StaticChecker {
    pub fn flagging(addrs: &[(&str, &str)]) -> Self {
        let verdicts = addrs
            .iter()
            .map(|(addr, country)| {
                (
                    addr.parse().unwrap(),
                    Verdict::new(true, Some(country.to_string())),
                )
            })
            .collect();
        Self {
            verdicts,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<IpAddr> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReputationProvider for StaticChecker {
    async fn classify(&self, ip: IpAddr) -> Verdict {
        self.asked.lock().unwrap().push(ip);
        self.verdicts.get(&ip).cloned().unwrap_or_else(Verdict::unknown)
    }

    fn name(&self) -> &str {
        "static"
    }
}
