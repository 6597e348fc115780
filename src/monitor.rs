//! The cyclic monitor loop.
//!
//! One cycle: poll a connection snapshot, filter it to the watched process,
//! count per-address volume, decide each address's disposition, fan out the
//! reputation checks, block offenders, report. Cycles repeat on a fixed
//! interval over a session that stays open for the process lifetime.

use crate::blocker::BlockSync;
use crate::config::Config;
use crate::counter;
use crate::detect::{Disposition, ThresholdDetector};
use crate::firewall::{ConnectionRecord, FirewallError, FirewallSession};
use crate::providers::{ReputationProvider, Verdict};
use crate::report;
use chrono::Local;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Outcome counts for one completed cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Distinct addresses evaluated.
    pub evaluated: usize,
    /// Whitelisted addresses.
    pub protected: usize,
    /// Addresses blocked on volume alone.
    pub volume_blocked: usize,
    /// Addresses dispatched for a reputation check.
    pub checked: usize,
    /// Checked addresses that came back VPN-positive.
    pub vpn_flagged: usize,
}

pub struct Monitor {
    session: Arc<dyn FirewallSession>,
    provider: Arc<dyn ReputationProvider>,
    blocker: Arc<BlockSync>,
    detector: ThresholdDetector,
    process_name: String,
    connection_limit: u32,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(
        session: Arc<dyn FirewallSession>,
        provider: Arc<dyn ReputationProvider>,
        config: &Config,
    ) -> Self {
        let detector =
            ThresholdDetector::new(config.parse_whitelist(), config.monitor.connection_limit);
        let blocker = Arc::new(BlockSync::new(
            session.clone(),
            config.monitor.filter_name.clone(),
        ));

        Self {
            session,
            provider,
            blocker,
            detector,
            process_name: config.monitor.process_name.clone(),
            connection_limit: config.monitor.connection_limit,
            poll_interval: Duration::from_millis(config.monitor.poll_interval_ms),
        }
    }

    /// Run cycles until process termination. A cycle error after the session
    /// was established is logged, not fatal; the next cycle retries.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Polling cycle failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One full cycle: Polling → Evaluating → Reporting.
    pub async fn run_cycle(&self) -> Result<CycleSummary, FirewallError> {
        let snapshot = self.session.snapshot().await?;
        let watched = filter_to_process(&snapshot, &self.process_name);
        let active = watched.iter().filter(|record| !record.closed).count();
        let counts = counter::count(&watched);

        debug!(
            total = snapshot.len(),
            watched = watched.len(),
            distinct = counts.len(),
            "Snapshot polled"
        );

        println!(
            "{}",
            report::cycle_header(Local::now(), active, self.connection_limit)
        );

        let mut summary = CycleSummary {
            evaluated: counts.len(),
            ..CycleSummary::default()
        };

        // Whitelist and volume outcomes are decided and reported in snapshot
        // order; reputation checks fan out and report as they complete.
        let mut checks: JoinSet<(IpAddr, u32, Verdict, Option<String>)> = JoinSet::new();

        for (addr, count) in counts.iter() {
            match self.detector.classify(&addr, count) {
                Disposition::Protected => {
                    summary.protected += 1;
                    println!("{}", report::protected_line(addr, count));
                }
                Disposition::VolumeExceeded => {
                    summary.volume_blocked += 1;
                    let outcome = self.block_outcome_text(addr).await;
                    println!("{}", report::volume_line(addr, count, &outcome));
                }
                Disposition::NeedsCheck => {
                    summary.checked += 1;
                    let provider = self.provider.clone();
                    let blocker = self.blocker.clone();
                    checks.spawn(async move {
                        let verdict = provider.classify(addr).await;
                        let outcome = if verdict.is_vpn {
                            Some(match blocker.ensure_blocked(addr).await {
                                Ok(outcome) => outcome.to_string(),
                                Err(e) => {
                                    warn!(ip = %addr, error = %e, "Block attempt failed");
                                    format!("Block attempt failed: {e}")
                                }
                            })
                        } else {
                            None
                        };
                        (addr, count, verdict, outcome)
                    });
                }
            }
        }

        // Fan-in: the cycle does not advance until every dispatched check
        // lands. A panicked task loses only its own address's line.
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((addr, count, verdict, outcome)) => {
                    if verdict.is_vpn {
                        summary.vpn_flagged += 1;
                    }
                    println!(
                        "{}",
                        report::verdict_line(addr, count, &verdict, outcome.as_deref())
                    );
                }
                Err(e) => warn!(error = %e, "Reputation check task failed"),
            }
        }

        println!("{}", report::cycle_footer(&summary));
        Ok(summary)
    }

    async fn block_outcome_text(&self, addr: IpAddr) -> String {
        match self.blocker.ensure_blocked(addr).await {
            Ok(outcome) => outcome.to_string(),
            Err(e) => {
                warn!(ip = %addr, error = %e, "Block attempt failed");
                format!("Block attempt failed: {e}")
            }
        }
    }
}

/// Keep only connections owned by the watched process, by case-insensitive
/// path suffix.
fn filter_to_process(snapshot: &[ConnectionRecord], process_name: &str) -> Vec<ConnectionRecord> {
    let suffix = process_name.to_lowercase();
    snapshot
        .iter()
        .filter(|record| record.process_path.to_lowercase().ends_with(&suffix))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::BlockRange;
    use crate::testutil::{MemoryFirewall, StaticChecker};

    const FILTER: &str = "Blocked VPN Addresses";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn record(remote: &str, path: &str) -> ConnectionRecord {
        ConnectionRecord {
            remote: remote.parse().unwrap(),
            process_path: path.to_string(),
            closed: false,
        }
    }

    fn game_record(remote: &str) -> ConnectionRecord {
        record(remote, "C:\\Servers\\game_server.exe")
    }

    fn config_with(limit: u32, whitelist: &[&str]) -> Config {
        let yaml = format!(
            r#"
monitor:
  process_name: "game_server.exe"
  connection_limit: {limit}
  filter_name: "{FILTER}"
provider:
  service: proxycheck
  api_key: "test-key"
whitelist: [{}]
"#,
            whitelist
                .iter()
                .map(|s| format!("\"{s}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn monitor(
        firewall: Arc<MemoryFirewall>,
        checker: Arc<StaticChecker>,
        config: &Config,
    ) -> Monitor {
        Monitor::new(firewall, checker, config)
    }

    #[test]
    fn test_filter_to_process_matches_suffix_case_insensitively() {
        let snapshot = vec![
            record("1.1.1.1", "C:\\Servers\\Game_Server.EXE"),
            record("2.2.2.2", "/usr/bin/sshd"),
            record("3.3.3.3", "/srv/game_server.exe"),
        ];

        let watched = filter_to_process(&snapshot, "game_server.exe");
        assert_eq!(watched.len(), 2);
        assert_eq!(watched[0].remote, ip("1.1.1.1"));
        assert_eq!(watched[1].remote, ip("3.3.3.3"));
    }

    #[tokio::test]
    async fn test_end_to_end_volume_and_reputation_blocking() {
        // A×6 over the limit of 5, B×1 flagged by the provider.
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        let mut snapshot: Vec<ConnectionRecord> =
            (0..6).map(|_| game_record("203.0.113.1")).collect();
        snapshot.push(game_record("203.0.113.2"));
        firewall.set_snapshot(snapshot);

        let checker = Arc::new(StaticChecker::flagging(&[("203.0.113.2", "US")]));
        let config = config_with(5, &[]);
        let summary = monitor(firewall.clone(), checker.clone(), &config)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.volume_blocked, 1);
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.vpn_flagged, 1);

        let ranges = firewall.ranges(FILTER);
        assert_eq!(ranges.len(), 2);
        assert!(ranges.contains(&BlockRange::single(ip("203.0.113.1"))));
        assert!(ranges.contains(&BlockRange::single(ip("203.0.113.2"))));
    }

    #[tokio::test]
    async fn test_over_limit_address_is_never_reputation_checked() {
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        firewall.set_snapshot((0..7).map(|_| game_record("203.0.113.1")).collect());

        let checker = Arc::new(StaticChecker::default());
        let config = config_with(5, &[]);
        monitor(firewall, checker.clone(), &config)
            .run_cycle()
            .await
            .unwrap();

        assert!(checker.asked().is_empty());
    }

    #[tokio::test]
    async fn test_whitelisted_address_is_protected_from_everything() {
        // Over limit and VPN-positive, but whitelisted: no block, no check.
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        firewall.set_snapshot((0..9).map(|_| game_record("203.0.113.1")).collect());

        let checker = Arc::new(StaticChecker::flagging(&[("203.0.113.1", "US")]));
        let config = config_with(5, &["203.0.113.1"]);
        let summary = monitor(firewall.clone(), checker.clone(), &config)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(summary.protected, 1);
        assert_eq!(summary.volume_blocked, 0);
        assert!(checker.asked().is_empty());
        assert!(firewall.ranges(FILTER).is_empty());
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_affect_siblings() {
        // 203.0.113.9 is unscripted: the checker degrades it to the safe
        // default, the flagged sibling still gets blocked.
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        firewall.set_snapshot(vec![
            game_record("203.0.113.9"),
            game_record("203.0.113.2"),
        ]);

        let checker = Arc::new(StaticChecker::flagging(&[("203.0.113.2", "US")]));
        let config = config_with(5, &[]);
        let summary = monitor(firewall.clone(), checker, &config)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(summary.checked, 2);
        assert_eq!(summary.vpn_flagged, 1);
        assert_eq!(
            firewall.ranges(FILTER),
            vec![BlockRange::single(ip("203.0.113.2"))]
        );
    }

    #[tokio::test]
    async fn test_repeated_cycles_do_not_duplicate_ranges() {
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        firewall.set_snapshot(vec![game_record("203.0.113.2")]);

        let checker = Arc::new(StaticChecker::flagging(&[("203.0.113.2", "US")]));
        let config = config_with(5, &[]);
        let monitor = monitor(firewall.clone(), checker, &config);

        monitor.run_cycle().await.unwrap();
        monitor.run_cycle().await.unwrap();

        assert_eq!(firewall.ranges(FILTER).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_filter_cycle_still_completes() {
        let firewall = Arc::new(MemoryFirewall::default());
        firewall.set_snapshot((0..7).map(|_| game_record("203.0.113.1")).collect());

        let checker = Arc::new(StaticChecker::default());
        let config = config_with(5, &[]);
        let summary = monitor(firewall, checker, &config).run_cycle().await.unwrap();

        // The block attempt reports FilterMissing; the cycle is not aborted.
        assert_eq!(summary.volume_blocked, 1);
    }

    #[tokio::test]
    async fn test_connections_of_other_processes_are_ignored() {
        let firewall = Arc::new(MemoryFirewall::with_filter(FILTER, vec![]));
        firewall.set_snapshot(vec![
            record("203.0.113.1", "/usr/bin/sshd"),
            game_record("203.0.113.2"),
        ]);

        let checker = Arc::new(StaticChecker::default());
        let config = config_with(5, &[]);
        let summary = monitor(firewall, checker.clone(), &config)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(summary.evaluated, 1);
        assert_eq!(checker.asked(), vec![ip("203.0.113.2")]);
    }
}
