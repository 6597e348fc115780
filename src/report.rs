//! Console report formatting.
//!
//! The report stream is observational: a header per cycle, exactly one line
//! per evaluated address, and a summary footer. Diagnostics go through
//! `tracing`; these lines go to stdout.

use crate::monitor::CycleSummary;
use crate::providers::Verdict;
use chrono::{DateTime, Local};
use std::net::IpAddr;

const RULE: &str = "=======================================";

pub fn cycle_header(now: DateTime<Local>, active: usize, limit: u32) -> String {
    format!(
        "{RULE}\n\
         Current Connections\n\
         {RULE}\n\
         Time: {}\n\
         Active connections: {active}\n\
         Per-address connection limit: {limit}\n\
         {RULE}\n\
         Remote Address (count) - Verdict\n\
         {RULE}",
        now.format("%Y-%m-%d %H:%M:%S"),
    )
}

pub fn protected_line(addr: IpAddr, count: u32) -> String {
    format!("{:<15} ({count}) - Protected whitelisted address.", addr.to_string())
}

pub fn volume_line(addr: IpAddr, count: u32, outcome: &str) -> String {
    format!(
        "{:<15} ({count}) - Exceeded connection limit. {outcome}",
        addr.to_string()
    )
}

pub fn verdict_line(addr: IpAddr, count: u32, verdict: &Verdict, outcome: Option<&str>) -> String {
    let mut line = format!(
        "{:<15} ({count}) - VPN: {:<5} - Country: {}",
        addr.to_string(),
        verdict.is_vpn,
        verdict.country.as_deref().unwrap_or("Unknown"),
    );
    if let Some(outcome) = outcome {
        line.push_str(" - ");
        line.push_str(outcome);
    }
    line
}

pub fn cycle_footer(summary: &CycleSummary) -> String {
    format!(
        "{RULE}\n\
         {} addresses evaluated: {} protected, {} over limit, {} flagged as VPN\n\
         {RULE}",
        summary.evaluated, summary.protected, summary.volume_blocked, summary.vpn_flagged,
    )
}
