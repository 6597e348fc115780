//! Connection monitor with VPN/proxy blocking.
//!
//! Watches live connections owned by a target process through an external
//! enforcement daemon, counts per-remote-address volume each polling cycle,
//! classifies remote addresses through a configurable reputation service,
//! and reconciles offenders into the daemon's block filter.
//!
//! # Features
//!
//! - **Volume blocking** - Addresses over a per-cycle connection limit are
//!   blocked immediately
//! - **Nine reputation services** - proxycheck, ipqualityscore, ip2proxy,
//!   iphub, fraudlabspro, abuseipdb, getipintel, vpnapi, shodan
//! - **Durable verdict caching** - One self-creating SQLite store per
//!   provider, verdicts fresh for 30 days
//! - **Idempotent block sync** - Range-aware containment checks keep
//!   repeated cycles from duplicating block entries
//! - **Whitelisting** - Single IPs or CIDR networks exempt from all blocking
//!
//! # Example Configuration
//!
//! ```yaml
//! monitor:
//!   host: localhost
//!   process_name: "game_server.exe"
//!   connection_limit: 10
//!   filter_name: "Blocked VPN Addresses"
//!
//! provider:
//!   service: proxycheck
//!   api_key: "${PROVIDER_API_KEY}"
//!
//! whitelist:
//!   - "127.0.0.1"
//!   - "10.0.0.0/8"
//! ```

pub mod blocker;
pub mod cache;
pub mod config;
pub mod counter;
pub mod detect;
pub mod firewall;
pub mod monitor;
pub mod providers;
pub mod report;
pub mod rpc;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use monitor::Monitor;
