//! Reputation providers.
//!
//! Nine interchangeable classification services share one engine
//! ([`checker::CachedProvider`]): consult the provider's durable cache, and
//! on a miss issue a single HTTP request whose URL and response shape are
//! supplied by a small per-service [`ProviderEndpoint`] adapter.

pub mod adapters;
pub mod checker;

use crate::config::ProviderKind;
use async_trait::async_trait;
use std::net::IpAddr;

/// Canonical classification of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the address is a VPN/proxy endpoint.
    pub is_vpn: bool,
    /// ISO country code when the service reports one.
    pub country: Option<String>,
}

impl Verdict {
    /// The safe default returned when a provider fails: not a VPN, country
    /// unknown.
    pub fn unknown() -> Self {
        Self {
            is_vpn: false,
            country: None,
        }
    }

    pub fn new(is_vpn: bool, country: Option<String>) -> Self {
        Self { is_vpn, country }
    }
}

/// Error from a reputation service call.
#[derive(Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// Timeout.
    Timeout,
    /// Rate limited.
    RateLimited,
    /// Non-success status.
    Status(reqwest::StatusCode),
    /// Malformed or unexpected response body.
    Parse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::Timeout => write!(f, "Request timed out"),
            ProviderError::RateLimited => write!(f, "Rate limited"),
            ProviderError::Status(code) => write!(f, "HTTP {}", code),
            ProviderError::Parse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

/// Classification capability consumed by the monitor loop.
///
/// Implementations never fail outward: transport and parse errors degrade
/// to [`Verdict::unknown`] at this boundary so a provider outage cannot
/// stall a cycle.
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Classify an address, serving from cache when fresh.
    async fn classify(&self, ip: IpAddr) -> Verdict;

    /// Provider name for logging and reporting.
    fn name(&self) -> &str;
}

/// Per-service adapter: how to ask the service about an address and how to
/// read its answer. Everything else (caching, timeouts, error policy) lives
/// in the shared engine.
pub trait ProviderEndpoint: Send + Sync {
    /// Stable service name; doubles as the cache namespace.
    fn name(&self) -> &'static str;

    /// Build the classification request for `ip`.
    fn request(&self, client: &reqwest::Client, ip: IpAddr, api_key: &str)
        -> reqwest::RequestBuilder;

    /// Translate a response body into the canonical verdict.
    fn parse(&self, ip: IpAddr, body: &str) -> Result<Verdict, ProviderError>;
}

/// Construct the adapter for the configured service.
pub fn endpoint_for(kind: ProviderKind, score_threshold: f64) -> Box<dyn ProviderEndpoint> {
    match kind {
        ProviderKind::ProxyCheck => Box::new(adapters::ProxyCheck),
        ProviderKind::IpQualityScore => Box::new(adapters::IpQualityScore),
        ProviderKind::Ip2Proxy => Box::new(adapters::Ip2Proxy),
        ProviderKind::IpHub => Box::new(adapters::IpHub),
        ProviderKind::FraudLabsPro => Box::new(adapters::FraudLabsPro),
        ProviderKind::AbuseIpDb => Box::new(adapters::AbuseIpDb),
        ProviderKind::GetIpIntel => Box::new(adapters::GetIpIntel {
            threshold: score_threshold,
        }),
        ProviderKind::VpnApi => Box::new(adapters::VpnApi),
        ProviderKind::Shodan => Box::new(adapters::Shodan),
    }
}
