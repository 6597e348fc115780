//! Configuration types for the connection monitor.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Monitor loop and enforcement daemon settings.
    pub monitor: MonitorConfig,

    /// Active reputation provider.
    pub provider: ProviderConfig,

    /// Addresses exempt from both volume and reputation blocking.
    /// Single IPs or CIDR networks.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Monitor loop and enforcement daemon settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Enforcement daemon host. Local hosts connect without credentials.
    #[serde(default = "default_host")]
    pub host: String,

    /// Enforcement daemon port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Credentials for remote daemons.
    #[serde(default)]
    pub user: String,

    /// Password (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub password: String,

    /// Only connections whose owning process path ends with this name are
    /// monitored. Matched case-insensitively.
    pub process_name: String,

    /// Delay between polling cycles in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-address connection count above which an address is blocked on
    /// volume alone.
    #[serde(default = "default_connection_limit")]
    pub connection_limit: u32,

    /// Name of the daemon filter holding the block ranges.
    pub filter_name: String,
}

impl MonitorConfig {
    /// Local targets get a single uncredentialed connect attempt.
    pub fn is_local(&self) -> bool {
        self.host == "localhost" || self.host == "127.0.0.1"
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7045
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_connection_limit() -> u32 {
    10
}

/// Reputation provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Which classification service to use. Exactly one is active per run.
    pub service: ProviderKind,

    /// API credential (supports ${ENV_VAR} syntax).
    pub api_key: String,

    /// Outbound classification request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Decision boundary for score-based services (getipintel): classify as
    /// VPN when the returned probability exceeds this value.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Directory holding the per-provider verdict caches.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_score_threshold() -> f64 {
    0.99
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

/// The interchangeable reputation services.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    ProxyCheck,
    IpQualityScore,
    Ip2Proxy,
    IpHub,
    FraudLabsPro,
    AbuseIpDb,
    GetIpIntel,
    VpnApi,
    Shodan,
}

impl ProviderKind {
    /// Stable name used for logging and the cache namespace.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::ProxyCheck => "proxycheck",
            ProviderKind::IpQualityScore => "ipqualityscore",
            ProviderKind::Ip2Proxy => "ip2proxy",
            ProviderKind::IpHub => "iphub",
            ProviderKind::FraudLabsPro => "fraudlabspro",
            ProviderKind::AbuseIpDb => "abuseipdb",
            ProviderKind::GetIpIntel => "getipintel",
            ProviderKind::VpnApi => "vpnapi",
            ProviderKind::Shodan => "shodan",
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.monitor.process_name.is_empty() {
            anyhow::bail!("monitor.process_name must not be empty");
        }

        if self.monitor.filter_name.is_empty() {
            anyhow::bail!("monitor.filter_name must not be empty");
        }

        if self.monitor.connection_limit == 0 {
            anyhow::bail!("monitor.connection_limit must be at least 1");
        }

        if self.monitor.poll_interval_ms == 0 {
            anyhow::bail!("monitor.poll_interval_ms must be at least 1");
        }

        if !self.monitor.is_local() && (self.monitor.user.is_empty() || self.monitor.password.is_empty())
        {
            anyhow::bail!(
                "remote host '{}' requires monitor.user and monitor.password",
                self.monitor.host
            );
        }

        if self.provider.api_key.is_empty() {
            anyhow::bail!(
                "provider '{}' is selected but api_key is empty",
                self.provider.service.name()
            );
        }

        if !(self.provider.score_threshold > 0.0 && self.provider.score_threshold <= 1.0) {
            anyhow::bail!(
                "provider.score_threshold ({}) must be in (0, 1]",
                self.provider.score_threshold
            );
        }

        for entry in &self.whitelist {
            if entry.parse::<IpAddr>().is_err() && entry.parse::<IpNet>().is_err() {
                anyhow::bail!("invalid whitelist entry: {}", entry);
            }
        }

        Ok(())
    }

    /// Parse whitelist entries into IpAddr or IpNet.
    pub fn parse_whitelist(&self) -> Vec<WhitelistEntry> {
        self.whitelist
            .iter()
            .filter_map(|s| {
                if let Ok(ip) = s.parse::<IpAddr>() {
                    Some(WhitelistEntry::Single(ip))
                } else if let Ok(net) = s.parse::<IpNet>() {
                    Some(WhitelistEntry::Network(net))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# netwarden configuration

monitor:
  host: localhost              # enforcement daemon; local hosts skip credentials
  port: 7045
  user: ""                     # required for remote hosts
  password: "${NETWARDEN_PASSWORD}"
  process_name: "game_server.exe"  # monitor connections owned by this process
  poll_interval_ms: 5000       # delay between cycles
  connection_limit: 10         # block on volume above this per-address count
  filter_name: "Blocked VPN Addresses"

provider:
  # proxycheck, ipqualityscore, ip2proxy, iphub, fraudlabspro,
  # abuseipdb, getipintel, vpnapi, or shodan
  service: proxycheck
  api_key: "${PROVIDER_API_KEY}"
  timeout_ms: 5000
  score_threshold: 0.99        # getipintel decision boundary
  cache_dir: "."               # per-provider verdict caches live here

# Addresses exempt from all blocking. Single IPs and CIDR notation.
whitelist:
  - "127.0.0.1"
  - "10.0.0.0/8"
"#
        .to_string()
    }
}

/// Parsed whitelist entry.
#[derive(Debug, Clone)]
pub enum WhitelistEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl WhitelistEntry {
    /// Check if an address matches this entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            WhitelistEntry::Single(allowed) => allowed == ip,
            WhitelistEntry::Network(net) => net.contains(ip),
        }
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
