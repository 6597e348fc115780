//! Per-service endpoint adapters.
//!
//! Each adapter knows two things about its service: how to build the
//! classification request and how to read the answer. The shapes vary:
//! boolean flags, probability scores, tag lists. All collapse into the
//! canonical [`Verdict`].

use super::{ProviderEndpoint, ProviderError, Verdict};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::net::IpAddr;

/// Treat missing or empty country fields as unknown.
fn country_opt(value: Option<&str>) -> Option<String> {
    match value {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    }
}

fn parse_json(body: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse(format!("not JSON: {e}")))
}

/// proxycheck.io: response keyed by the queried address.
pub struct ProxyCheck;

impl ProviderEndpoint for ProxyCheck {
    fn name(&self) -> &'static str {
        "proxycheck"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client.get(format!(
            "https://proxycheck.io/v2/{ip}?key={api_key}&vpn=1&asn=1"
        ))
    }

    fn parse(&self, ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let json = parse_json(body)?;
        let key = ip.to_string();
        let node = json
            .get(key.as_str())
            .ok_or_else(|| ProviderError::Parse(format!("no entry for {ip}")))?;

        let is_vpn = node.get("proxy").and_then(Value::as_str) == Some("yes");
        let country = country_opt(node.get("isocode").and_then(Value::as_str));
        Ok(Verdict::new(is_vpn, country))
    }
}

/// ipqualityscore.com: boolean `vpn`/`proxy` flags.
pub struct IpQualityScore;

#[derive(Debug, Deserialize)]
struct IpQualityScoreResponse {
    #[serde(default)]
    vpn: bool,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    country_code: Option<String>,
}

impl ProviderEndpoint for IpQualityScore {
    fn name(&self) -> &'static str {
        "ipqualityscore"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client.get(format!(
            "https://ipqualityscore.com/api/json/ip/{api_key}/{ip}"
        ))
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let response: IpQualityScoreResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(Verdict::new(
            response.vpn || response.proxy,
            country_opt(response.country_code.as_deref()),
        ))
    }
}

/// ip2proxy.com: `isProxy` yes/no string.
pub struct Ip2Proxy;

impl ProviderEndpoint for Ip2Proxy {
    fn name(&self) -> &'static str {
        "ip2proxy"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client.get(format!(
            "https://api.ip2proxy.com/?ip={ip}&key={api_key}&package=PX2"
        ))
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let json = parse_json(body)?;
        let is_vpn = json.get("isProxy").and_then(Value::as_str) == Some("YES");
        let country = country_opt(json.get("countryCode").and_then(Value::as_str));
        Ok(Verdict::new(is_vpn, country))
    }
}

/// iphub.info: numeric `block` level, key goes in a header.
pub struct IpHub;

#[derive(Debug, Deserialize)]
struct IpHubResponse {
    block: i64,
    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,
}

impl ProviderEndpoint for IpHub {
    fn name(&self) -> &'static str {
        "iphub"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client
            .get(format!("https://v2.api.iphub.info/ip/{ip}"))
            .header("X-Key", api_key)
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let response: IpHubResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(Verdict::new(
            response.block == 1,
            country_opt(response.country_code.as_deref()),
        ))
    }
}

/// fraudlabspro.com: `is_proxy` yes/no string.
pub struct FraudLabsPro;

impl ProviderEndpoint for FraudLabsPro {
    fn name(&self) -> &'static str {
        "fraudlabspro"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client.get(format!(
            "https://api.fraudlabspro.com/v1/ip?key={api_key}&ip={ip}&format=json"
        ))
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let json = parse_json(body)?;
        let is_vpn = json.get("is_proxy").and_then(Value::as_str) == Some("YES");
        let country = country_opt(json.get("country_code").and_then(Value::as_str));
        Ok(Verdict::new(is_vpn, country))
    }
}

/// abuseipdb.com: public-proxy flag inside a `data` envelope, key header.
pub struct AbuseIpDb;

#[derive(Debug, Deserialize)]
struct AbuseIpDbResponse {
    data: AbuseIpDbData,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbData {
    #[serde(rename = "isPublicProxy", default)]
    is_public_proxy: bool,

    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,
}

impl ProviderEndpoint for AbuseIpDb {
    fn name(&self) -> &'static str {
        "abuseipdb"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client
            .get(format!(
                "https://api.abuseipdb.com/api/v2/check?ipAddress={ip}&maxAgeInDays=30"
            ))
            .header("Key", api_key)
            .header("Accept", "application/json")
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let response: AbuseIpDbResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(Verdict::new(
            response.data.is_public_proxy,
            country_opt(response.data.country_code.as_deref()),
        ))
    }
}

/// getipintel.net: probability score against an operator-chosen threshold.
/// The service reports no country.
pub struct GetIpIntel {
    pub threshold: f64,
}

impl ProviderEndpoint for GetIpIntel {
    fn name(&self) -> &'static str {
        "getipintel"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client.get(format!(
            "https://check.getipintel.net/check.php?ip={ip}&contact={api_key}&format=json"
        ))
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let json = parse_json(body)?;
        // The score arrives as a number or as a quoted string.
        let score = match json.get("result") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| ProviderError::Parse("missing result score".to_string()))?;

        Ok(Verdict::new(score > self.threshold, None))
    }
}

/// vpnapi.io: security flags plus location envelope.
pub struct VpnApi;

#[derive(Debug, Deserialize)]
struct VpnApiResponse {
    security: VpnApiSecurity,
    #[serde(default)]
    location: Option<VpnApiLocation>,
}

#[derive(Debug, Deserialize)]
struct VpnApiSecurity {
    #[serde(default)]
    vpn: bool,
    #[serde(default)]
    proxy: bool,
}

#[derive(Debug, Deserialize)]
struct VpnApiLocation {
    #[serde(default)]
    country_code: Option<String>,
}

impl ProviderEndpoint for VpnApi {
    fn name(&self) -> &'static str {
        "vpnapi"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client.get(format!("https://vpnapi.io/api/{ip}?key={api_key}"))
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let response: VpnApiResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        let country = response
            .location
            .and_then(|l| country_opt(l.country_code.as_deref()));
        Ok(Verdict::new(
            response.security.vpn || response.security.proxy,
            country,
        ))
    }
}

/// shodan.io: tag-list membership.
pub struct Shodan;

impl ProviderEndpoint for Shodan {
    fn name(&self) -> &'static str {
        "shodan"
    }

    fn request(&self, client: &Client, ip: IpAddr, api_key: &str) -> RequestBuilder {
        client.get(format!("https://api.shodan.io/shodan/host/{ip}?key={api_key}"))
    }

    fn parse(&self, _ip: IpAddr, body: &str) -> Result<Verdict, ProviderError> {
        let json = parse_json(body)?;
        // Hosts without tags simply aren't flagged.
        let is_vpn = json
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().any(|t| t.as_str() == Some("vpn")))
            .unwrap_or(false);
        let country = country_opt(json.get("country_code").and_then(Value::as_str));
        Ok(Verdict::new(is_vpn, country))
    }
}
