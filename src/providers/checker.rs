//! The shared cache-then-classify engine.

use super::{ProviderEndpoint, ProviderError, ReputationProvider, Verdict};
use crate::cache::ReputationCache;
use crate::config::ProviderConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Wraps one [`ProviderEndpoint`] with the behavior every service shares:
/// durable caching, a bounded outbound request, and degradation to the safe
/// default verdict on any failure.
pub struct CachedProvider {
    endpoint: Box<dyn ProviderEndpoint>,
    client: Client,
    api_key: String,
    cache: Option<ReputationCache>,
}

impl CachedProvider {
    /// Build the engine for the configured service.
    ///
    /// A cache that fails to open disables persistence for this provider but
    /// not classification; the degradation is logged once here.
    pub fn new(config: &ProviderConfig) -> Self {
        let endpoint = super::endpoint_for(config.service, config.score_threshold);

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        let cache = match ReputationCache::open(&config.cache_dir, endpoint.name()) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(
                    provider = endpoint.name(),
                    error = %e,
                    "Verdict cache unavailable, running without persistence"
                );
                None
            }
        };

        Self {
            endpoint,
            client,
            api_key: config.api_key.clone(),
            cache,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_parts(
        endpoint: Box<dyn ProviderEndpoint>,
        client: Client,
        api_key: String,
        cache: Option<ReputationCache>,
    ) -> Self {
        Self {
            endpoint,
            client,
            api_key,
            cache,
        }
    }

    async fn fetch(&self, ip: IpAddr) -> Result<Verdict, ProviderError> {
        let response = self
            .endpoint
            .request(&self.client, ip, &self.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status()));
        }

        let body = response.text().await?;
        self.endpoint.parse(ip, &body)
    }
}

#[async_trait]
impl ReputationProvider for CachedProvider {
    async fn classify(&self, ip: IpAddr) -> Verdict {
        if let Some(cache) = &self.cache {
            match cache.lookup(&ip) {
                Ok(Some(record)) => {
                    debug!(provider = self.name(), ip = %ip, "Verdict cache hit");
                    return Verdict::new(record.is_vpn, record.country);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(provider = self.name(), ip = %ip, error = %e, "Cache lookup failed");
                }
            }
        }

        match self.fetch(ip).await {
            Ok(verdict) => {
                debug!(
                    provider = self.name(),
                    ip = %ip,
                    is_vpn = verdict.is_vpn,
                    country = verdict.country.as_deref().unwrap_or("Unknown"),
                    "Classification complete"
                );

                if let Some(cache) = &self.cache {
                    if let Err(e) =
                        cache.store(&ip, verdict.is_vpn, verdict.country.as_deref(), Utc::now())
                    {
                        warn!(provider = self.name(), ip = %ip, error = %e, "Cache store failed");
                    }
                }

                verdict
            }
            Err(e) => {
                warn!(provider = self.name(), ip = %ip, error = %e, "Classification failed");
                Verdict::unknown()
            }
        }
    }

    fn name(&self) -> &str {
        self.endpoint.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    /// Endpoint whose request would hit an unroutable address; used to prove
    /// the engine never reaches the network on a cache hit and degrades
    /// safely on a miss.
    struct UnreachableEndpoint;

    impl ProviderEndpoint for UnreachableEndpoint {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn request(
            &self,
            client: &reqwest::Client,
            ip: IpAddr,
            _api_key: &str,
        ) -> reqwest::RequestBuilder {
            // TEST-NET-1 with a short client timeout: guaranteed failure.
            client.get(format!("http://192.0.2.1:9/{ip}"))
        }

        fn parse(&self, _ip: IpAddr, _body: &str) -> Result<Verdict, ProviderError> {
            unreachable!("request never succeeds")
        }
    }

    fn short_timeout_client() -> Client {
        Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap()
    }

    fn engine(cache: Option<ReputationCache>) -> CachedProvider {
        CachedProvider::with_parts(
            Box::new(UnreachableEndpoint),
            short_timeout_client(),
            "key".to_string(),
            cache,
        )
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_skips_the_network() {
        let cache = ReputationCache::open_in_memory().unwrap();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        cache.store(&ip, true, Some("NL"), Utc::now()).unwrap();

        let verdict = engine(Some(cache)).classify(ip).await;
        assert!(verdict.is_vpn);
        assert_eq!(verdict.country.as_deref(), Some("NL"));
    }

    #[tokio::test]
    async fn test_stale_entry_falls_through_and_degrades() {
        let cache = ReputationCache::open_in_memory().unwrap();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let stale = Utc::now() - ChronoDuration::days(31);
        cache.store(&ip, true, Some("NL"), stale).unwrap();

        // Stale entry forces a fetch; the fetch fails; safe default.
        let verdict = engine(Some(cache)).classify(ip).await;
        assert_eq!(verdict, Verdict::unknown());
    }

    #[tokio::test]
    async fn test_transport_failure_degrades_to_unknown() {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let verdict = engine(Some(ReputationCache::open_in_memory().unwrap()))
            .classify(ip)
            .await;
        assert_eq!(verdict, Verdict::unknown());
    }

    #[tokio::test]
    async fn test_classification_works_without_a_cache() {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let verdict = engine(None).classify(ip).await;
        assert_eq!(verdict, Verdict::unknown());
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_the_cache() {
        let cache = ReputationCache::open_in_memory().unwrap();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        let provider = engine(Some(cache));
        provider.classify(ip).await;

        // The failed fetch must not have stored the default verdict.
        assert!(provider.cache.as_ref().unwrap().is_empty().unwrap());
    }
}
