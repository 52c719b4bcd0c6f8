//! Geo-IP based locale hint.
//!
//! Only consulted when enabled in configuration. Lookups go to an
//! ip-api.com compatible endpoint (`GET {base}/{ip}?fields=status,countryCode`)
//! with a short client timeout. Answers are kept in a bounded LRU cache per
//! address; transport errors are not cached so a flaky lookup can be retried
//! on the next request.

use crate::i18n::Language;
use anyhow::{Context, Result};
use serde::Deserialize;
use lru::LruCache;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

/// Map an ISO 3166-1 alpha-2 country code to the preferred interface language.
pub fn country_to_language(country: &str) -> Option<Language> {
    match country.trim().to_ascii_uppercase().as_str() {
        "RU" => Some(Language::RUSSIAN),
        // Lithuanian and Estonian visitors are served the Latvian site
        "LV" | "LT" | "EE" => Some(Language::LATVIAN),
        "US" | "GB" | "AU" | "CA" | "IE" | "NZ" => Some(Language::ENGLISH),
        _ => None,
    }
}

/// Whether an address is routable on the public internet.
///
/// Loopback, private, link-local, CGNAT, documentation and unspecified
/// addresses never leave the process for a lookup.
pub fn is_public_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            let shared_cgnat = octets[0] == 100 && (octets[1] & 0xc0) == 64;
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || shared_cgnat)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_public_address(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            let unique_local = (first & 0xfe00) == 0xfc00;
            let link_local = (first & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

pub struct GeoIpLocator {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<LruCache<IpAddr, Option<Language>>>,
}

impl GeoIpLocator {
    /// `cache_size` of zero is treated as one.
    pub fn new(base_url: &str, timeout: Duration, cache_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build geo-IP HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    /// Best-effort language hint for a client address.
    ///
    /// Never fails: non-public addresses, unknown countries and lookup errors
    /// all yield `None`.
    pub async fn locate(&self, ip: IpAddr) -> Option<Language> {
        if !is_public_address(ip) {
            return None;
        }

        if let Some(cached) = self.cache.lock().await.get(&ip) {
            return *cached;
        }

        match self.lookup_country(ip).await {
            Ok(country) => {
                let language = country.as_deref().and_then(country_to_language);
                self.cache.lock().await.put(ip, language);
                language
            }
            Err(e) => {
                debug!("Geo-IP lookup for {} failed: {:#}", ip, e);
                None
            }
        }
    }

    async fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>> {
        let url = format!("{}/{}", self.base_url, ip);
        let response = self
            .client
            .get(&url)
            .query(&[("fields", "status,countryCode")])
            .send()
            .await
            .context("Failed to send geo-IP request")?;

        if !response.status().is_success() {
            anyhow::bail!("Geo-IP API error ({})", response.status());
        }

        let body: LookupResponse = response
            .json()
            .await
            .context("Failed to parse geo-IP response")?;

        if body.status != "success" {
            return Ok(None);
        }

        Ok(body.country_code)
    }

    #[cfg(test)]
    async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn test_country_table() {
        assert_eq!(country_to_language("RU"), Some(Language::RUSSIAN));
        assert_eq!(country_to_language("lt"), Some(Language::LATVIAN));
        assert_eq!(country_to_language("EE"), Some(Language::LATVIAN));
        assert_eq!(country_to_language("GB"), Some(Language::ENGLISH));
        assert_eq!(country_to_language("DE"), None);
    }

    #[test]
    fn test_is_public_address() {
        assert!(is_public_address("8.8.8.8".parse().unwrap()));
        assert!(is_public_address("2a00:1450:4001::1".parse().unwrap()));

        assert!(!is_public_address("127.0.0.1".parse().unwrap()));
        assert!(!is_public_address("10.1.2.3".parse().unwrap()));
        assert!(!is_public_address("192.168.0.10".parse().unwrap()));
        assert!(!is_public_address("100.64.0.1".parse().unwrap()));
        assert!(!is_public_address("::1".parse().unwrap()));
        assert!(!is_public_address("fd00::1".parse().unwrap()));
        assert!(!is_public_address("fe80::1".parse().unwrap()));
        assert!(!is_public_address("::ffff:127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_locate_maps_country_and_caches() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/81.198.0.1"))
            .and(query_param("fields", "status,countryCode"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "success", "countryCode": "LV"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let locator = GeoIpLocator::new(
            &format!("{}/json", mock_server.uri()),
            Duration::from_secs(2),
            16,
        )
        .expect("Should build locator");

        let ip: IpAddr = "81.198.0.1".parse().unwrap();
        assert_eq!(locator.locate(ip).await, Some(Language::LATVIAN));
        // Second call is served from the cache (mock expects exactly one hit)
        assert_eq!(locator.locate(ip).await, Some(Language::LATVIAN));
        assert_eq!(locator.cached_entries().await, 1);
    }

    #[tokio::test]
    async fn test_locate_skips_private_addresses() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let locator =
            GeoIpLocator::new(&mock_server.uri(), Duration::from_secs(2), 16).expect("locator");

        assert_eq!(locator.locate("192.168.1.5".parse().unwrap()).await, None);
        assert_eq!(locator.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_locate_swallows_server_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let locator =
            GeoIpLocator::new(&mock_server.uri(), Duration::from_secs(2), 16).expect("locator");

        assert_eq!(locator.locate("8.8.8.8".parse().unwrap()).await, None);
        // Errors are not cached
        assert_eq!(locator.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_locate_times_out_quickly() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "success", "countryCode": "US"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let locator =
            GeoIpLocator::new(&mock_server.uri(), Duration::from_millis(50), 16).expect("locator");

        assert_eq!(locator.locate("8.8.4.4".parse().unwrap()).await, None);
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "success", "countryCode": "RU"})),
            )
            .expect(4)
            .mount(&mock_server)
            .await;

        let locator =
            GeoIpLocator::new(&mock_server.uri(), Duration::from_secs(2), 2).expect("locator");

        for ip in ["8.8.8.8", "8.8.4.4", "1.1.1.1"] {
            assert_eq!(locator.locate(ip.parse().unwrap()).await, Some(Language::RUSSIAN));
        }
        assert_eq!(locator.cached_entries().await, 2);

        // The oldest address was evicted and is looked up again
        locator.locate("8.8.8.8".parse().unwrap()).await;
    }
}
