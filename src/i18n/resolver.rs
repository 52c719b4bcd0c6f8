//! Per-request locale resolution.
//!
//! Priority, first match wins: explicit `lang` query parameter, the locale
//! stored in the session, the `Accept-Language` header (when enabled), a
//! geo-IP hint (when enabled), and finally the configured default.

use crate::i18n::{GeoIpLocator, Language};
use std::net::IpAddr;

/// The request facts the resolver looks at.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocaleRequest<'a> {
    pub query: Option<&'a str>,
    pub session: Option<&'a str>,
    pub accept_language: Option<&'a str>,
    pub client_ip: Option<IpAddr>,
}

pub struct LocaleResolver {
    default: Language,
    accept_language: bool,
    geoip: Option<GeoIpLocator>,
}

impl LocaleResolver {
    pub fn new(default: Language) -> Self {
        Self {
            default,
            accept_language: false,
            geoip: None,
        }
    }

    pub fn with_accept_language(mut self, enabled: bool) -> Self {
        self.accept_language = enabled;
        self
    }

    pub fn with_geoip(mut self, locator: GeoIpLocator) -> Self {
        self.geoip = Some(locator);
        self
    }

    pub fn default_language(&self) -> Language {
        self.default
    }

    /// Pick the display language for a request. Invalid inputs are skipped,
    /// never reported.
    pub async fn resolve(&self, request: &LocaleRequest<'_>) -> Language {
        if let Some(language) = request.query.and_then(Language::parse) {
            return language;
        }

        if let Some(language) = request.session.and_then(Language::parse) {
            return language;
        }

        if self.accept_language {
            if let Some(language) = request.accept_language.and_then(best_accept_language) {
                return language;
            }
        }

        if let (Some(locator), Some(ip)) = (&self.geoip, request.client_ip) {
            if let Some(language) = locator.locate(ip).await {
                return language;
            }
        }

        self.default
    }
}

/// Best supported match for an `Accept-Language` header value.
///
/// Entries are ordered by q-value (highest first, header order breaking ties);
/// only the primary subtag is compared, so `en-GB` matches `en`. Entries with
/// `q=0`, malformed q-values and the `*` wildcard are ignored.
pub fn best_accept_language(header: &str) -> Option<Language> {
    let mut candidates: Vec<(f32, &str)> = header
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let tag = parts.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }

            let mut quality = 1.0_f32;
            for param in parts {
                let param = param.trim();
                if let Some(value) = param.strip_prefix("q=") {
                    quality = value.trim().parse().ok()?;
                }
            }

            (quality > 0.0).then_some((quality, tag))
        })
        .collect();

    // Stable sort keeps header order for equal weights
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    candidates.into_iter().find_map(|(_, tag)| {
        let primary = tag.split('-').next().unwrap_or(tag);
        Language::parse(primary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver() -> LocaleResolver {
        LocaleResolver::new(Language::RUSSIAN)
    }

    #[tokio::test]
    async fn test_query_parameter_wins() {
        let request = LocaleRequest {
            query: Some("en"),
            session: Some("lv"),
            accept_language: Some("lv"),
            client_ip: None,
        };

        let language = resolver().with_accept_language(true).resolve(&request).await;
        assert_eq!(language, Language::ENGLISH);
    }

    #[tokio::test]
    async fn test_query_parameter_is_case_insensitive() {
        let request = LocaleRequest {
            query: Some("LV"),
            ..Default::default()
        };
        assert_eq!(resolver().resolve(&request).await, Language::LATVIAN);
    }

    #[tokio::test]
    async fn test_invalid_query_falls_through_to_session() {
        let request = LocaleRequest {
            query: Some("xx"),
            session: Some("lv"),
            ..Default::default()
        };
        assert_eq!(resolver().resolve(&request).await, Language::LATVIAN);
    }

    #[tokio::test]
    async fn test_invalid_session_is_ignored() {
        let request = LocaleRequest {
            session: Some("klingon"),
            ..Default::default()
        };
        assert_eq!(resolver().resolve(&request).await, Language::RUSSIAN);
    }

    #[tokio::test]
    async fn test_nothing_set_returns_default() {
        assert_eq!(
            resolver().resolve(&LocaleRequest::default()).await,
            Language::RUSSIAN
        );
    }

    #[tokio::test]
    async fn test_accept_language_ignored_when_disabled() {
        let request = LocaleRequest {
            accept_language: Some("en-US,en;q=0.9"),
            ..Default::default()
        };
        assert_eq!(resolver().resolve(&request).await, Language::RUSSIAN);
    }

    #[tokio::test]
    async fn test_accept_language_used_when_enabled() {
        let request = LocaleRequest {
            accept_language: Some("de-DE,lv;q=0.8,en;q=0.5"),
            ..Default::default()
        };
        let language = resolver().with_accept_language(true).resolve(&request).await;
        assert_eq!(language, Language::LATVIAN);
    }

    #[tokio::test]
    async fn test_loopback_client_skips_geoip() {
        let locator =
            GeoIpLocator::new("http://127.0.0.1:9", std::time::Duration::from_millis(50), 16)
                .expect("locator");
        let request = LocaleRequest {
            client_ip: Some("127.0.0.1".parse().unwrap()),
            ..Default::default()
        };

        let language = resolver().with_geoip(locator).resolve(&request).await;
        assert_eq!(language, Language::RUSSIAN);
    }

    #[test]
    fn test_best_accept_language_orders_by_quality() {
        assert_eq!(
            best_accept_language("en;q=0.3, lv;q=0.9, ru;q=0.5"),
            Some(Language::LATVIAN)
        );
    }

    #[test]
    fn test_best_accept_language_region_subtags() {
        assert_eq!(best_accept_language("en-GB"), Some(Language::ENGLISH));
        assert_eq!(best_accept_language("ru-RU,ru;q=0.9"), Some(Language::RUSSIAN));
    }

    #[test]
    fn test_best_accept_language_ignores_zero_and_wildcard() {
        assert_eq!(best_accept_language("en;q=0, *"), None);
        assert_eq!(best_accept_language("fr, de"), None);
        assert_eq!(best_accept_language(""), None);
    }

    #[test]
    fn test_best_accept_language_keeps_header_order_on_ties() {
        assert_eq!(best_accept_language("lv, en"), Some(Language::LATVIAN));
        assert_eq!(best_accept_language("en, lv"), Some(Language::ENGLISH));
    }

    #[test]
    fn test_best_accept_language_malformed_quality() {
        assert_eq!(best_accept_language("en;q=abc, lv"), Some(Language::LATVIAN));
    }

    proptest! {
        #[test]
        fn prop_explicit_query_always_wins(idx in 0usize..3, session in "[a-z]{2}", header in "[a-z,;=.0-9 -]{0,30}") {
            let code = ["ru", "lv", "en"][idx];
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let request = LocaleRequest {
                query: Some(code),
                session: Some(&session),
                accept_language: Some(&header),
                client_ip: None,
            };
            let language = runtime.block_on(resolver().with_accept_language(true).resolve(&request));
            prop_assert_eq!(language.code(), code);
        }

        #[test]
        fn prop_accept_language_never_panics(header in ".{0,64}") {
            let _ = best_accept_language(&header);
        }
    }
}
