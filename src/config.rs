use crate::i18n::Language;
use anyhow::{Context, Result};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CompanyInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Security
    pub secret_key: String,
    pub session_lifetime_secs: i64,

    // Localization
    pub default_language: Language,
    pub accept_language_enabled: bool,
    pub geoip_enabled: bool,
    pub geoip_api_url: String,
    pub geoip_timeout: Duration,
    pub geoip_cache_size: usize,
    /// Peers whose `X-Forwarded-For` header is believed.
    pub trusted_proxies: Vec<IpAddr>,

    // Translation
    pub auto_translation_enabled: bool,
    pub translation_api_url: Option<String>,
    pub translation_api_key: Option<String>,

    // Storage
    pub database_url: String,
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub templates_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,

    // Server
    pub host: String,
    pub port: u16,

    pub company: CompanyInfo,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Comma-separated IP addresses; a bad entry is a startup error.
fn env_ip_list(name: &str) -> Result<Vec<IpAddr>> {
    let Some(raw) = env_optional(name) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| {
            ip.parse()
                .with_context(|| format!("{} entry '{}' is not an IP address", name, ip))
        })
        .collect()
}

impl Config {
    /// Built-in defaults for everything except the secret.
    pub fn with_secret(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            session_lifetime_secs: 3600,

            default_language: Language::canonical(),
            accept_language_enabled: false,
            geoip_enabled: false,
            geoip_api_url: "http://ip-api.com/json".to_string(),
            geoip_timeout: Duration::from_millis(1500),
            geoip_cache_size: 4096,
            trusted_proxies: Vec::new(),

            auto_translation_enabled: false,
            translation_api_url: None,
            translation_api_key: None,

            database_url: "sqlite://data/oilfusion.db".to_string(),
            data_dir: PathBuf::from("data"),
            upload_dir: PathBuf::from("static/img"),
            static_dir: PathBuf::from("static"),
            templates_dir: None,
            max_upload_bytes: 16 * 1024 * 1024,

            host: "0.0.0.0".to_string(),
            port: 5000,

            company: CompanyInfo {
                name: "OilFusion".to_string(),
                email: "info@oilfusion.com".to_string(),
                phone: "+7 (XXX) XXX-XX-XX".to_string(),
                address: "г. Москва, ул. Примерная, д. 1".to_string(),
            },
        }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::with_secret(String::new());

        let default_language = match env_optional("DEFAULT_LANGUAGE") {
            Some(code) => Language::from_code(code.trim())
                .with_context(|| format!("DEFAULT_LANGUAGE '{}' is not supported", code))?,
            None => defaults.default_language,
        };

        Ok(Self {
            // Security
            secret_key: std::env::var("SECRET_KEY")
                .context("SECRET_KEY not set")?,
            session_lifetime_secs: env_parse("SESSION_LIFETIME_SECS", defaults.session_lifetime_secs),

            // Localization
            default_language,
            accept_language_enabled: env_flag("ACCEPT_LANGUAGE_ENABLED"),
            geoip_enabled: env_flag("GEOIP_ENABLED"),
            geoip_api_url: env_string("GEOIP_API_URL", &defaults.geoip_api_url),
            geoip_timeout: Duration::from_millis(env_parse("GEOIP_TIMEOUT_MS", 1500)),
            geoip_cache_size: env_parse("GEOIP_CACHE_SIZE", defaults.geoip_cache_size),
            trusted_proxies: env_ip_list("TRUSTED_PROXIES")?,

            // Translation
            auto_translation_enabled: env_flag("AUTO_TRANSLATION_ENABLED"),
            translation_api_url: env_optional("TRANSLATION_API_URL"),
            translation_api_key: env_optional("TRANSLATION_API_KEY"),

            // Storage
            database_url: env_string("DATABASE_URL", &defaults.database_url),
            data_dir: env_optional("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            upload_dir: env_optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            static_dir: env_optional("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            templates_dir: env_optional("TEMPLATES_DIR").map(PathBuf::from),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),

            // Server
            host: env_string("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port),

            company: CompanyInfo {
                name: env_string("COMPANY_NAME", &defaults.company.name),
                email: env_string("COMPANY_EMAIL", &defaults.company.email),
                phone: env_string("COMPANY_PHONE", &defaults.company.phone),
                address: env_string("COMPANY_ADDRESS", &defaults.company.address),
            },
        })
    }

    /// Where the translation cache lives.
    pub fn translations_path(&self) -> PathBuf {
        self.data_dir.join("translations.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SECRET_KEY",
        "DEFAULT_LANGUAGE",
        "AUTO_TRANSLATION_ENABLED",
        "TRANSLATION_API_URL",
        "ACCEPT_LANGUAGE_ENABLED",
        "GEOIP_ENABLED",
        "GEOIP_TIMEOUT_MS",
        "TRUSTED_PROXIES",
        "DATA_DIR",
        "PORT",
        "MAX_UPLOAD_BYTES",
        "COMPANY_EMAIL",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_secret_key_is_required() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("SECRET_KEY"));
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        std::env::set_var("SECRET_KEY", "s3cret");

        let config = Config::from_env().unwrap();
        assert_eq!(config.secret_key, "s3cret");
        assert_eq!(config.default_language, Language::RUSSIAN);
        assert!(!config.accept_language_enabled);
        assert!(!config.geoip_enabled);
        assert!(!config.auto_translation_enabled);
        assert_eq!(config.geoip_timeout, Duration::from_millis(1500));
        assert!(config.trusted_proxies.is_empty());
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.translations_path(), PathBuf::from("data/translations.json"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("SECRET_KEY", "s3cret");
        std::env::set_var("DEFAULT_LANGUAGE", "LV");
        std::env::set_var("ACCEPT_LANGUAGE_ENABLED", "true");
        std::env::set_var("GEOIP_TIMEOUT_MS", "250");
        std::env::set_var("TRUSTED_PROXIES", "127.0.0.1, ::1");
        std::env::set_var("TRANSLATION_API_URL", "http://localhost:5001/translate");
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("COMPANY_EMAIL", "hello@oilfusion.lv");

        let config = Config::from_env().unwrap();
        assert_eq!(config.default_language, Language::LATVIAN);
        assert!(config.accept_language_enabled);
        assert_eq!(config.geoip_timeout, Duration::from_millis(250));
        assert_eq!(
            config.trusted_proxies,
            vec!["127.0.0.1".parse::<IpAddr>().unwrap(), "::1".parse().unwrap()]
        );
        assert_eq!(
            config.translation_api_url.as_deref(),
            Some("http://localhost:5001/translate")
        );
        assert_eq!(config.port, 5000, "Unparseable values fall back");
        assert_eq!(config.company.email, "hello@oilfusion.lv");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_unsupported_default_language_fails() {
        clear_env();
        std::env::set_var("SECRET_KEY", "s3cret");
        std::env::set_var("DEFAULT_LANGUAGE", "de");

        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_trusted_proxy_fails() {
        clear_env();
        std::env::set_var("SECRET_KEY", "s3cret");
        std::env::set_var("TRUSTED_PROXIES", "10.0.0.1, proxy.local");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("TRUSTED_PROXIES"));
        clear_env();
    }
}
