//! Key-based translation cache persisted to `translations.json`.
//!
//! Each key stores the default-locale original and any per-locale
//! translations, tagged `manual` (entered by an admin) or `auto` (produced by
//! the provider). When an original changes its auto translations are
//! discarded and regenerated; manual ones are kept.

use crate::i18n::Language;
use crate::retry::{with_retry_if, RetryConfig};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Machine translation backend.
pub trait TranslationProvider: Send + Sync {
    fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, thiserror::Error)]
enum ProviderError {
    #[error("Translation API error ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Translation request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProviderError {
    /// 429 and 5xx are transient, other 4xx are not worth repeating.
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ProviderError::Transport(_) => true,
        }
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Client for a LibreTranslate-compatible `POST /translate` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranslationProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl HttpTranslationProvider {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build translation HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            api_key,
            retry: RetryConfig::translation_api(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn send(&self, request: &TranslateRequest<'_>) -> Result<String, ProviderError> {
        let response = self.client.post(&self.url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(ProviderError::Status { status, body });
        }

        let parsed: TranslateResponse = response.json().await?;
        Ok(parsed.translated_text)
    }
}

impl TranslationProvider for HttpTranslationProvider {
    async fn translate(&self, text: &str, source: Language, target: Language) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let request = TranslateRequest {
            q: text,
            source: source.code(),
            target: target.code(),
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let translated = with_retry_if(
            &self.retry,
            &format!("Translation {} -> {}", source, target),
            || self.send(&request),
            ProviderError::is_retryable,
        )
        .await?;

        Ok(translated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationSource {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTranslation {
    pub value: String,
    pub source: TranslationSource,
    #[serde(default)]
    pub updated_at: String,
}

impl StoredTranslation {
    fn new(value: impl Into<String>, source: TranslationSource) -> Self {
        Self {
            value: value.into(),
            source,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct EntryMeta {
    original: String,
    original_hash: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TranslationEntry {
    #[serde(default)]
    meta: EntryMeta,
    #[serde(default, deserialize_with = "known_locales")]
    translations: BTreeMap<Language, StoredTranslation>,
}

/// Keep translations for supported locales, dropping anything else with a
/// warning instead of failing the whole file.
fn known_locales<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<Language, StoredTranslation>, D::Error> {
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;

    Ok(raw
        .into_iter()
        .filter_map(|(code, value)| {
            let Some(language) = Language::parse(&code) else {
                warn!("Dropping translation for unsupported locale '{}'", code);
                return None;
            };
            match serde_json::from_value(value) {
                Ok(stored) => Some((language, stored)),
                Err(e) => {
                    warn!("Dropping malformed {} translation: {}", language, e);
                    None
                }
            }
        })
        .collect())
}

/// One locale's slot as shown in the admin list.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationSlot {
    pub value: Option<String>,
    pub source: Option<TranslationSource>,
    pub updated_at: Option<String>,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationRecord {
    pub key: String,
    pub original: String,
    /// Every non-default locale, translated or not.
    pub translations: BTreeMap<Language, TranslationSlot>,
}

fn hash_original(original: &str) -> String {
    hex::encode(Sha256::digest(original.as_bytes()))
}

/// Outcome of recording an original under the write lock.
struct Recorded {
    dirty: bool,
    cleared_auto: Vec<Language>,
}

fn record_original(
    data: &mut BTreeMap<String, TranslationEntry>,
    key: &str,
    original: &str,
) -> Recorded {
    let hash = hash_original(original);

    let Some(entry) = data.get_mut(key) else {
        let now = Utc::now().to_rfc3339();
        data.insert(
            key.to_string(),
            TranslationEntry {
                meta: EntryMeta {
                    original: original.to_string(),
                    original_hash: hash,
                    created_at: now.clone(),
                    updated_at: now,
                },
                translations: BTreeMap::new(),
            },
        );
        return Recorded {
            dirty: true,
            cleared_auto: Vec::new(),
        };
    };

    if entry.meta.original_hash == hash {
        return Recorded {
            dirty: false,
            cleared_auto: Vec::new(),
        };
    }

    entry.meta.original = original.to_string();
    entry.meta.original_hash = hash;
    entry.meta.updated_at = Utc::now().to_rfc3339();

    let cleared_auto: Vec<Language> = entry
        .translations
        .iter()
        .filter(|(_, t)| t.source == TranslationSource::Auto)
        .map(|(lang, _)| *lang)
        .collect();
    for lang in &cleared_auto {
        entry.translations.remove(lang);
    }

    info!(
        "Original text changed for '{}', dropped {} auto translation(s)",
        key,
        cleared_auto.len()
    );
    Recorded {
        dirty: true,
        cleared_auto,
    }
}

pub struct TranslationManager<P = HttpTranslationProvider> {
    path: PathBuf,
    default_language: Language,
    provider: Option<P>,
    auto_enabled: bool,
    data: RwLock<BTreeMap<String, TranslationEntry>>,
}

impl<P: TranslationProvider> TranslationManager<P> {
    /// Load `path` if it exists. Unsupported locales and unreadable entries
    /// are skipped; a file that is not a JSON object is moved to `.json.bak`
    /// and the cache starts empty.
    ///
    /// Auto translation is active only when `auto_enabled` is set and a
    /// provider is supplied.
    pub async fn open(
        path: impl Into<PathBuf>,
        default_language: Language,
        provider: Option<P>,
        auto_enabled: bool,
    ) -> Result<Self> {
        let path = path.into();
        let data = Self::load(&path).await?;

        let auto_enabled = auto_enabled && provider.is_some();
        info!(
            "Loaded {} translation keys from {} (auto translation {})",
            data.len(),
            path.display(),
            if auto_enabled { "on" } else { "off" }
        );

        Ok(Self {
            path,
            default_language,
            provider,
            auto_enabled,
            data: RwLock::new(data),
        })
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, TranslationEntry>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let entries: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                // Keep the unreadable file out of the way of the next save
                let backup = path.with_extension("json.bak");
                error!(
                    "Failed to parse translations file {}: {}; moved to {}",
                    path.display(),
                    e,
                    backup.display()
                );
                tokio::fs::rename(path, &backup)
                    .await
                    .with_context(|| format!("Failed to move {} aside", path.display()))?;
                return Ok(BTreeMap::new());
            }
        };

        let mut data = BTreeMap::new();
        for (key, value) in entries {
            match serde_json::from_value::<TranslationEntry>(value) {
                Ok(mut entry) => {
                    if entry.meta.original_hash.is_empty() {
                        entry.meta.original_hash = hash_original(&entry.meta.original);
                    }
                    data.insert(key, entry);
                }
                Err(e) => warn!("Skipping unreadable translation entry '{}': {}", key, e),
            }
        }
        Ok(data)
    }

    /// Write the whole map. Callers hold the write lock.
    async fn save(&self, data: &BTreeMap<String, TranslationEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(data).context("Failed to serialize translations")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    pub fn default_language(&self) -> Language {
        self.default_language
    }

    pub fn auto_enabled(&self) -> bool {
        self.auto_enabled
    }

    /// Create or refresh the entry for `key`. A changed original drops the
    /// key's auto translations and, with auto translation on, regenerates
    /// them.
    pub async fn ensure_entry(&self, key: &str, original: &str) -> Result<()> {
        let cleared = {
            let mut data = self.data.write().await;
            let recorded = record_original(&mut data, key, original);
            if recorded.dirty {
                self.save(&data).await?;
            }
            recorded.cleared_auto
        };

        if self.auto_enabled {
            for language in cleared {
                self.auto_translate(key, language).await?;
            }
        }
        Ok(())
    }

    /// Text for `key` in `locale`. Provider failures are masked by `original`.
    pub async fn get_text(&self, key: &str, original: &str, locale: Language) -> Result<String> {
        self.ensure_entry(key, original).await?;

        if locale == self.default_language {
            return Ok(original.to_string());
        }

        {
            let data = self.data.read().await;
            let stored = data
                .get(key)
                .and_then(|entry| entry.translations.get(&locale))
                .filter(|t| !t.value.is_empty());
            if let Some(stored) = stored {
                return Ok(stored.value.clone());
            }
        }

        if !self.auto_enabled {
            return Ok(original.to_string());
        }

        Ok(self
            .translate_and_store(key, original, locale)
            .await?
            .unwrap_or_else(|| original.to_string()))
    }

    /// Call the provider without holding the lock, then persist the result.
    /// `None` when there is no provider or the call failed.
    async fn translate_and_store(
        &self,
        key: &str,
        original: &str,
        locale: Language,
    ) -> Result<Option<String>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };

        let translated = match provider
            .translate(original, self.default_language, locale)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Auto translation of '{}' to {} failed: {:#}", key, locale, e);
                return Ok(None);
            }
        };

        let mut data = self.data.write().await;
        match data.get_mut(key) {
            // The original may have changed while the provider was working
            Some(entry) if entry.meta.original == original => {
                entry.translations.insert(
                    locale,
                    StoredTranslation::new(translated.clone(), TranslationSource::Auto),
                );
                self.save(&data).await?;
                debug!("Stored auto translation of '{}' for {}", key, locale);
            }
            _ => debug!("Discarding stale auto translation of '{}'", key),
        }
        Ok(Some(translated))
    }

    /// Force a fresh provider translation of the stored original.
    ///
    /// The default locale yields the original itself. `None` for unknown keys,
    /// when auto translation is off, or when the provider fails.
    pub async fn auto_translate(&self, key: &str, locale: Language) -> Result<Option<String>> {
        let Some(original) = self.get_original(key).await else {
            return Ok(None);
        };

        if locale == self.default_language {
            return Ok(Some(original));
        }
        if !self.auto_enabled {
            return Ok(None);
        }

        self.translate_and_store(key, &original, locale).await
    }

    /// Store an admin-entered translation. Writes to the default locale are
    /// ignored; an empty value removes the translation.
    pub async fn set_manual_translation(&self, key: &str, locale: Language, value: &str) -> Result<()> {
        if locale == self.default_language {
            warn!("Ignoring manual translation of '{}' into the default locale", key);
            return Ok(());
        }

        let mut data = self.data.write().await;
        if !data.contains_key(key) {
            record_original(&mut data, key, "");
        }
        let Some(entry) = data.get_mut(key) else {
            return Ok(());
        };

        if value.trim().is_empty() {
            entry.translations.remove(&locale);
            info!("Removed {} translation of '{}'", locale, key);
        } else {
            entry
                .translations
                .insert(locale, StoredTranslation::new(value, TranslationSource::Manual));
            info!("Saved manual {} translation of '{}'", locale, key);
        }

        self.save(&data).await
    }

    pub async fn get_original(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .await
            .get(key)
            .map(|entry| entry.meta.original.clone())
    }

    pub async fn get_translation(&self, key: &str, locale: Language) -> Option<StoredTranslation> {
        self.data
            .read()
            .await
            .get(key)
            .and_then(|entry| entry.translations.get(&locale).cloned())
    }

    /// All keys in order, with a slot for every non-default locale.
    pub async fn list_records(&self) -> Vec<TranslationRecord> {
        let data = self.data.read().await;

        data.iter()
            .map(|(key, entry)| {
                let translations = Language::all()
                    .into_iter()
                    .filter(|lang| *lang != self.default_language)
                    .map(|lang| {
                        let stored = entry.translations.get(&lang);
                        (
                            lang,
                            TranslationSlot {
                                value: stored.map(|t| t.value.clone()),
                                source: stored.map(|t| t.source),
                                updated_at: stored.map(|t| t.updated_at.clone()),
                                label: lang.label(),
                            },
                        )
                    })
                    .collect();

                TranslationRecord {
                    key: key.clone(),
                    original: entry.meta.original.clone(),
                    translations,
                }
            })
            .collect()
    }
}
