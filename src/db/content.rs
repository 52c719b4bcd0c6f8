use super::Database;
use crate::i18n::Language;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::warn;

/// How a stored value is interpreted when read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Text,
    Json,
    Html,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Json => "json",
            DataType::Html => "html",
        }
    }

    /// Unknown tags read from the database are treated as plain text.
    pub fn parse(value: &str) -> DataType {
        match value {
            "json" => DataType::Json,
            "html" => DataType::Html,
            _ => DataType::Text,
        }
    }
}

/// Per-locale values of one entry. Locales without a value are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedValues(BTreeMap<Language, String>);

impl LocalizedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(language: Language, value: impl Into<String>) -> Self {
        Self::new().with(language, value)
    }

    pub fn with(mut self, language: Language, value: impl Into<String>) -> Self {
        self.insert(language, value);
        self
    }

    pub fn insert(&mut self, language: Language, value: impl Into<String>) {
        self.0.insert(language, value.into());
    }

    pub fn get(&self, language: Language) -> Option<&str> {
        self.0.get(&language).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Language, &str)> {
        self.0.iter().map(|(lang, value)| (*lang, value.as_str()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentEntry {
    pub id: i64,
    pub section: String,
    pub key: String,
    pub values: LocalizedValues,
    pub data_type: DataType,
    pub created_at: String,
    pub updated_at: String,
}

impl ContentEntry {
    /// Raw value for `language`, falling back to `default_language`. Empty
    /// strings count as missing.
    pub fn value_for(&self, language: Language, default_language: Language) -> Option<&str> {
        self.values
            .get(language)
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.values
                    .get(default_language)
                    .filter(|value| !value.is_empty())
            })
    }
}

/// Key-value-per-locale content storage.
pub trait ContentStore: Send + Sync {
    /// Upsert keyed by (section, key). Locales missing from `values` keep
    /// whatever they held before.
    fn set(
        &self,
        section: &str,
        key: &str,
        values: &LocalizedValues,
        data_type: DataType,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Value in `locale`, else in the default locale, else `default`.
    fn get(
        &self,
        section: &str,
        key: &str,
        locale: Language,
        default: Value,
    ) -> impl Future<Output = Result<Value>> + Send;

    /// Every key of `section` in `locale`, with the same per-key fallback as
    /// `get`. Keys with no usable value are left out.
    fn get_section(
        &self,
        section: &str,
        locale: Language,
    ) -> impl Future<Output = Result<Map<String, Value>>> + Send;

    fn delete(&self, section: &str, key: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Column holding `language`'s value. Codes come from the static registry.
pub(super) fn value_column(language: Language) -> String {
    format!("value_{}", language.code())
}

fn select_columns() -> String {
    let locale_columns: Vec<String> = Language::all().into_iter().map(value_column).collect();
    format!(
        "id, section, key, {}, data_type, created_at, updated_at",
        locale_columns.join(", ")
    )
}

fn entry_from_row(row: &SqliteRow) -> Result<ContentEntry> {
    let mut values = LocalizedValues::new();
    for language in Language::all() {
        let value: Option<String> = row.try_get(value_column(language).as_str())?;
        if let Some(value) = value {
            values.insert(language, value);
        }
    }

    let data_type: String = row.try_get("data_type")?;

    Ok(ContentEntry {
        id: row.try_get("id")?,
        section: row.try_get("section")?,
        key: row.try_get("key")?,
        values,
        data_type: DataType::parse(&data_type),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Turn a stored string into the value handed to templates. Malformed JSON is
/// returned as the raw string so one bad record cannot break a page.
pub fn decode_value(data_type: DataType, raw: &str) -> Value {
    match data_type {
        DataType::Json => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!("Stored JSON content is malformed, serving raw text: {}", e);
            Value::String(raw.to_string())
        }),
        DataType::Text | DataType::Html => Value::String(raw.to_string()),
    }
}

/// Expand dotted keys (`dna_testing.title`) into nested objects.
///
/// When a dotted path runs into an existing non-object value the dotted key
/// is kept verbatim at the top level instead.
pub fn expand_dotted(flat: &Map<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();

    for (key, value) in flat {
        if !key.contains('.') {
            match root.get_mut(key) {
                // A nested object was already built from dotted siblings
                Some(Value::Object(_)) => {
                    root.insert(format!("{}.", key), value.clone());
                }
                _ => {
                    root.insert(key.clone(), value.clone());
                }
            }
            continue;
        }

        let parts: Vec<&str> = key.split('.').collect();
        if !insert_path(&mut root, &parts, value.clone()) {
            root.insert(key.clone(), value.clone());
        }
    }

    root
}

fn insert_path(target: &mut Map<String, Value>, parts: &[&str], value: Value) -> bool {
    match parts {
        [] => false,
        [last] => {
            if matches!(target.get(*last), Some(Value::Object(_))) {
                return false;
            }
            target.insert(last.to_string(), value);
            true
        }
        [head, rest @ ..] => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match child {
                Value::Object(map) => insert_path(map, rest, value),
                _ => false,
            }
        }
    }
}

/// Upsert one entry on an existing connection (used inside the migration
/// transaction as well as by the store).
pub(crate) async fn upsert_entry(
    conn: &mut SqliteConnection,
    section: &str,
    key: &str,
    values: &LocalizedValues,
    data_type: DataType,
) -> Result<()> {
    let languages = Language::all();
    let columns: Vec<String> = languages.iter().map(|l| value_column(*l)).collect();
    let placeholders: Vec<String> = (0..languages.len()).map(|i| format!("?{}", i + 3)).collect();
    let updates: Vec<String> = columns
        .iter()
        .map(|c| format!("{c} = COALESCE(excluded.{c}, content.{c})"))
        .collect();
    let type_idx = languages.len() + 3;
    let now_idx = languages.len() + 4;

    let sql = format!(
        "INSERT INTO content (section, key, {}, data_type, created_at, updated_at)
         VALUES (?1, ?2, {}, ?{type_idx}, ?{now_idx}, ?{now_idx})
         ON CONFLICT(section, key) DO UPDATE SET
            {},
            data_type = excluded.data_type,
            updated_at = excluded.updated_at",
        columns.join(", "),
        placeholders.join(", "),
        updates.join(",\n            ")
    );

    let now = Utc::now().to_rfc3339();
    let mut query = sqlx::query(&sql).bind(section).bind(key);
    for language in &languages {
        query = query.bind(values.get(*language));
    }
    query
        .bind(data_type.as_str())
        .bind(&now)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to save content {}.{}", section, key))?;

    Ok(())
}

pub(crate) async fn delete_all_content(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query("DELETE FROM content")
        .execute(&mut *conn)
        .await
        .context("Failed to clear content")?;
    Ok(result.rows_affected())
}

impl ContentStore for Database {
    async fn set(
        &self,
        section: &str,
        key: &str,
        values: &LocalizedValues,
        data_type: DataType,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_entry(&mut conn, section, key, values, data_type).await
    }

    async fn get(&self, section: &str, key: &str, locale: Language, default: Value) -> Result<Value> {
        let entry = self.get_entry(section, key).await?;

        Ok(entry
            .as_ref()
            .and_then(|entry| {
                entry
                    .value_for(locale, self.default_language)
                    .map(|raw| decode_value(entry.data_type, raw))
            })
            .unwrap_or(default))
    }

    async fn get_section(&self, section: &str, locale: Language) -> Result<Map<String, Value>> {
        let entries = self.list_entries(section).await?;

        let mut result = Map::new();
        for entry in &entries {
            if let Some(raw) = entry.value_for(locale, self.default_language) {
                result.insert(entry.key.clone(), decode_value(entry.data_type, raw));
            }
        }
        Ok(result)
    }

    async fn delete(&self, section: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM content WHERE section = ?1 AND key = ?2")
            .bind(section)
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete content")?;

        Ok(result.rows_affected() > 0)
    }
}

impl Database {
    pub async fn get_entry(&self, section: &str, key: &str) -> Result<Option<ContentEntry>> {
        let sql = format!(
            "SELECT {} FROM content WHERE section = ?1 AND key = ?2",
            select_columns()
        );
        let row = sqlx::query(&sql)
            .bind(section)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Entries of one section ordered by key.
    pub async fn list_entries(&self, section: &str) -> Result<Vec<ContentEntry>> {
        let sql = format!(
            "SELECT {} FROM content WHERE section = ?1 ORDER BY key",
            select_columns()
        );
        let rows = sqlx::query(&sql).bind(section).fetch_all(&self.pool).await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Every entry, ordered by section then key.
    pub async fn list_all_entries(&self) -> Result<Vec<ContentEntry>> {
        let sql = format!("SELECT {} FROM content ORDER BY section, key", select_columns());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// (section, entry count) pairs.
    pub async fn list_sections(&self) -> Result<Vec<(String, i64)>> {
        let sections = sqlx::query_as::<_, (String, i64)>(
            "SELECT section, COUNT(*) FROM content GROUP BY section ORDER BY section",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sections)
    }

    pub async fn count_entries(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
