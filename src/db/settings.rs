use super::Database;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::BTreeMap;

/// Settings that toggle whether a landing-page section is rendered are named
/// `section_visible_<section>`.
pub const SECTION_VISIBLE_PREFIX: &str = "section_visible_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Bool,
    Json,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub value_type: String,
    pub description: Option<String>,
    pub updated_at: String,
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Upsert one setting. A `None` description keeps the stored one.
pub(crate) async fn upsert_setting(
    conn: &mut SqliteConnection,
    key: &str,
    value: &str,
    value_type: ValueType,
    description: Option<&str>,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO settings (key, value, value_type, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            value_type = excluded.value_type,
            description = COALESCE(excluded.description, settings.description),
            updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(value_type.as_str())
    .bind(description)
    .bind(&now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to save setting {}", key))?;

    Ok(())
}

pub(crate) async fn read_setting(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}

impl Database {
    pub async fn set_setting(
        &self,
        key: &str,
        value: &str,
        value_type: ValueType,
        description: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_setting(&mut conn, key, value, value_type, description).await
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.acquire().await?;
        read_setting(&mut conn, key).await
    }

    /// Unparseable values read as `default`.
    pub async fn get_int_setting(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get_setting(key)
            .await?
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default))
    }

    pub async fn settings_with_prefix(&self, prefix: &str) -> Result<Vec<Setting>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let settings = sqlx::query_as::<_, Setting>(
            "SELECT key, value, value_type, description, updated_at
             FROM settings WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(settings)
    }

    /// Section name → visible. Sections without a setting are not listed and
    /// count as visible.
    pub async fn section_visibility(&self) -> Result<BTreeMap<String, bool>> {
        let settings = self.settings_with_prefix(SECTION_VISIBLE_PREFIX).await?;
        Ok(settings
            .into_iter()
            .filter_map(|setting| {
                setting
                    .key
                    .strip_prefix(SECTION_VISIBLE_PREFIX)
                    .map(|section| (section.to_string(), parse_bool(&setting.value)))
            })
            .collect())
    }

    pub async fn set_section_visibility(&self, section: &str, visible: bool) -> Result<()> {
        self.set_setting(
            &format!("{}{}", SECTION_VISIBLE_PREFIX, section),
            if visible { "true" } else { "false" },
            ValueType::Bool,
            Some(&format!("Visibility of section {}", section)),
        )
        .await
    }
}
