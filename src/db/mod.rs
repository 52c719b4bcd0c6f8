//! SQLite persistence: content entries, images and settings.
//!
//! `Database` is a cheap-to-clone handle around a sqlx pool. Each repository
//! lives in its own submodule and adds methods to `Database`; the statements
//! that the migration pipeline must run inside its own transaction are also
//! exposed as free functions over a `SqliteConnection`.

mod content;
mod images;
mod settings;

pub use content::{
    decode_value, expand_dotted, ContentEntry, ContentStore, DataType, LocalizedValues,
};
pub use images::{ImageRecord, NewImage};
pub use settings::{Setting, ValueType, SECTION_VISIBLE_PREFIX};

pub(crate) use content::{delete_all_content, upsert_entry};
pub(crate) use images::insert_image_if_absent;
pub(crate) use settings::{read_setting, upsert_setting};

use crate::i18n::Language;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use std::str::FromStr;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    default_language: Language,
}

impl Database {
    /// Open (creating if missing) the database and bring the schema up to date.
    pub async fn new(database_url: &str, default_language: Language) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", database_url))?;

        Self::from_pool(pool, default_language).await
    }

    async fn from_pool(pool: SqlitePool, default_language: Language) -> Result<Self> {
        let mut conn = pool.acquire().await?;

        if Self::needs_multilang_upgrade(&mut conn).await? {
            Self::run_multilang_upgrade(&mut conn).await?;
        }
        Self::create_tables(&mut conn).await?;

        drop(conn);
        Ok(Self {
            pool,
            default_language,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Locale used when a requested translation is missing.
    pub fn default_language(&self) -> Language {
        self.default_language
    }

    async fn create_tables(conn: &mut SqliteConnection) -> Result<()> {
        let locale_columns: String = Language::all()
            .iter()
            .map(|lang| format!("{} TEXT,\n", content::value_column(*lang)))
            .collect();

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS content (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                section TEXT NOT NULL,
                key TEXT NOT NULL,
                {locale_columns}
                data_type TEXT NOT NULL DEFAULT 'text',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(section, key)
            )"
        ))
        .execute(&mut *conn)
        .await
        .context("Failed to create content table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_content_section ON content (section)")
            .execute(&mut *conn)
            .await
            .context("Failed to create content index")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL UNIQUE,
                original_filename TEXT NOT NULL,
                url TEXT NOT NULL,
                section TEXT NOT NULL,
                field TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                mime_type TEXT,
                width INTEGER,
                height INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(section, field)
            )",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create images table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL,
                value_type TEXT NOT NULL DEFAULT 'string',
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create settings table")?;

        Ok(())
    }

    /// A content table from the single-language era has a `value` column and
    /// no per-locale columns.
    async fn needs_multilang_upgrade(conn: &mut SqliteConnection) -> Result<bool> {
        let table_exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='content'",
        )
        .fetch_one(&mut *conn)
        .await?;

        if table_exists == 0 {
            return Ok(false); // New database, nothing to upgrade
        }

        let locale_column: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('content') WHERE name = ?1",
        )
        .bind(content::value_column(Language::canonical()))
        .fetch_one(&mut *conn)
        .await?;

        Ok(locale_column == 0)
    }

    /// Rebuild the legacy content table with per-locale columns, moving the
    /// old `value` into the canonical locale's column.
    async fn run_multilang_upgrade(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("BEGIN TRANSACTION").execute(&mut *conn).await?;

        match Self::run_multilang_upgrade_inner(conn).await {
            Ok(_) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                info!("Upgraded content table to per-locale columns");
                Ok(())
            }
            Err(e) => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
                Err(e).context("Content table upgrade failed and was rolled back")
            }
        }
    }

    async fn run_multilang_upgrade_inner(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("ALTER TABLE content RENAME TO content_legacy")
            .execute(&mut *conn)
            .await
            .context("Failed to rename legacy content table")?;

        Self::create_tables(conn).await?;

        let now = Utc::now().to_rfc3339();
        sqlx::query(&format!(
            "INSERT INTO content (section, key, {}, data_type, created_at, updated_at)
             SELECT section, key, value, COALESCE(data_type, 'text'), ?1, ?1
             FROM content_legacy",
            content::value_column(Language::canonical())
        ))
        .bind(&now)
        .execute(&mut *conn)
        .await
        .context("Failed to copy legacy content")?;

        sqlx::query("DROP TABLE content_legacy")
            .execute(&mut *conn)
            .await
            .context("Failed to drop legacy content table")?;

        // The index name moved with the renamed table; recreate it on the new one
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_content_section ON content (section)")
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::create_test_db;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let (db, _temp_dir) = create_test_db().await;

        let count = db.count_entries().await.expect("Should count");
        assert_eq!(count, 0);
        assert_eq!(db.default_language(), Language::RUSSIAN);
    }

    #[tokio::test]
    async fn test_database_reopening() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());

        {
            let db = Database::new(&url, Language::RUSSIAN).await.expect("create");
            db.set(
                "hero",
                "slogan",
                &LocalizedValues::single(Language::RUSSIAN, "Баланс"),
                DataType::Text,
            )
            .await
            .expect("Should set");
        }

        {
            let db = Database::new(&url, Language::RUSSIAN).await.expect("reopen");
            assert_eq!(db.count_entries().await.expect("count"), 1, "Entry should persist");
        }
    }

    #[tokio::test]
    async fn test_invalid_database_path() {
        let result = Database::new("sqlite:///non/existent/path/db.db", Language::RUSSIAN).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_upgrade_from_single_value_schema() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", temp_dir.path().join("legacy.db").display());

        // Lay down the single-language schema by hand
        {
            let options = SqliteConnectOptions::from_str(&url)
                .unwrap()
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .unwrap();
            sqlx::query(
                "CREATE TABLE content (
                    id INTEGER PRIMARY KEY,
                    section TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    data_type TEXT DEFAULT 'text',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(section, key)
                )",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO content (section, key, value, data_type, created_at, updated_at)
                 VALUES ('hero', 'slogan', 'Баланс в каждой капле', 'text', 'x', 'x')",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let db = Database::new(&url, Language::RUSSIAN).await.expect("upgrade");
        let value = db
            .get("hero", "slogan", Language::LATVIAN, serde_json::Value::Null)
            .await
            .expect("get");

        assert_eq!(value, serde_json::json!("Баланс в каждой капле"));
    }
}
