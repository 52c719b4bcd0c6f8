use super::Database;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ImageRecord {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub url: String,
    pub section: String,
    pub field: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields supplied when registering an image.
#[derive(Debug, Clone, Default)]
pub struct NewImage<'a> {
    pub filename: &'a str,
    pub original_filename: &'a str,
    pub url: &'a str,
    pub section: &'a str,
    pub field: &'a str,
    pub size_bytes: i64,
    pub mime_type: Option<&'a str>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

const IMAGE_COLUMNS: &str = "id, filename, original_filename, url, section, field, size_bytes, \
                             mime_type, width, height, created_at, updated_at";

/// Insert unless a record already exists for the same (section, field).
/// Returns whether a row was written.
pub(crate) async fn insert_image_if_absent(
    conn: &mut SqliteConnection,
    image: &NewImage<'_>,
) -> Result<bool> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM images WHERE section = ?1 AND field = ?2")
            .bind(image.section)
            .bind(image.field)
            .fetch_optional(&mut *conn)
            .await?;
    if existing.is_some() {
        return Ok(false);
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO images (filename, original_filename, url, section, field, size_bytes,
                             mime_type, width, height, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
    )
    .bind(image.filename)
    .bind(image.original_filename)
    .bind(image.url)
    .bind(image.section)
    .bind(image.field)
    .bind(image.size_bytes)
    .bind(image.mime_type)
    .bind(image.width)
    .bind(image.height)
    .bind(&now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to save image {}.{}", image.section, image.field))?;

    Ok(true)
}

impl Database {
    /// Register the image for (section, field), superseding any previous one.
    pub async fn replace_image(&self, image: &NewImage<'_>) -> Result<ImageRecord> {
        let now = Utc::now().to_rfc3339();
        let record = sqlx::query_as::<_, ImageRecord>(&format!(
            "INSERT INTO images (filename, original_filename, url, section, field, size_bytes,
                                 mime_type, width, height, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(section, field) DO UPDATE SET
                filename = excluded.filename,
                original_filename = excluded.original_filename,
                url = excluded.url,
                size_bytes = excluded.size_bytes,
                mime_type = excluded.mime_type,
                width = excluded.width,
                height = excluded.height,
                updated_at = excluded.updated_at
             RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(image.filename)
        .bind(image.original_filename)
        .bind(image.url)
        .bind(image.section)
        .bind(image.field)
        .bind(image.size_bytes)
        .bind(image.mime_type)
        .bind(image.width)
        .bind(image.height)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to save image {}.{}", image.section, image.field))?;

        info!(
            "Image stored: {} ({}.{})",
            record.filename, record.section, record.field
        );
        Ok(record)
    }

    pub async fn image_for(&self, section: &str, field: &str) -> Result<Option<ImageRecord>> {
        let record = sqlx::query_as::<_, ImageRecord>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE section = ?1 AND field = ?2"
        ))
        .bind(section)
        .bind(field)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn images_in_section(&self, section: &str) -> Result<Vec<ImageRecord>> {
        let records = sqlx::query_as::<_, ImageRecord>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE section = ?1 ORDER BY field"
        ))
        .bind(section)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let records = sqlx::query_as::<_, ImageRecord>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images ORDER BY section, field"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Point an existing record at a new URL. Returns false when no record
    /// exists for (section, field).
    pub async fn update_image_url(&self, section: &str, field: &str, url: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE images SET url = ?1, updated_at = ?2 WHERE section = ?3 AND field = ?4",
        )
        .bind(url)
        .bind(Utc::now().to_rfc3339())
        .bind(section)
        .bind(field)
        .execute(&self.pool)
        .await
        .context("Failed to update image URL")?;

        if result.rows_affected() > 0 {
            info!("Image URL updated: {}.{}", section, field);
        }
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_image(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete image")?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether any record still points at `url`.
    pub async fn image_url_in_use(&self, url: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE url = ?1")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn count_images(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::create_test_db;

    fn hero_background<'a>(filename: &'a str, url: &'a str) -> NewImage<'a> {
        NewImage {
            filename,
            original_filename: "hero.png",
            url,
            section: "hero",
            field: "background",
            size_bytes: 1024,
            mime_type: Some("image/png"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_replace_image_creates_record() {
        let (db, _temp_dir) = create_test_db().await;

        let record = db
            .replace_image(&hero_background("hero_1.png", "/static/img/hero_1.png"))
            .await
            .expect("Should store");

        assert_eq!(record.section, "hero");
        assert_eq!(record.url, "/static/img/hero_1.png");
        assert_eq!(record.mime_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_replace_image_supersedes_previous_url() {
        let (db, _temp_dir) = create_test_db().await;

        let first = db
            .replace_image(&hero_background("hero_1.png", "/static/img/hero_1.png"))
            .await
            .expect("first");
        let second = db
            .replace_image(&hero_background("hero_2.png", "/static/img/hero_2.png"))
            .await
            .expect("second");

        assert_eq!(first.id, second.id, "Same (section, field) keeps its row");
        assert_eq!(db.count_images().await.expect("count"), 1);

        let current = db
            .image_for("hero", "background")
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(current.url, "/static/img/hero_2.png");
        assert_eq!(current.filename, "hero_2.png");
    }

    #[tokio::test]
    async fn test_insert_if_absent_does_not_overwrite() {
        let (db, _temp_dir) = create_test_db().await;
        db.replace_image(&hero_background("custom.png", "/static/img/custom.png"))
            .await
            .expect("store");

        let mut conn = db.pool().acquire().await.expect("conn");
        let inserted = insert_image_if_absent(
            &mut conn,
            &hero_background("legacy.png", "/static/img/legacy.png"),
        )
        .await
        .expect("insert");
        drop(conn);

        assert!(!inserted);
        let current = db.image_for("hero", "background").await.unwrap().unwrap();
        assert_eq!(current.url, "/static/img/custom.png");
    }

    #[tokio::test]
    async fn test_insert_if_absent_allows_shared_url() {
        let (db, _temp_dir) = create_test_db().await;
        let mut conn = db.pool().acquire().await.expect("conn");

        for section in ["hero", "about"] {
            let filename = format!("{section}_background_bg.jpg");
            let inserted = insert_image_if_absent(
                &mut conn,
                &NewImage {
                    filename: &filename,
                    original_filename: "bg.jpg",
                    url: "/static/img/bg.jpg",
                    section,
                    field: "background",
                    ..Default::default()
                },
            )
            .await
            .expect("insert");
            assert!(inserted, "{section} should get its own record");
        }
        drop(conn);

        assert_eq!(db.count_images().await.unwrap(), 2);
        assert!(db.image_url_in_use("/static/img/bg.jpg").await.unwrap());
        assert!(!db.image_url_in_use("/static/img/other.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_url_and_delete() {
        let (db, _temp_dir) = create_test_db().await;
        let record = db
            .replace_image(&hero_background("hero_1.png", "/static/img/hero_1.png"))
            .await
            .expect("store");

        assert!(db
            .update_image_url("hero", "background", "/static/img/other.png")
            .await
            .expect("update"));
        assert!(!db
            .update_image_url("about", "background", "/x.png")
            .await
            .expect("update missing"));

        assert!(db.delete_image(record.id).await.expect("delete"));
        assert!(db.list_images().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_images_in_section() {
        let (db, _temp_dir) = create_test_db().await;
        db.replace_image(&hero_background("hero_1.png", "/static/img/hero_1.png"))
            .await
            .unwrap();
        db.replace_image(&NewImage {
            filename: "logo.png",
            original_filename: "logo.png",
            url: "/static/img/logo.png",
            section: "hero",
            field: "logo",
            ..Default::default()
        })
        .await
        .unwrap();

        let fields: Vec<_> = db
            .images_in_section("hero")
            .await
            .expect("list")
            .into_iter()
            .map(|img| img.field)
            .collect();
        assert_eq!(fields, vec!["background", "logo"]);
    }
}
