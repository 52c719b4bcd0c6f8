use chrono::Utc;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::info;

pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file selected")]
    MissingFilename,
    #[error("File name has no extension")]
    MissingExtension,
    #[error("File type .{0} is not allowed (allowed: png, jpg, jpeg, webp, gif)")]
    DisallowedExtension(String),
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Whether the client sent something unacceptable, as opposed to a
    /// storage failure on our side.
    pub fn is_validation(&self) -> bool {
        !matches!(self, UploadError::Io(_))
    }
}

/// Lowercased extension after the last dot, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn has_allowed_extension(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check the client-supplied name; returns the lowercased extension.
pub fn validate_filename(filename: &str) -> Result<String, UploadError> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(UploadError::MissingFilename);
    }

    let ext = extension_of(filename).ok_or(UploadError::MissingExtension)?;
    if !ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(UploadError::DisallowedExtension(ext));
    }
    Ok(ext)
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid filename regex"))
}

/// ASCII-only file name without directories or leading dots.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned = unsafe_chars().replace_all(name.trim(), "_");

    let (stem, ext) = match cleaned.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (&*cleaned, None),
    };
    let stem = stem.trim_start_matches(['.', '_']);
    let stem = if stem.is_empty() { "image" } else { stem };

    match ext {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem.to_string(),
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub filename: String,
    pub original_filename: String,
    pub url: String,
    pub size_bytes: i64,
    pub mime_type: &'static str,
}

/// Writes uploads into one directory served under `url_prefix`.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    url_prefix: String,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// File on disk behind `url`, when the URL points directly into this
    /// store. Nested paths, external URLs and other static files yield None.
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        let name = url
            .split(['?', '#'])
            .next()?
            .strip_prefix(&self.url_prefix)?
            .strip_prefix('/')?;
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." || name == "." {
            return None;
        }
        Some(self.dir.join(name))
    }

    /// Validate and store `bytes` as `{prefix}_{unix_ts}_{id}_{name}`.
    pub async fn save(
        &self,
        prefix: &str,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<StoredUpload, UploadError> {
        let ext = validate_filename(original_filename)?;

        let filename = format!(
            "{}_{}_{}_{}",
            sanitize_filename(prefix),
            Utc::now().timestamp(),
            &uuid::Uuid::new_v4().simple().to_string()[..8],
            sanitize_filename(original_filename)
        );

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&filename), bytes).await?;

        info!("Image saved: {} ({} bytes)", filename, bytes.len());
        Ok(StoredUpload {
            url: format!("{}/{}", self.url_prefix, filename),
            filename,
            original_filename: original_filename.trim().to_string(),
            size_bytes: bytes.len() as i64,
            mime_type: mime_for_extension(&ext),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_filename() {
        assert_eq!(validate_filename("photo.PNG").unwrap(), "png");
        assert!(matches!(validate_filename(""), Err(UploadError::MissingFilename)));
        assert!(matches!(
            validate_filename("README"),
            Err(UploadError::MissingExtension)
        ));
        assert!(matches!(
            validate_filename(".png"),
            Err(UploadError::MissingExtension)
        ));
        assert!(matches!(
            validate_filename("logo.svg"),
            Err(UploadError::DisallowedExtension(ext)) if ext == "svg"
        ));
    }

    #[test]
    fn test_error_classification() {
        assert!(UploadError::MissingExtension.is_validation());
        assert!(!UploadError::Io(std::io::Error::other("disk full")).is_validation());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my photo (1).jpg"), "my_photo_1_.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd.png"), "passwd.png");
        assert_eq!(sanitize_filename("..\\win\\evil.gif"), "evil.gif");
        assert_eq!(sanitize_filename("фото.png"), "image.png");
        assert_eq!(sanitize_filename(".hidden.webp"), "hidden.webp");
    }

    #[test]
    fn test_has_allowed_extension() {
        assert!(has_allowed_extension("/static/img/hero.JPEG"));
        assert!(!has_allowed_extension("linear-gradient(#fff, #000)"));
        assert!(!has_allowed_extension("/static/img/"));
    }

    #[tokio::test]
    async fn test_save_writes_file_and_builds_url() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("img"), "/static/img/");

        let stored = store.save("hero", "Hero Image.png", b"png-bytes").await.unwrap();

        assert!(stored.filename.starts_with("hero_"));
        assert!(stored.filename.ends_with("_Hero_Image.png"));
        assert_eq!(stored.url, format!("/static/img/{}", stored.filename));
        assert_eq!(stored.size_bytes, 9);
        assert_eq!(stored.mime_type, "image/png");
        assert_eq!(
            std::fs::read(dir.path().join("img").join(&stored.filename)).unwrap(),
            b"png-bytes"
        );
    }

    #[test]
    fn test_local_path_only_inside_store() {
        let store = UploadStore::new("/srv/img", "/static/img");

        assert_eq!(
            store.local_path("/static/img/hero_1.png?v=2"),
            Some(PathBuf::from("/srv/img/hero_1.png"))
        );
        assert_eq!(store.local_path("/static/img/sub/x.png"), None);
        assert_eq!(store.local_path("/static/img/../secret.png"), None);
        assert_eq!(store.local_path("/static/imgx.png"), None);
        assert_eq!(store.local_path("/static/css/x.png"), None);
        assert_eq!(store.local_path("https://cdn.example.com/x.png"), None);
    }

    #[tokio::test]
    async fn test_save_rejects_before_touching_disk() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("img"), "/static/img");

        let result = store.save("hero", "script.exe", b"MZ").await;
        assert!(matches!(result, Err(UploadError::DisallowedExtension(_))));
        assert!(!dir.path().join("img").exists());
    }
}
