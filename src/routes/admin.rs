//! Token-gated JSON API for editing content, images, translations and
//! section visibility.
//!
//! Everything except `POST /admin/session` sits behind [`require_admin`].

use super::public::visible_sections;
use crate::auth::{require_admin, token_from_headers, verify_admin_token, AuthError};
use crate::db::{ContentStore, DataType, ImageRecord, LocalizedValues, NewImage};
use crate::error::AppError;
use crate::i18n::Language;
use crate::migration::{MIGRATION_VERSION_KEY, SECTIONS};
use crate::server::SharedState;
use crate::session::admin_cookie;
use crate::translation::TranslationRecord;
use crate::uploads::{has_allowed_extension, UploadError};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub fn router(state: SharedState) -> Router<SharedState> {
    let protected = Router::new()
        .route("/", get(dashboard))
        .route("/content", get(list_all_content))
        .route("/content/:section", get(list_section))
        .route(
            "/content/:section/:key",
            get(get_content).put(update_content).delete(delete_content),
        )
        .route("/images", get(list_images))
        .route(
            "/images/:section/:field",
            post(upload_image).put(update_image_url).delete(delete_image),
        )
        .route("/translations", get(list_translations))
        .route("/translations/:key/:locale", put(update_translation))
        .route("/translations/:key/:locale/auto", post(auto_translate))
        .route(
            "/sections-visibility",
            get(get_visibility).put(update_visibility),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes));

    Router::new()
        .route("/session", post(create_session))
        .merge(protected)
}

fn parse_locale(code: &str) -> Result<Language, AppError> {
    Language::parse(code).ok_or(AppError::UnsupportedLanguage)
}

/// Exchange a bearer token for the HttpOnly admin cookie.
pub async fn create_session(headers: HeaderMap, State(state): State<SharedState>) -> Result<Response, AppError> {
    let token = token_from_headers(&headers).ok_or(AuthError::MissingToken)?;
    let claims = verify_admin_token(&state.config.secret_key, &token)?;

    let max_age = (claims.exp - Utc::now().timestamp()).max(0);
    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .map(|at| at.to_rfc3339());
    info!("Admin session opened (jti: {})", claims.jti);

    Ok((
        [(header::SET_COOKIE, admin_cookie(&token, max_age))],
        Json(json!({"status": "success", "expires_at": expires_at})),
    )
        .into_response())
}

pub async fn dashboard(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let sections: Vec<Value> = state
        .db
        .list_sections()
        .await?
        .into_iter()
        .map(|(section, entries)| json!({"section": section, "entries": entries}))
        .collect();

    Ok(Json(json!({
        "status": "success",
        "content_entries": state.db.count_entries().await?,
        "images": state.db.count_images().await?,
        "translations": state.translations.list_records().await.len(),
        "sections": sections,
        "languages": Language::all(),
        "default_language": state.config.default_language,
        "auto_translation_enabled": state.translations.auto_enabled(),
        "migration_version": state.db.get_int_setting(MIGRATION_VERSION_KEY, 0).await?,
    })))
}

/// Every entry of every section, for backups.
pub async fn list_all_content(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let entries = state.db.list_all_entries().await?;
    Ok(Json(json!({"count": entries.len(), "entries": entries})))
}

pub async fn list_section(
    State(state): State<SharedState>,
    Path(section): Path<String>,
) -> Result<Json<Value>, AppError> {
    let entries = state.db.list_entries(&section).await?;
    Ok(Json(json!({"section": section, "entries": entries})))
}

pub async fn get_content(
    State(state): State<SharedState>,
    Path((section, key)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let entry = state
        .db
        .get_entry(&section, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Content {}.{}", section, key)))?;
    Ok(Json(json!(entry)))
}

#[derive(Debug, Deserialize)]
pub struct ContentUpdate {
    values: BTreeMap<String, String>,
    #[serde(default)]
    data_type: DataType,
}

impl ContentUpdate {
    fn into_values(self) -> Result<(LocalizedValues, DataType), AppError> {
        if self.values.is_empty() {
            return Err(AppError::BadRequest("No values given".to_string()));
        }

        let mut values = LocalizedValues::new();
        for (code, value) in self.values {
            let language = parse_locale(&code)?;
            if self.data_type == DataType::Json && serde_json::from_str::<Value>(&value).is_err() {
                return Err(AppError::BadRequest(format!(
                    "Value for {} is not valid JSON",
                    language
                )));
            }
            values.insert(language, value);
        }
        Ok((values, self.data_type))
    }
}

pub async fn update_content(
    State(state): State<SharedState>,
    Path((section, key)): Path<(String, String)>,
    Json(update): Json<ContentUpdate>,
) -> Result<Json<Value>, AppError> {
    let (values, data_type) = update.into_values()?;
    state.db.set(&section, &key, &values, data_type).await?;
    info!("Content {}.{} updated", section, key);

    let entry = state.db.get_entry(&section, &key).await?;
    Ok(Json(json!({"status": "success", "entry": entry})))
}

pub async fn delete_content(
    State(state): State<SharedState>,
    Path((section, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    if !state.db.delete(&section, &key).await? {
        return Err(AppError::NotFound(format!("Content {}.{}", section, key)));
    }
    info!("Content {}.{} deleted", section, key);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageFilter {
    section: Option<String>,
}

pub async fn list_images(
    State(state): State<SharedState>,
    Query(filter): Query<ImageFilter>,
) -> Result<Json<Vec<ImageRecord>>, AppError> {
    let images = match filter.section {
        Some(section) => state.db.images_in_section(&section).await?,
        None => state.db.list_images().await?,
    };
    Ok(Json(images))
}

#[derive(Debug, Deserialize)]
pub struct ImageUrlUpdate {
    url: String,
}

/// Point (section, field) at an image that is already served, e.g. another
/// upload or a stock file under `/static`.
pub async fn update_image_url(
    State(state): State<SharedState>,
    Path((section, field)): Path<(String, String)>,
    Json(update): Json<ImageUrlUpdate>,
) -> Result<Json<Value>, AppError> {
    let url = update.url.trim();
    if !url.starts_with('/') || !has_allowed_extension(url) {
        return Err(AppError::BadRequest(format!("'{}' is not an image path", url)));
    }
    if !state.db.update_image_url(&section, &field, url).await? {
        return Err(AppError::NotFound(format!("Image {}.{}", section, field)));
    }
    Ok(Json(json!({"status": "success", "url": url})))
}

pub async fn delete_image(
    State(state): State<SharedState>,
    Path((section, field)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let image = state
        .db
        .image_for(&section, &field)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Image {}.{}", section, field)))?;

    state.db.delete_image(image.id).await?;
    remove_stored_file(&state, &image).await;
    info!("Image {}.{} deleted", section, field);
    Ok(StatusCode::NO_CONTENT)
}

/// Delete the file behind a superseded record, unless it lives outside the
/// upload directory or another record still uses it.
async fn remove_stored_file(state: &SharedState, previous: &ImageRecord) {
    let Some(path) = state.uploads.local_path(&previous.url) else {
        return;
    };
    match state.db.image_url_in_use(&previous.url).await {
        Ok(false) => {}
        Ok(true) => return,
        Err(e) => {
            warn!("Could not check usage of {}: {}", previous.url, e);
            return;
        }
    }

    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove image file {}: {}", path.display(), e),
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    let message = e.to_string();
    if e.into_response().status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(message)
    }
}

/// Store the multipart `file` field as the image of (section, field).
pub async fn upload_image(
    State(state): State<SharedState>,
    Path((section, field)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImageRecord>), AppError> {
    let mut upload = None;
    while let Some(part) = multipart.next_field().await.map_err(multipart_error)? {
        if part.name() != Some("file") {
            continue;
        }
        let filename = part.file_name().unwrap_or_default().to_string();
        let bytes = part.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload.ok_or(UploadError::MissingFilename)?;

    let previous = state.db.image_for(&section, &field).await?;
    let stored = state.uploads.save(&section, &filename, &bytes).await?;

    let record = state
        .db
        .replace_image(&NewImage {
            filename: &stored.filename,
            original_filename: &stored.original_filename,
            url: &stored.url,
            section: &section,
            field: &field,
            size_bytes: stored.size_bytes,
            mime_type: Some(stored.mime_type),
            ..Default::default()
        })
        .await?;

    if let Some(previous) = previous.filter(|p| p.url != record.url) {
        remove_stored_file(&state, &previous).await;
    }

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_translations(State(state): State<SharedState>) -> Json<Vec<TranslationRecord>> {
    Json(state.translations.list_records().await)
}

#[derive(Debug, Deserialize)]
pub struct TranslationUpdate {
    value: String,
}

pub async fn update_translation(
    State(state): State<SharedState>,
    Path((key, locale)): Path<(String, String)>,
    Json(update): Json<TranslationUpdate>,
) -> Result<Json<Value>, AppError> {
    let language = parse_locale(&locale)?;
    if language == state.translations.default_language() {
        return Err(AppError::BadRequest(format!(
            "{} is the source language; edit the content instead",
            language
        )));
    }
    if state.translations.get_original(&key).await.is_none() {
        return Err(AppError::NotFound(format!("Translation key {}", key)));
    }

    state
        .translations
        .set_manual_translation(&key, language, &update.value)
        .await?;
    Ok(Json(json!({"status": "success", "key": key, "language": language})))
}

pub async fn auto_translate(
    State(state): State<SharedState>,
    Path((key, locale)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let language = parse_locale(&locale)?;
    if state.translations.get_original(&key).await.is_none() {
        return Err(AppError::NotFound(format!("Translation key {}", key)));
    }

    match state.translations.auto_translate(&key, language).await? {
        Some(value) => Ok(Json(json!({"status": "success", "key": key, "value": value}))),
        None => Err(AppError::BadRequest(
            "Automatic translation is not available".to_string(),
        )),
    }
}

pub async fn get_visibility(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let sections = visible_sections(&state).await?;
    Ok(Json(json!({"sections": sections})))
}

#[derive(Debug, Deserialize)]
pub struct VisibilityUpdate {
    sections: BTreeMap<String, bool>,
}

pub async fn update_visibility(
    State(state): State<SharedState>,
    Json(update): Json<VisibilityUpdate>,
) -> Result<Json<Value>, AppError> {
    if let Some(unknown) = update.sections.keys().find(|s| !SECTIONS.contains(&s.as_str())) {
        return Err(AppError::BadRequest(format!("Unknown section '{}'", unknown)));
    }

    for (section, visible) in &update.sections {
        state.db.set_section_visibility(section, *visible).await?;
    }
    info!("Updated visibility of {} section(s)", update.sections.len());

    let sections = visible_sections(&state).await?;
    Ok(Json(json!({"status": "success", "sections": sections})))
}
