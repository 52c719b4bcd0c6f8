//! One-time import of the legacy per-section JSON documents into the content
//! store.
//!
//! Each document is decoded once into a [`ContentNode`] tree, which makes the
//! difference between a translation map (`{"ru": .., "en": ..}`) and an
//! ordinary object explicit before anything is written. The whole run shares
//! one transaction: the version flag is only committed together with the rows
//! it describes.

use crate::db::{
    self, upsert_entry, upsert_setting, ContentStore, DataType, Database, LocalizedValues,
    NewImage, ValueType, SECTION_VISIBLE_PREFIX,
};
use crate::i18n::Language;
use crate::uploads::has_allowed_extension;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

/// Bump when the flattening rules change; a lower stored version triggers a
/// destructive re-import of all content rows.
pub const MIGRATION_VERSION: i64 = 2;

pub const MIGRATION_VERSION_KEY: &str = "migration_version";
pub const MIGRATION_COMPLETED_KEY: &str = "migration_completed";

/// Legacy document → section it populates.
pub const LEGACY_CONTENT_FILES: &[(&str, &str)] = &[
    ("hero_content.json", "hero"),
    ("about_content.json", "about"),
    ("products_content.json", "products"),
    ("services_content.json", "services"),
    ("personalization_content.json", "personalization"),
    ("contacts_content.json", "contacts"),
    ("blog_content.json", "blog"),
    ("reviews_content.json", "reviews"),
    ("auracloud_slider.json", "auracloud_slider"),
];

pub const BACKGROUNDS_FILE: &str = "section_backgrounds.json";
pub const VISIBILITY_FILE: &str = "sections_visibility.json";

/// Sections the landing page knows about, in page order.
pub const SECTIONS: &[&str] = &[
    "hero",
    "about",
    "products",
    "services",
    "personalization",
    "reviews",
    "blog",
    "contacts",
];

/// Decoded shape of a legacy document.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentNode {
    /// String, number, bool or null.
    Scalar(Value),
    /// One translatable value: scalar per locale, default locale always present.
    Localized(BTreeMap<Language, Value>),
    List(Vec<ContentNode>),
    Object(Vec<(String, ContentNode)>),
}

impl ContentNode {
    pub fn decode(value: Value, default: Language) -> ContentNode {
        match value {
            Value::Array(items) => ContentNode::List(
                items
                    .into_iter()
                    .map(|item| ContentNode::decode(item, default))
                    .collect(),
            ),
            Value::Object(map) => match as_localized(&map, default) {
                Some(localized) => ContentNode::Localized(localized),
                None => ContentNode::Object(
                    map.into_iter()
                        .map(|(key, child)| (key, ContentNode::decode(child, default)))
                        .collect(),
                ),
            },
            scalar => ContentNode::Scalar(scalar),
        }
    }

    /// Whether a localized node occurs anywhere in this subtree.
    pub fn has_localized(&self) -> bool {
        match self {
            ContentNode::Scalar(_) => false,
            ContentNode::Localized(_) => true,
            ContentNode::List(items) => items.iter().any(ContentNode::has_localized),
            ContentNode::Object(fields) => fields.iter().any(|(_, child)| child.has_localized()),
        }
    }

    /// Plain JSON for one locale; localized nodes take their `locale` value or
    /// the default locale's.
    pub fn resolve(&self, locale: Language, default: Language) -> Value {
        match self {
            ContentNode::Scalar(value) => value.clone(),
            ContentNode::Localized(values) => localized_value(values, locale, default),
            ContentNode::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(locale, default))
                    .collect(),
            ),
            ContentNode::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, child)| (key.clone(), child.resolve(locale, default)))
                    .collect(),
            ),
        }
    }
}

fn as_localized(map: &Map<String, Value>, default: Language) -> Option<BTreeMap<Language, Value>> {
    if map.is_empty() || !map.contains_key(default.code()) {
        return None;
    }

    let mut localized = BTreeMap::new();
    for (key, value) in map {
        // Exact lowercase codes only; "EN" is an ordinary field name
        let language = Language::parse(key).filter(|lang| lang.code() == key)?;
        if value.is_array() || value.is_object() {
            return None;
        }
        localized.insert(language, value.clone());
    }
    Some(localized)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn localized_value(values: &BTreeMap<Language, Value>, locale: Language, default: Language) -> Value {
    values
        .get(&locale)
        .filter(|value| !is_blank(value))
        .or_else(|| values.get(&default))
        .cloned()
        .unwrap_or(Value::Null)
}

fn scalar_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// One row the pipeline will write.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEntry {
    pub key: String,
    pub values: LocalizedValues,
    pub data_type: DataType,
}

/// Flatten a decoded document into content rows for one section.
pub fn flatten_document(node: &ContentNode, default: Language) -> Vec<PlannedEntry> {
    let mut entries = Vec::new();
    match node {
        ContentNode::Object(fields) => {
            for (key, child) in fields {
                flatten_node(child, key, default, &mut entries);
            }
        }
        other => flatten_node(other, "data", default, &mut entries),
    }
    entries
}

fn flatten_node(node: &ContentNode, key: &str, default: Language, out: &mut Vec<PlannedEntry>) {
    match node {
        ContentNode::Scalar(value) => {
            if let Some(text) = scalar_to_text(value) {
                out.push(PlannedEntry {
                    key: key.to_string(),
                    values: LocalizedValues::single(default, text),
                    data_type: DataType::Text,
                });
            }
        }
        ContentNode::Localized(values) => {
            let mut localized = LocalizedValues::new();
            for language in Language::all() {
                if let Some(text) = scalar_to_text(&localized_value(values, language, default)) {
                    localized.insert(language, text);
                }
            }
            if !localized.is_empty() {
                out.push(PlannedEntry {
                    key: key.to_string(),
                    values: localized,
                    data_type: DataType::Text,
                });
            }
        }
        ContentNode::List(_) => {
            let values = if node.has_localized() {
                let mut per_locale = LocalizedValues::new();
                for language in Language::all() {
                    per_locale.insert(language, node.resolve(language, default).to_string());
                }
                per_locale
            } else {
                LocalizedValues::single(default, node.resolve(default, default).to_string())
            };
            out.push(PlannedEntry {
                key: key.to_string(),
                values,
                data_type: DataType::Json,
            });
        }
        ContentNode::Object(fields) => {
            for (child_key, child) in fields {
                flatten_node(child, &format!("{}.{}", key, child_key), default, out);
            }
        }
    }
}

/// Image references in the backgrounds document: (section, field, url).
///
/// Accepts both `{"sections": {name: {field: url}}}` and the flat
/// `{name: {field: url}}` layout. Only values naming an image file count.
pub fn extract_image_refs(document: &Value) -> Vec<(String, String, String)> {
    let sections = match document.get("sections") {
        Some(Value::Object(sections)) => sections,
        _ => match document.as_object() {
            Some(sections) => sections,
            None => return Vec::new(),
        },
    };

    let mut refs = Vec::new();
    for (section, fields) in sections {
        let Some(fields) = fields.as_object() else {
            continue;
        };
        for (field, value) in fields {
            if let Some(url) = value.as_str() {
                let url = url.trim();
                if !url.is_empty() && has_allowed_extension(url_path(url)) {
                    refs.push((section.clone(), field.clone(), url.to_string()));
                }
            }
        }
    }
    refs
}

fn url_path(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn file_name_of(url: &str) -> &str {
    url_path(url).rsplit('/').next().unwrap_or(url)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct MigrationReport {
    pub skipped: bool,
    pub previous_version: Option<i64>,
    pub cleared_entries: u64,
    pub entries: usize,
    pub images: usize,
    pub visibility_flags: usize,
    pub files_migrated: Vec<String>,
    pub files_skipped: Vec<String>,
}

/// Import the legacy documents under `data_dir`, unless this pipeline version
/// already ran.
pub async fn migrate(db: &Database, data_dir: &Path) -> Result<MigrationReport> {
    let mut tx = db.pool().begin().await?;

    let previous_version = stored_version(&mut tx).await?;
    if let Some(previous) = previous_version {
        if previous >= MIGRATION_VERSION {
            if previous > MIGRATION_VERSION {
                warn!(
                    "Stored migration version {} is newer than {}, leaving content alone",
                    previous, MIGRATION_VERSION
                );
            } else {
                info!("Migration v{} already applied, skipping", previous);
            }
            return Ok(MigrationReport {
                skipped: true,
                previous_version,
                ..Default::default()
            });
        }
    }

    info!(
        "Migrating legacy JSON content from {} (v{:?} -> v{})",
        data_dir.display(),
        previous_version,
        MIGRATION_VERSION
    );

    match run_migration(&mut tx, db.default_language(), data_dir, previous_version).await {
        Ok(report) => {
            tx.commit().await.context("Failed to commit migration")?;
            info!(
                "Migration complete: {} entries, {} images, {} visibility flags",
                report.entries, report.images, report.visibility_flags
            );
            Ok(report)
        }
        Err(e) => {
            error!("Migration failed: {:#}", e);
            tx.rollback().await.context("Failed to roll back migration")?;
            Err(e).context("Migration failed and was rolled back")
        }
    }
}

async fn stored_version(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    if let Some(version) = db::read_setting(conn, MIGRATION_VERSION_KEY).await? {
        let version = version
            .trim()
            .parse()
            .with_context(|| format!("Invalid stored migration version '{}'", version))?;
        return Ok(Some(version));
    }

    // Installations migrated before versioning only carry the completion flag
    let completed = db::read_setting(conn, MIGRATION_COMPLETED_KEY)
        .await?
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    Ok(completed.then_some(1))
}

async fn run_migration(
    conn: &mut SqliteConnection,
    default: Language,
    data_dir: &Path,
    previous_version: Option<i64>,
) -> Result<MigrationReport> {
    let mut report = MigrationReport {
        previous_version,
        ..Default::default()
    };

    if previous_version.is_some() {
        report.cleared_entries = db::delete_all_content(conn).await?;
        warn!(
            "Cleared {} content entries for re-migration",
            report.cleared_entries
        );
    }

    for (filename, section) in LEGACY_CONTENT_FILES {
        let Some(document) = read_document(&data_dir.join(filename)).await else {
            report.files_skipped.push(filename.to_string());
            continue;
        };

        let node = ContentNode::decode(document, default);
        let entries = flatten_document(&node, default);
        for entry in &entries {
            upsert_entry(conn, section, &entry.key, &entry.values, entry.data_type).await?;
        }

        info!("Migrated {} entries from {}", entries.len(), filename);
        report.entries += entries.len();
        report.files_migrated.push(filename.to_string());
    }

    if let Some(document) = read_document(&data_dir.join(BACKGROUNDS_FILE)).await {
        for (section, field, url) in extract_image_refs(&document) {
            let original = file_name_of(&url);
            let filename = format!("{}_{}_{}", section, field, original);
            let image = NewImage {
                filename: &filename,
                original_filename: original,
                url: &url,
                section: &section,
                field: &field,
                ..Default::default()
            };
            if db::insert_image_if_absent(conn, &image).await? {
                report.images += 1;
            }
        }
        report.files_migrated.push(BACKGROUNDS_FILE.to_string());
    } else {
        report.files_skipped.push(BACKGROUNDS_FILE.to_string());
    }

    if let Some(document) = read_document(&data_dir.join(VISIBILITY_FILE)).await {
        if let Some(sections) = document.get("sections").and_then(Value::as_object) {
            for (section, visible) in sections {
                let Some(visible) = visible.as_bool() else {
                    warn!("Ignoring non-boolean visibility for section {}", section);
                    continue;
                };
                upsert_setting(
                    conn,
                    &format!("{}{}", SECTION_VISIBLE_PREFIX, section),
                    if visible { "true" } else { "false" },
                    ValueType::Bool,
                    Some(&format!("Visibility of section {}", section)),
                )
                .await?;
                report.visibility_flags += 1;
            }
        }
        report.files_migrated.push(VISIBILITY_FILE.to_string());
    } else {
        report.files_skipped.push(VISIBILITY_FILE.to_string());
    }

    upsert_setting(
        conn,
        MIGRATION_VERSION_KEY,
        &MIGRATION_VERSION.to_string(),
        ValueType::Int,
        Some("Version of the JSON to SQLite content migration"),
    )
    .await?;
    upsert_setting(
        conn,
        MIGRATION_COMPLETED_KEY,
        "true",
        ValueType::Bool,
        Some("JSON to SQLite migration finished"),
    )
    .await?;
    upsert_setting(
        conn,
        "migration_date",
        &Utc::now().to_rfc3339(),
        ValueType::String,
        Some("When the migration last ran"),
    )
    .await?;

    Ok(report)
}

/// Read and parse one legacy document. Missing, unreadable and malformed
/// files are logged and yield `None`.
async fn read_document(path: &Path) -> Option<Value> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Legacy file not found: {}", path.display());
            return None;
        }
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(document) => Some(document),
        Err(e) => {
            error!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

/// Seed a fresh installation that had no legacy documents to import.
/// Does nothing when the store already holds content.
pub async fn create_default_data(db: &Database) -> Result<bool> {
    if db.count_entries().await? > 0 {
        return Ok(false);
    }

    info!("Seeding default content for a new installation");

    let hero: [(&str, [&str; 3]); 5] = [
        (
            "slogan",
            ["Balance in every drop", "Līdzsvars katrā pilienā", "Balance in every drop"],
        ),
        (
            "subtitle",
            [
                "Персонализированные масла на основе технологий AuraCloud® 3D и ДНК-тестирования",
                "Personalizētas eļļas, pamatojoties uz AuraCloud® 3D un DNS testēšanas tehnoloģijām",
                "Personalized oils based on AuraCloud® 3D and DNA testing technologies",
            ],
        ),
        ("cta_primary", ["Подобрать масло", "Izvēlēties eļļu", "Select Oil"]),
        ("cta_secondary", ["Записаться", "Pierakstīties", "Book Appointment"]),
        ("scroll_text", ["Прокрутите вниз", "Ritiniet uz leju", "Scroll down"]),
    ];

    for (key, [ru, lv, en]) in hero {
        let values = LocalizedValues::new()
            .with(Language::RUSSIAN, ru)
            .with(Language::LATVIAN, lv)
            .with(Language::ENGLISH, en);
        db.set("hero", key, &values, DataType::Text).await?;
    }

    db.set_setting(
        "default_language",
        db.default_language().code(),
        ValueType::String,
        Some("Default language"),
    )
    .await?;
    db.set_setting(
        "auto_translation_enabled",
        "false",
        ValueType::Bool,
        Some("Automatic translation"),
    )
    .await?;
    for section in SECTIONS {
        db.set_section_visibility(section, true).await?;
    }

    Ok(true)
}
