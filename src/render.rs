//! HTML rendering with Tera.
//!
//! Templates ship inside the binary; `TEMPLATES_DIR` swaps in a directory of
//! `*.html` files for local theming. Interface strings that do not belong to
//! any content section (navigation, footer) go through the translation
//! manager so admins can correct them per locale.

use crate::i18n::Language;
use crate::translation::{TranslationManager, TranslationProvider};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;
use tera::Tera;
use tracing::{info, warn};

const BASE_TEMPLATE: &str = include_str!("../templates/base.html");
const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");
const CATALOG_TEMPLATE: &str = include_str!("../templates/catalog.html");

pub struct Templates {
    tera: Tera,
}

impl Templates {
    pub fn embedded() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("base.html", BASE_TEMPLATE),
            ("index.html", INDEX_TEMPLATE),
            ("catalog.html", CATALOG_TEMPLATE),
        ])
        .context("Failed to compile built-in templates")?;
        Ok(Self { tera })
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let pattern = format!("{}/**/*.html", dir.display());
        let tera = Tera::new(&pattern)
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?;
        info!("Loaded templates from {}", dir.display());
        Ok(Self { tera })
    }

    pub fn load(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::embedded(),
        }
    }

    pub fn render(&self, name: &str, context: &tera::Context) -> Result<String> {
        self.tera
            .render(name, context)
            .with_context(|| format!("Failed to render {}", name))
    }
}

/// Interface string: translation key plus built-in ru / lv / en texts.
struct UiString {
    key: &'static str,
    ru: &'static str,
    lv: &'static str,
    en: &'static str,
}

impl UiString {
    fn text(&self, language: Language) -> &'static str {
        match language.code() {
            "lv" => self.lv,
            "en" => self.en,
            _ => self.ru,
        }
    }
}

const UI_STRINGS: &[UiString] = &[
    UiString { key: "nav_about", ru: "О нас", lv: "Par mums", en: "About" },
    UiString { key: "nav_products", ru: "Продукция", lv: "Produkti", en: "Products" },
    UiString { key: "nav_services", ru: "Услуги", lv: "Pakalpojumi", en: "Services" },
    UiString {
        key: "nav_personalization",
        ru: "Персонализация",
        lv: "Personalizācija",
        en: "Personalization",
    },
    UiString { key: "nav_reviews", ru: "Отзывы", lv: "Atsauksmes", en: "Reviews" },
    UiString { key: "nav_blog", ru: "Блог", lv: "Blogs", en: "Blog" },
    UiString { key: "nav_contacts", ru: "Контакты", lv: "Kontakti", en: "Contacts" },
    UiString { key: "catalog_title", ru: "Каталог продукции", lv: "Produktu katalogs", en: "Product catalog" },
    UiString {
        key: "catalog_empty",
        ru: "Каталог пока пуст",
        lv: "Katalogs pagaidām ir tukšs",
        en: "The catalog is empty for now",
    },
    UiString {
        key: "footer_rights",
        ru: "Все права защищены.",
        lv: "Visas tiesības aizsargātas.",
        en: "All rights reserved.",
    },
];

/// Section anchors linked from the navigation bar, in page order.
const NAV_SECTIONS: &[&str] = &[
    "about",
    "products",
    "services",
    "personalization",
    "reviews",
    "blog",
    "contacts",
];

fn translation_key(key: &str) -> String {
    format!("ui.{}", key)
}

/// Register the interface strings and fill in built-in translations that are
/// still missing. Existing translations, manual or auto, are left alone.
pub async fn seed_ui_translations<P: TranslationProvider>(
    translations: &TranslationManager<P>,
) -> Result<()> {
    let default = translations.default_language();

    for ui in UI_STRINGS {
        let key = translation_key(ui.key);
        translations.ensure_entry(&key, ui.text(default)).await?;

        for language in Language::all().into_iter().filter(|l| *l != default) {
            if translations.get_translation(&key, language).await.is_none() {
                translations
                    .set_manual_translation(&key, language, ui.text(language))
                    .await?;
            }
        }
    }
    Ok(())
}

/// Interface strings for `locale`. Lookup failures fall back to the built-in
/// text.
pub async fn ui_strings<P: TranslationProvider>(
    translations: &TranslationManager<P>,
    locale: Language,
) -> Map<String, Value> {
    let default = translations.default_language();
    let mut strings = Map::new();

    for ui in UI_STRINGS {
        let text = match translations
            .get_text(&translation_key(ui.key), ui.text(default), locale)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Translation lookup for {} failed: {:#}", ui.key, e);
                ui.text(locale).to_string()
            }
        };
        strings.insert(ui.key.to_string(), Value::String(text));
    }
    strings
}

/// Navigation entries for the sections that are visible.
pub fn navigation(ui: &Map<String, Value>, visible: &Map<String, Value>) -> Vec<Value> {
    NAV_SECTIONS
        .iter()
        .filter(|section| visible.get(**section).and_then(Value::as_bool).unwrap_or(true))
        .map(|section| {
            let label = ui
                .get(&format!("nav_{}", section))
                .cloned()
                .unwrap_or_else(|| Value::String(section.to_string()));
            serde_json::json!({"href": format!("/#{}", section), "label": label})
        })
        .collect()
}

/// Language switcher entries, `active` marking `current`.
pub fn language_links(current: Language) -> Vec<Value> {
    Language::all()
        .into_iter()
        .map(|lang| {
            serde_json::json!({
                "code": lang.code(),
                "label": lang.label(),
                "name": lang.name(),
                "native_name": lang.native_name(),
                "active": lang == current,
            })
        })
        .collect()
}

/// `value` when it is an array, otherwise an empty list.
pub fn as_list(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Array(items)) => Value::Array(items.clone()),
        _ => Value::Array(Vec::new()),
    }
}
