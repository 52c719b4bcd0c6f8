use crate::db::{expand_dotted, ContentStore};
use crate::error::AppError;
use crate::i18n::{Language, LocaleRequest};
use crate::migration::SECTIONS;
use crate::render::{as_list, language_links, navigation, ui_strings};
use crate::server::SharedState;
use crate::session::{locale_cookie, session_locale};
use anyhow::Result;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info};

/// Slider content lives in its own section but renders inside personalization.
const SLIDER_SECTION: &str = "auracloud_slider";

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(index))
        .route("/catalog", get(catalog))
        .route(
            "/set_language/:lang",
            get(set_language_redirect).post(set_language),
        )
        .route("/health", get(health))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    lang: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RedirectQuery {
    next: Option<String>,
}

/// The socket peer, or the first `X-Forwarded-For` hop when the peer is a
/// trusted proxy.
fn client_ip(
    headers: &HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let peer = connect.map(|ConnectInfo(addr)| addr.ip())?;
    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }

    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or(Some(peer))
}

async fn resolve_locale(
    state: &SharedState,
    headers: &HeaderMap,
    query: &PageQuery,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> Language {
    let session = session_locale(headers, &state.config.secret_key);
    let accept_language = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok());

    state
        .resolver
        .resolve(&LocaleRequest {
            query: query.lang.as_deref(),
            session: session.as_deref(),
            accept_language,
            client_ip: client_ip(headers, connect, &state.config.trusted_proxies),
        })
        .await
}

fn with_locale_cookie(state: &SharedState, locale: Language, body: impl IntoResponse) -> Response {
    let cookie = locale_cookie(
        locale,
        &state.config.secret_key,
        state.config.session_lifetime_secs,
    );
    ([(header::SET_COOKIE, cookie)], body).into_response()
}

/// Visibility of every known section; sections without a flag are shown.
pub(crate) async fn visible_sections(state: &SharedState) -> Result<Map<String, Value>> {
    let stored = state.db.section_visibility().await?;
    Ok(SECTIONS
        .iter()
        .map(|section| {
            let visible = stored.get(*section).copied().unwrap_or(true);
            (section.to_string(), Value::Bool(visible))
        })
        .collect())
}

/// Context shared by every page: locale, navigation, company, footer.
async fn base_context(
    state: &SharedState,
    locale: Language,
    current_path: &str,
    visible: &Map<String, Value>,
) -> tera::Context {
    let ui = ui_strings(&state.translations, locale).await;

    let mut context = tera::Context::new();
    context.insert("locale", locale.code());
    context.insert("languages", &language_links(locale));
    context.insert("company", &state.config.company);
    context.insert("nav", &navigation(&ui, visible));
    context.insert("ui", &ui);
    context.insert("visible", visible);
    context.insert("current_path", current_path);
    context.insert("year", &Utc::now().year());
    context
}

async fn section_content(state: &SharedState, section: &str, locale: Language) -> Result<Value> {
    let flat = state.db.get_section(section, locale).await?;
    Ok(Value::Object(expand_dotted(&flat)))
}

async fn section_images(state: &SharedState) -> Result<Map<String, Value>> {
    let mut images: Map<String, Value> = SECTIONS
        .iter()
        .map(|section| (section.to_string(), Value::Object(Map::new())))
        .collect();

    for image in state.db.list_images().await? {
        if let Value::Object(fields) = images
            .entry(image.section.clone())
            .or_insert_with(|| Value::Object(Map::new()))
        {
            fields.insert(image.field, Value::String(image.url));
        }
    }
    Ok(images)
}

pub async fn index(
    State(state): State<SharedState>,
    Query(query): Query<PageQuery>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let locale = resolve_locale(&state, &headers, &query, connect).await;
    let visible = visible_sections(&state).await?;
    let mut context = base_context(&state, locale, "/", &visible).await;

    let mut sections = Map::new();
    for section in SECTIONS.iter().copied().chain([SLIDER_SECTION]) {
        let shown = visible.get(section).and_then(Value::as_bool).unwrap_or(true);
        let content = if shown {
            section_content(&state, section, locale).await?
        } else {
            Value::Object(Map::new())
        };
        sections.insert(section.to_string(), content);
    }

    let lists = json!({
        "about_features": as_list(sections["about"].get("features")),
        "products": as_list(sections["products"].get("products")),
        "services": as_list(sections["services"].get("services")),
        "slides": as_list(sections[SLIDER_SECTION].get("slides")),
        "reviews": as_list(sections["reviews"].get("reviews")),
        "articles": as_list(sections["blog"].get("articles")),
    });

    for (name, content) in &sections {
        context.insert(name.as_str(), content);
    }
    context.insert("lists", &lists);
    context.insert("images", &section_images(&state).await?);

    let html = state.templates.render("index.html", &context)?;
    debug!("Rendered landing page in {}", locale);
    Ok(with_locale_cookie(&state, locale, Html(html)))
}

pub async fn catalog(
    State(state): State<SharedState>,
    Query(query): Query<PageQuery>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let locale = resolve_locale(&state, &headers, &query, connect).await;
    let visible = visible_sections(&state).await?;
    let mut context = base_context(&state, locale, "/catalog", &visible).await;

    let products = state
        .db
        .get("products", "products", locale, Value::Array(Vec::new()))
        .await?;
    let background = state
        .db
        .image_for("products", "image_url")
        .await?
        .map(|image| image.url);

    context.insert("products", &as_list(Some(&products)));
    context.insert("background", &background);

    let html = state.templates.render("catalog.html", &context)?;
    Ok(with_locale_cookie(&state, locale, Html(html)))
}

/// POST form of the language switch, for scripts.
pub async fn set_language(
    State(state): State<SharedState>,
    Path(lang): Path<String>,
) -> Result<Response, AppError> {
    let language = Language::parse(&lang).ok_or(AppError::UnsupportedLanguage)?;
    info!("Language switched to {}", language);

    Ok(with_locale_cookie(
        &state,
        language,
        Json(json!({"status": "success", "language": language.code()})),
    ))
}

/// GET form: switch, then send the visitor back where they came from.
pub async fn set_language_redirect(
    State(state): State<SharedState>,
    Path(lang): Path<String>,
    Query(query): Query<RedirectQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let language = Language::parse(&lang).ok_or(AppError::UnsupportedLanguage)?;

    let target = query
        .next
        .filter(|next| is_local_path(next))
        .or_else(|| same_site_referer(&headers))
        .unwrap_or_else(|| "/".to_string());

    let location = HeaderValue::from_str(&target).unwrap_or_else(|_| HeaderValue::from_static("/"));
    let cookie = locale_cookie(
        language,
        &state.config.secret_key,
        state.config.session_lifetime_secs,
    );

    Ok((
        StatusCode::SEE_OTHER,
        [(header::LOCATION, location), (header::SET_COOKIE, cookie)],
    )
        .into_response())
}

/// Relative path on this site: `/x`, not `//host` or `/\host`.
pub fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}

/// Path and query of the `Referer` when it points at this host.
fn same_site_referer(headers: &HeaderMap) -> Option<String> {
    let referer = headers.get(header::REFERER)?.to_str().ok()?;
    let host = headers.get(header::HOST)?.to_str().ok()?;

    let url = reqwest::Url::parse(referer).ok()?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", url.host_str()?, port),
        None => url.host_str()?.to_string(),
    };
    if !authority.eq_ignore_ascii_case(host) {
        debug!("Ignoring cross-site referer {}", referer);
        return None;
    }

    let target = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    is_local_path(&target).then_some(target)
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "OilFusion Landing"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local_path() {
        assert!(is_local_path("/"));
        assert!(is_local_path("/catalog?lang=en"));
        assert!(!is_local_path("//evil.example"));
        assert!(!is_local_path("/\\evil.example"));
        assert!(!is_local_path("https://evil.example/"));
        assert!(!is_local_path("catalog"));
    }

    #[test]
    fn test_same_site_referer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("oilfusion.lv"));
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://oilfusion.lv/catalog?x=1"),
        );
        assert_eq!(same_site_referer(&headers).as_deref(), Some("/catalog?x=1"));

        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://evil.example/phish"),
        );
        assert_eq!(same_site_referer(&headers), None);
    }

    #[test]
    fn test_client_ip_trusts_forwarded_header_only_from_proxies() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("81.198.1.1, 10.0.0.1"));
        let peer = ConnectInfo("127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        let proxy: IpAddr = "127.0.0.1".parse().unwrap();

        assert_eq!(
            client_ip(&headers, Some(peer), &[proxy]),
            Some("81.198.1.1".parse().unwrap())
        );
        // Untrusted peers cannot claim another address
        assert_eq!(
            client_ip(&headers, Some(peer), &[]),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer), &[proxy]),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(client_ip(&headers, None, &[proxy]), None);
    }
}
