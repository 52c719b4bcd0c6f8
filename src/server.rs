use crate::config::Config;
use crate::db::Database;
use crate::i18n::{GeoIpLocator, LocaleResolver};
use crate::migration;
use crate::render::{self, Templates};
use crate::routes;
use crate::translation::{HttpTranslationProvider, TranslationManager};
use crate::uploads::UploadStore;
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// URL prefix under which uploaded images are served.
pub const UPLOAD_URL_PREFIX: &str = "/static/img";

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub translations: TranslationManager,
    pub resolver: LocaleResolver,
    pub templates: Templates,
    pub uploads: UploadStore,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Open storage, run the legacy import and wire up every service.
    pub async fn initialize(config: Config) -> Result<SharedState> {
        let db = Database::new(&config.database_url, config.default_language).await?;

        let report = migration::migrate(&db, &config.data_dir).await?;
        if !report.skipped && db.count_entries().await? == 0 {
            migration::create_default_data(&db).await?;
        }

        let provider = match &config.translation_api_url {
            Some(url) => Some(HttpTranslationProvider::new(
                url.clone(),
                config.translation_api_key.clone(),
                Duration::from_secs(10),
            )?),
            None => {
                if config.auto_translation_enabled {
                    warn!("AUTO_TRANSLATION_ENABLED is set but TRANSLATION_API_URL is not; auto translation stays off");
                }
                None
            }
        };
        let translations = TranslationManager::open(
            config.translations_path(),
            config.default_language,
            provider,
            config.auto_translation_enabled,
        )
        .await?;
        render::seed_ui_translations(&translations).await?;

        let mut resolver = LocaleResolver::new(config.default_language)
            .with_accept_language(config.accept_language_enabled);
        if config.geoip_enabled {
            resolver = resolver.with_geoip(GeoIpLocator::new(
                &config.geoip_api_url,
                config.geoip_timeout,
                config.geoip_cache_size,
            )?);
        }

        let templates = Templates::load(config.templates_dir.as_deref())?;

        if config.upload_dir != config.static_dir.join("img") {
            warn!(
                "UPLOAD_DIR {} is outside STATIC_DIR/img; uploaded images will not be served under {}",
                config.upload_dir.display(),
                UPLOAD_URL_PREFIX
            );
        }
        let uploads = UploadStore::new(config.upload_dir.clone(), UPLOAD_URL_PREFIX);

        Ok(Arc::new(Self {
            config,
            db,
            translations,
            resolver,
            templates,
            uploads,
        }))
    }
}

pub fn build_router(state: SharedState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .merge(routes::public::router())
        .nest("/admin", routes::admin::router(state.clone()))
        .nest_service("/static", static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: SharedState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .context("Invalid HOST/PORT")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
