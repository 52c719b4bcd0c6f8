use anyhow::Result;
use oilfusion_landing::{config, server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("oilfusion_landing=info".parse()?),
        )
        .init();

    info!("Starting OilFusion landing");

    let config = config::Config::from_env()?;
    info!(
        "Default language: {}, auto translation: {}, geo-IP: {}",
        config.default_language, config.auto_translation_enabled, config.geoip_enabled
    );

    // Migration and seeding run before the listener binds
    let state = server::AppState::initialize(config).await?;

    server::serve(state).await
}
