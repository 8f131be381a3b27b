use std::net::SocketAddr;

use tracing::info;
use yatube_app::{auth::SessionSigner, cache::PageCache, media::MediaStore, router, telemetry};
use yatube_storage::Database;
use yatube_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    tokio::fs::create_dir_all(&config.media_root).await?;

    let state = router::AppState::new(
        metrics,
        storage,
        SessionSigner::new(config.session_secret.clone(), config.session_max_age),
        PageCache::new(config.index_cache_ttl),
        MediaStore::new(config.media_root.clone()).with_upload_limit(config.max_upload_bytes),
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "http", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
