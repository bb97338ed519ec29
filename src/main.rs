use booru_dedup::{create_router, init, AppState, Config, MemoryFingerprintStorage, MemoryPostStore};

use anyhow::Context;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init(&config)?;

    // The catalog handle is built once here and passed down explicitly
    let catalog = match &config.catalog_path {
        Some(path) => MemoryFingerprintStorage::load_snapshot(path)
            .await
            .with_context(|| format!("loading catalog snapshot {}", path.display()))?,
        None => MemoryFingerprintStorage::new(),
    };
    // New post ids must not collide with restored catalog records
    let posts = MemoryPostStore::resuming(&catalog).await;
    let state = AppState::new(config.clone(), Arc::new(catalog), Arc::new(posts));

    let app = create_router(state.clone());

    // Set up the server
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    log::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.save_catalog().await?;
    log::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}
