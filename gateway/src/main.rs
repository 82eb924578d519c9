use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tracing::{info, warn};

use gateway::{
    build_router, cache::CacheStore, config::ServerConfig, coordinator::TtsCoordinator, AppState,
};
use tts_core::{RemoteSynthesizer, Synthesizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    let cache = CacheStore::from_config(&config);
    if let Err(e) = cache.init() {
        warn!("Could not prepare cache directory: {e}");
    }

    let synthesizer: Arc<dyn Synthesizer> = Arc::new(match config.backend_timeout() {
        Some(timeout) => RemoteSynthesizer::with_timeout(&config.backend_url, timeout)?,
        None => RemoteSynthesizer::new(&config.backend_url)?,
    });

    log_banner(&config);

    let state = AppState::new(TtsCoordinator::new(config.clone(), cache, synthesizer));
    spawn_limiter_sweeper(&state, config.rate_limit_window());

    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

fn log_banner(config: &ServerConfig) {
    info!("{}", "=".repeat(60));
    info!("TTS Gateway");
    info!("{}", "=".repeat(60));
    info!("Port: {}", config.port);
    if config.cache_enabled {
        info!(
            "Cache: Enabled ({}, max {}MB)",
            config.cache_dir.display(),
            config.cache_max_size_mb
        );
    } else {
        info!("Cache: Disabled");
    }
    if config.rate_limit_requests > 0 {
        info!(
            "Rate Limit: {} requests per {}s",
            config.rate_limit_requests, config.rate_limit_window_secs
        );
    } else {
        info!("Rate Limit: Disabled");
    }
    info!("Max Text Length: {} characters", config.max_text_length);
    info!(
        "API Key: {}",
        if config.api_key.is_some() { "Required" } else { "Not required" }
    );
    info!("Allowed Origins: {}", config.allowed_origins.join(", "));
    info!("Synthesis Backend: {}", config.backend_url);
    info!("Endpoints:");
    info!("  POST /tts - Generate speech");
    info!("  GET /health - Health check");
    info!("  GET /stats - Statistics");
    info!("  GET /metrics - Detailed metrics");
    info!("{}", "=".repeat(60));
}

/// Periodically forget clients whose window has fully expired.
fn spawn_limiter_sweeper(state: &AppState, window: Duration) {
    if !state.coordinator.limiter().is_enabled() {
        return;
    }
    let coordinator = state.coordinator.clone();
    let period = window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let purged = coordinator.limiter().purge_idle(std::time::Instant::now());
            if purged > 0 {
                tracing::debug!("Purged {} idle rate-limit entries", purged);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
