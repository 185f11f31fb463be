//! parley-server service entry point.

use anyhow::{Context, Result};
use parley_common::{init_logging, Config, GROUNDING_TOP_K, HISTORY_CAPACITY};
use parley_server::{
    build_router, AppState, ChatService, ConversationGateway, GeminiProvider, HealthProber,
    HttpClassifier, HttpImageFetcher, ImageGrounding, SessionRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    // Missing credentials are fatal before anything else starts
    let config = Config::from_env().context("Invalid configuration")?;
    init_logging(&config.observability);

    tracing::info!("Parley Server v{}", env!("CARGO_PKG_VERSION"));

    let gateway = ConversationGateway::new(Arc::new(GeminiProvider::new(config.gemini.clone())));
    let registry = SessionRegistry::new(gateway.clone(), config.sessions.clone(), HISTORY_CAPACITY);
    let grounding = ImageGrounding::new(
        Arc::new(HttpImageFetcher::new(
            config.images.fetch_timeout,
            config.server.max_upload_bytes,
        )),
        Arc::new(HttpClassifier::new(config.classifier.clone())),
        GROUNDING_TOP_K,
    );
    let chat = ChatService::new(registry.clone(), gateway, grounding);

    // Background tasks share one shutdown token
    let shutdown = CancellationToken::new();
    let prober = HealthProber::new(
        config.health.ping_url(),
        config.health.interval,
        config.health.timeout,
    )
    .spawn(shutdown.child_token());
    let sweeper = registry.spawn_sweeper(shutdown.child_token());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = build_router(AppState::new(chat, config.server.max_upload_bytes)).layer(cors);

    let addr = SocketAddr::new(config.server.host, config.server.port);

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Clean up on shutdown
    shutdown.cancel();
    let _ = tokio::join!(prober, sweeper);
    tracing::info!("Parley Server stopped");

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, or when `token` is cancelled elsewhere.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => {},
    }
    tracing::info!("Shutdown signal received");
    token.cancel();
}
