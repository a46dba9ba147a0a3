//! blogfed binary entry point

use std::time::Duration;

use blogfed::{AppState, config};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize AppState
/// 4. Start background tasks (queue worker, profile updates, cache pruning)
/// 5. Start HTTP server, stop the worker on shutdown
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);

    tracing::info!("Starting blogfed...");
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        blogs = config.blogs.len(),
        "Configuration loaded"
    );
    if !config.server.protocol.eq_ignore_ascii_case("https") {
        tracing::warn!(
            host = %config.server.public_hostname(),
            "Serving federation over plain http for local development"
        );
    }

    blogfed::metrics::init_metrics();

    // 3. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 4. Start background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = state.spawn_queue_worker(shutdown_rx.clone());
    spawn_profile_updates(
        state.clone(),
        Duration::from_secs(config.federation.profile_update_delay_secs),
    );
    if state.resolver.caching_enabled() {
        spawn_actor_cache_pruning(
            state.clone(),
            Duration::from_secs(config.federation.actor_cache_ttl_secs),
            shutdown_rx,
        );
    }

    // 5. Start HTTP server
    let app = blogfed::build_router(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Pending deliveries stay on disk for the next start
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Delivery worker ended abnormally");
    }
    tracing::info!(pending = state.queue.len().await, "Shutdown complete");

    Ok(())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("blogfed={},tower_http={}", logging.level, logging.level).into()
    });

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Broadcast every blog's Person document once, shortly after startup
fn spawn_profile_updates(state: AppState, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        tracing::info!("Sending profile updates...");
        if let Err(e) = state.publisher.send_profile_updates().await {
            tracing::error!(error = %e, "Profile updates failed");
        }
    });
}

/// Spawn background actor cache pruning
fn spawn_actor_cache_pruning(state: AppState, every: Duration, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Some(cache) = state.resolver.cache() {
                        cache.prune_expired().await;
                    }
                }
            }
        }
    });

    tracing::info!("Actor cache pruning task spawned");
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
