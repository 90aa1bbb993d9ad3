//! Cipher Relay Server Library
//!
//! Real-time presence, public key directory and ciphertext relay for an
//! end-to-end encrypted chat. The server stores and forwards opaque bytes;
//! it never sees plaintext.

pub mod chat;
pub mod core;

use axum::http::HeaderValue;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::chat::RelayService;
use crate::core::config::{AppState, CorsOrigins, RelayConfig};
use crate::core::store::open_store;

/// Build the HTTP/WebSocket application for an already wired state.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .merge(core::router())
        .merge(chat::router(state.config.enable_developer_api))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    match origins {
        CorsOrigins::Any => CorsLayer::permissive(),
        CorsOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin '{}'", o);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(values))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let config = RelayConfig::from_env()?;

    // Initialize tracing
    let default_filter = config.environment.default_log_filter();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Cipher Relay ===");
    info!("Environment: {:?}", config.environment);
    info!("Storage: {}", config.database_url);

    // Refuse to serve without storage
    let store = open_store(&config.database_url).await?;
    store
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("storage unreachable at startup: {}", e))?;
    info!("Store ready");

    let relay = Arc::new(RelayService::new(store, &config));
    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        relay,
    };

    if config.enable_developer_api {
        info!("Developer endpoint enabled at /ws/developer");
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
