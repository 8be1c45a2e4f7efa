//! HTTP server implementation using Axum.

use crate::handlers;
use axum::{
    routing::{delete, get, post},
    Router,
};
use burrow_core::{ExecutionEngine, PairingAuthority, Registry, StatusAggregator};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub engine: ExecutionEngine,
    pub pairing: Arc<PairingAuthority>,
    pub status: StatusAggregator,
}

/// Build the REST router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // CORS stays open: clients are LAN apps on arbitrary origins, and the
    // pairing code is the actual authorization boundary.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status
        .route("/api/status", get(handlers::status::get_status))
        .route("/api/info", get(handlers::status::get_connection_info))
        // Database management
        .route("/api/databases", get(handlers::databases::list_databases))
        .route("/api/databases", post(handlers::databases::create_database))
        .route(
            "/api/databases/:name",
            get(handlers::databases::get_database),
        )
        .route(
            "/api/databases/:name",
            delete(handlers::databases::delete_database),
        )
        // Query execution
        .route("/api/query", post(handlers::query::execute_query))
        // Pairing
        .route("/api/pair", post(handlers::pairing::open_session))
        .route("/api/pair/:id", delete(handlers::pairing::close_session))
        .route("/api/pairing-code", get(handlers::pairing::get_pairing_code))
        .route(
            "/api/pairing-code",
            post(handlers::pairing::regenerate_pairing_code),
        )
        .layer(cors)
        .with_state(state)
}

/// Bind and start serving in the background.
///
/// Returns the actual bound address (useful when port = 0) and records the
/// port on the status aggregator.
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    state.status.set_port(actual_addr.port());
    info!("REST API listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("REST API server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::EngineConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_starts_on_ephemeral_port() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::default();
        let registry = Arc::new(
            Registry::open(temp.path().to_path_buf(), config.clone())
                .await
                .unwrap(),
        );
        let pairing = Arc::new(PairingAuthority::new(config.session_idle_timeout));
        let state = Arc::new(AppState {
            engine: ExecutionEngine::new(registry.clone()),
            status: StatusAggregator::new(registry.clone(), pairing.clone()),
            registry,
            pairing,
        });

        let addr = start_server(state.clone(), "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
        assert_eq!(state.status.port(), addr.port());
    }
}
