//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use chatwin::logging::LogBuffer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::{self, AppState, SharedManager};

/// Build the full axum router.
///
/// The router serves the settings, statistics, message and maintenance
/// endpoints under `/api/*`.
pub fn build_router(manager: SharedManager, logs: LogBuffer) -> Router {
    let app_state = AppState { manager, logs };

    // CORS layer for a settings page served from a different origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/settings",
            get(api::get_settings).patch(api::patch_settings),
        )
        .route("/api/settings/reset", post(api::reset_settings))
        .route("/api/stats", get(api::get_stats))
        .route(
            "/api/conversations/{id}/stats",
            get(api::get_conversation_stats),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(api::get_messages).post(api::post_message),
        )
        .route(
            "/api/conversations/{id}/cleanup",
            post(api::post_conversation_cleanup),
        )
        .route("/api/cleanup", post(api::post_history_cleanup))
        .route("/api/logs", get(api::get_logs))
        .with_state(app_state)
        .layer(cors)
}

/// Bind the listener, spawn the server and return the bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> Result<SocketAddr, String> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("Failed to bind {bind_addr}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {e}"))?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Web server stopped: {e}");
        }
    });

    info!("Serving history API on http://{addr}");
    Ok(addr)
}
