//! JSON API over a chatwin history manager.
//!
//! `chatwin-web` exposes the settings page, statistics and maintenance
//! operations of a [`HistoryManager`](chatwin::context::HistoryManager) as an
//! axum REST API, plus the recent log lines captured by a
//! [`BufferLayer`](chatwin::logging::BufferLayer).
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatwin::prelude::*;
//! use chatwin_web::{SharedStore, WebConfig, spawn_web};
//!
//! # async fn run() -> Result<(), String> {
//! let store: SharedStore = Arc::new(JsonFileStore::new("conversations.json"));
//! let manager = Arc::new(HistoryManager::new(store, HistorySettings::default()));
//!
//! let addr = spawn_web(manager, LogBuffer::new(), WebConfig::default()).await?;
//! println!("History API: http://{addr}/api/stats");
//! # Ok(())
//! # }
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | `GET` | `/api/settings` | current settings |
//! | `PATCH` | `/api/settings` | partial update, clamped |
//! | `POST` | `/api/settings/reset` | restore defaults |
//! | `GET` | `/api/stats` | history size and global usage |
//! | `GET` | `/api/conversations/{id}/stats` | one conversation (404 if unknown) |
//! | `POST` | `/api/conversations/{id}/messages` | record a message |
//! | `GET` | `/api/conversations/{id}/messages` | messages ready for the model |
//! | `POST` | `/api/conversations/{id}/cleanup` | enforce the conversation limit |
//! | `POST` | `/api/cleanup` | enforce the global budget |
//! | `GET` | `/api/logs?limit=N` | recent captured log lines |

mod api;
mod server;

pub use api::{
    ConversationCleanup, ConversationStats, DEFAULT_LOG_LIMIT, HistoryStats, SharedManager,
    SharedStore,
};
pub use server::build_router;

use std::net::SocketAddr;

use chatwin::logging::LogBuffer;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
///
/// # Arguments
///
/// * `manager`: Shared history manager (the same instance the chat client
///   records messages through).
/// * `logs`: Buffer filled by a [`BufferLayer`](chatwin::logging::BufferLayer);
///   served at `/api/logs`.
/// * `config`: Server configuration.
pub async fn spawn_web(
    manager: SharedManager,
    logs: LogBuffer,
    config: WebConfig,
) -> Result<SocketAddr, String> {
    let router = server::build_router(manager, logs);
    server::start_server(router, config.bind_addr).await
}
