//! REST API endpoint handlers.
//!
//! The manager's operations are synchronous and may touch the filesystem, so
//! every handler that reaches the store runs it on the blocking pool.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chatwin::Message;
use chatwin::config::{HistorySettings, SettingsUpdate};
use chatwin::context::{
    ConversationSize, HistoryCleanupReport, HistoryManager, HistorySize, LimitUsage,
};
use chatwin::logging::{LogBuffer, LogLine};
use chatwin::store::ConversationStore;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Store handle shared by the server and whoever else writes conversations.
pub type SharedStore = Arc<dyn ConversationStore + Send + Sync>;

/// The manager as held by the web server.
pub type SharedManager = Arc<HistoryManager<SharedStore>>;

/// Number of log lines returned when `/api/logs` gets no `limit`.
pub const DEFAULT_LOG_LIMIT: usize = 200;

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub manager: SharedManager,
    pub logs: LogBuffer,
}

async fn run_blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("Blocking task failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ── Settings ───────────────────────────────────────────────────────

/// GET /api/settings: Current settings.
pub async fn get_settings(State(app): State<AppState>) -> Json<HistorySettings> {
    Json(app.manager.settings())
}

/// PATCH /api/settings: Apply a partial update.
///
/// Numeric values are clamped to their documented ranges before they are
/// applied. Unknown keys are rejected with 422.
pub async fn patch_settings(
    State(app): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<HistorySettings> {
    Json(app.manager.update_settings(update.clamped()))
}

/// POST /api/settings/reset: Restore defaults.
pub async fn reset_settings(State(app): State<AppState>) -> Json<HistorySettings> {
    Json(app.manager.reset_settings())
}

// ── Statistics ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryStats {
    pub size: HistorySize,
    pub usage: LimitUsage,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ConversationStats {
    pub conversation: String,
    pub size: ConversationSize,
    pub usage: LimitUsage,
}

/// GET /api/stats: Whole-history size and global budget usage.
pub async fn get_stats(State(app): State<AppState>) -> Result<Json<HistoryStats>, StatusCode> {
    let manager = app.manager.clone();
    let stats = run_blocking(move || HistoryStats {
        size: manager.get_total_history_size(),
        usage: manager.history_usage(),
    })
    .await?;
    Ok(Json(stats))
}

/// GET /api/conversations/{id}/stats: One conversation's size and usage.
///
/// Returns 404 for an unknown id, 500 when the store cannot be read.
pub async fn get_conversation_stats(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationStats>, StatusCode> {
    let manager = app.manager.clone();
    run_blocking(move || {
        match manager.store().get(&id) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(StatusCode::NOT_FOUND),
            Err(e) => {
                error!(conversation = %id, "Stats unavailable: {e}");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        Ok(Json(ConversationStats {
            size: manager.get_conversation_size(&id),
            usage: manager.conversation_usage(&id),
            conversation: id,
        }))
    })
    .await?
}

// ── Messages ───────────────────────────────────────────────────────

/// POST /api/conversations/{id}/messages: Record a message.
///
/// Returns 201 with the message as stored (possibly truncated), or 500 when
/// the store rejected the write.
pub async fn post_message(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(message): Json<Message>,
) -> Result<(StatusCode, Json<Message>), StatusCode> {
    let manager = app.manager.clone();
    match run_blocking(move || manager.record_message(&id, message)).await? {
        Some(stored) => Ok((StatusCode::CREATED, Json(stored))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/conversations/{id}/messages: Messages ready for the model.
pub async fn get_messages(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let manager = app.manager.clone();
    let messages = run_blocking(move || manager.messages_for_api(&id)).await?;
    Ok(Json(messages))
}

// ── Cleanup ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug)]
pub struct ConversationCleanup {
    pub conversation: String,
    pub cleaned: bool,
    pub size: ConversationSize,
}

/// POST /api/conversations/{id}/cleanup: Enforce the per-conversation limit.
pub async fn post_conversation_cleanup(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationCleanup>, StatusCode> {
    let manager = app.manager.clone();
    let result = run_blocking(move || ConversationCleanup {
        cleaned: manager.cleanup_conversation_if_needed(&id),
        size: manager.get_conversation_size(&id),
        conversation: id,
    })
    .await?;
    Ok(Json(result))
}

/// POST /api/cleanup: Enforce the global budget.
pub async fn post_history_cleanup(
    State(app): State<AppState>,
) -> Result<Json<HistoryCleanupReport>, StatusCode> {
    let manager = app.manager.clone();
    let report = run_blocking(move || manager.cleanup_history_if_needed()).await?;
    Ok(Json(report))
}

// ── Logs ───────────────────────────────────────────────────────────

/// Query string for GET /api/logs.
#[derive(Deserialize, Debug, Default)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/logs: Most recent captured log lines, oldest first.
pub async fn get_logs(
    State(app): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogLine>> {
    Json(app.logs.recent(query.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_query_limit_is_optional() {
        let query: LogsQuery = serde_json::from_str("{}").unwrap();
        assert!(query.limit.is_none());
        let query: LogsQuery = serde_json::from_str(r#"{"limit": 5}"#).unwrap();
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn conversation_stats_serializes_nested() {
        let stats = ConversationStats {
            conversation: "c1".into(),
            size: ConversationSize::default(),
            usage: LimitUsage::new(10, 50),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["conversation"], "c1");
        assert_eq!(json["size"]["message_count"], 0);
        assert_eq!(json["usage"]["limit"], 50);
    }
}
