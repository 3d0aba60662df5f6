//! History maintenance server over a JSON conversation store.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p chatwin-web
//! cargo run -p chatwin-web -- --port 8080 --store ~/.chat/conversations.json
//! cargo run -p chatwin-web -- --settings limits.json --verbose
//! ```
//!
//! Then, for example:
//!
//! ```bash
//! curl localhost:3001/api/stats
//! curl -X PATCH localhost:3001/api/settings -H 'content-type: application/json' \
//!   -d '{"strategy": "token_budget", "max_total_tokens": 60000}'
//! curl -X POST localhost:3001/api/cleanup
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chatwin::config::{HistorySettings, SettingsUpdate};
use chatwin::context::HistoryManager;
use chatwin::logging::BufferLayer;
use chatwin::store::JsonFileStore;
use chatwin_web::{SharedStore, WebConfig, spawn_web};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// History maintenance server.
#[derive(Parser)]
#[command(about = "JSON API for conversation-history settings and cleanup")]
struct Args {
    /// Port for the API server.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Path to the conversation store.
    #[arg(long, default_value = "conversations.json")]
    store: PathBuf,

    /// JSON file with initial settings (a partial update, clamped).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log eviction decisions to stderr.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    // 1. Logging: stderr for the operator, a buffer for /api/logs.
    let (buffer_layer, logs) = BufferLayer::new();
    let default = if args.verbose {
        "chatwin=debug,chatwin_web=debug"
    } else {
        "chatwin=info,chatwin_web=info"
    };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .with(buffer_layer.with_filter(EnvFilter::new("chatwin=debug,chatwin_web=info")))
        .init();

    // 2. Settings: defaults, then the optional settings file.
    let mut settings = HistorySettings::default();
    if let Some(path) = &args.settings {
        settings.apply(&SettingsUpdate::from_json_file(path)?.clamped());
    }

    // 3. One manager for the lifetime of the server.
    let store: SharedStore = Arc::new(JsonFileStore::new(&args.store));
    let manager = Arc::new(HistoryManager::new(store, settings));

    let config = WebConfig {
        bind_addr: ([127, 0, 0, 1], args.port).into(),
    };
    let addr = spawn_web(manager, logs, config).await?;
    println!("History API: http://{addr}/api/stats");
    println!("Store: {}", args.store.display());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for shutdown signal: {e}"))?;
    Ok(())
}
