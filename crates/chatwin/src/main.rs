//! Inspect and maintain a JSON conversation-history file.
//!
//! # Examples
//!
//! ```sh
//! # Whole-history statistics
//! chatwin --store ~/.chat/conversations.json stats
//!
//! # One conversation, token budget strategy
//! chatwin --strategy token_budget stats --conversation abc123
//!
//! # Enforce limits now (one conversation, then the global budget)
//! chatwin --max-messages 30 cleanup --conversation abc123
//! chatwin --settings limits.json cleanup
//!
//! # Print the effective settings
//! chatwin --settings limits.json settings
//!
//! # Truncate arbitrary text the way stored messages are truncated
//! cat long_reply.md | chatwin truncate --budget 2000 --mode smart
//! ```

use chatwin::config::{HistorySettings, SettingsUpdate, StrategyKind};
use chatwin::context::{HistoryManager, TruncateMode};
use chatwin::store::{ConversationStore, JsonFileStore};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Inspect and maintain a JSON conversation-history file.
#[derive(Parser)]
#[command(name = "chatwin")]
struct Cli {
    /// Path to the conversation store (a JSON object keyed by conversation id)
    #[arg(long, default_value = "conversations.json", global = true)]
    store: PathBuf,

    /// JSON file with a partial settings update (values are clamped)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Eviction strategy: rolling_window, byte_budget or token_budget
    #[arg(long, global = true)]
    strategy: Option<StrategyKind>,

    /// Rolling-window size per conversation
    #[arg(long, global = true)]
    max_messages: Option<usize>,

    /// Log every eviction decision to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print size statistics and limit usage
    Stats {
        /// Report on a single conversation instead of the whole history
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Evict messages or conversations that exceed the configured limits
    Cleanup {
        /// Clean a single conversation instead of enforcing the global budget
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Print the effective settings as JSON
    Settings,
    /// Truncate stdin to a budget in the active cost unit
    Truncate {
        /// Budget (characters, or tokens under the token_budget strategy)
        #[arg(long)]
        budget: usize,

        /// Truncation mode: smart, head or tail (defaults to the settings value)
        #[arg(long)]
        mode: Option<TruncateMode>,
    },
}

#[derive(Serialize)]
struct ConversationStats {
    conversation: String,
    size: chatwin::context::ConversationSize,
    usage: chatwin::context::LimitUsage,
}

#[derive(Serialize)]
struct HistoryStats {
    size: chatwin::context::HistorySize,
    usage: chatwin::context::LimitUsage,
}

#[derive(Serialize)]
struct ConversationCleanup {
    conversation: String,
    cleaned: bool,
    size: chatwin::context::ConversationSize,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "chatwin=debug" } else { "chatwin=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}

/// Defaults, then the settings file, then individual flags. Every step is
/// clamped to the documented ranges.
fn build_settings(cli: &Cli) -> Result<HistorySettings, String> {
    let mut settings = HistorySettings::default();

    if let Some(path) = &cli.settings {
        let update = SettingsUpdate::from_json_file(path)?;
        settings.apply(&update.clamped());
    }

    let flags = SettingsUpdate {
        strategy: cli.strategy,
        max_messages: cli.max_messages,
        ..Default::default()
    };
    if !flags.is_empty() {
        settings.apply(&flags.clamped());
    }

    Ok(settings)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to format output: {e}"))
}

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn run(cli: &Cli) -> Result<String, String> {
    let settings = build_settings(cli)?;

    match &cli.command {
        Command::Settings => to_json(&settings),
        Command::Truncate { budget, mode } => {
            let content = read_stdin_content()?;
            let policy = chatwin::context::TruncationPolicy::new(
                mode.unwrap_or(settings.truncate_mode),
                settings.estimator(),
            );
            let (truncated, _) = policy.truncate(&content, *budget);
            Ok(truncated)
        }
        Command::Stats { conversation } => {
            let manager = HistoryManager::new(JsonFileStore::new(&cli.store), settings);
            match conversation {
                Some(id) => {
                    if conversation_exists(&manager, id)? {
                        to_json(&ConversationStats {
                            conversation: id.clone(),
                            size: manager.get_conversation_size(id),
                            usage: manager.conversation_usage(id),
                        })
                    } else {
                        Err(format!("conversation '{id}' not found in {}", cli.store.display()))
                    }
                }
                None => to_json(&HistoryStats {
                    size: manager.get_total_history_size(),
                    usage: manager.history_usage(),
                }),
            }
        }
        Command::Cleanup { conversation } => {
            let manager = HistoryManager::new(JsonFileStore::new(&cli.store), settings);
            match conversation {
                Some(id) => {
                    if !conversation_exists(&manager, id)? {
                        return Err(format!(
                            "conversation '{id}' not found in {}",
                            cli.store.display()
                        ));
                    }
                    let cleaned = manager.cleanup_conversation_if_needed(id);
                    to_json(&ConversationCleanup {
                        conversation: id.clone(),
                        cleaned,
                        size: manager.get_conversation_size(id),
                    })
                }
                None => to_json(&manager.cleanup_history_if_needed()),
            }
        }
    }
}

/// Unlike the manager's lookups, store errors surface here instead of
/// reading as "not found".
fn conversation_exists(manager: &HistoryManager<JsonFileStore>, id: &str) -> Result<bool, String> {
    Ok(manager.store().get(id)?.is_some())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
