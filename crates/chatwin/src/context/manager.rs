//! The history window manager.
//!
//! [`HistoryManager`] is an explicit context object: construct one per
//! session around a [`ConversationStore`] handle and pass it by reference
//! (or inside an `Arc`) to whatever records and reads messages.
//!
//! Every operation takes one [`HistorySettings`] snapshot when it starts and
//! uses only that snapshot, so a concurrent [`update_settings`] never mixes
//! old and new limits within a single cleanup.
//!
//! Every load, change and save of the store runs under one write lock, so
//! concurrent recordings and cleanups never overwrite each other's changes.
//!
//! Store failures are logged and turned into no-ops; nothing here panics or
//! returns an error to the caller.
//!
//! [`update_settings`]: HistoryManager::update_settings

use super::accounting::{ConversationSize, HistorySize, LimitUsage, message_cost, messages_cost};
use super::eviction::{budget_window_start, plan_history_eviction, rolling_window_start};
use super::truncation::compact_arguments;
use crate::config::{EvictionStrategy, HistorySettings, SettingsUpdate};
use crate::store::ConversationStore;
use crate::{Conversation, Message, now_rfc3339};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// What a cleanup is running over. At most one cleanup per scope runs at a
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CleanupScope {
    Conversation(String),
    History,
}

/// Marks a scope as in flight until dropped.
#[derive(Debug)]
pub struct CleanupGuard<'a> {
    in_flight: &'a Mutex<HashSet<CleanupScope>>,
    scope: CleanupScope,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.scope);
    }
}

/// Outcome of a global (whole-history) cleanup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryCleanupReport {
    pub cleaned: bool,
    pub conversations_removed: usize,
    pub size_removed: usize,
    pub old_stats: HistorySize,
    pub new_stats: HistorySize,
}

impl HistoryCleanupReport {
    fn unchanged(stats: HistorySize) -> Self {
        Self {
            cleaned: false,
            conversations_removed: 0,
            size_removed: 0,
            old_stats: stats,
            new_stats: stats,
        }
    }
}

/// Keeps stored conversations within the configured limits.
pub struct HistoryManager<S> {
    store: S,
    settings: Mutex<HistorySettings>,
    in_flight: Mutex<HashSet<CleanupScope>>,
    writes: Mutex<()>,
}

impl<S: ConversationStore> HistoryManager<S> {
    pub fn new(store: S, settings: HistorySettings) -> Self {
        Self {
            store,
            settings: Mutex::new(settings),
            in_flight: Mutex::new(HashSet::new()),
            writes: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Snapshot of the current settings.
    pub fn settings(&self) -> HistorySettings {
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply a partial update and return the resulting settings.
    ///
    /// Values are applied as given. Clamp with [`SettingsUpdate::clamped`]
    /// first when the update comes from an untrusted edge.
    pub fn update_settings(&self, update: SettingsUpdate) -> HistorySettings {
        let mut settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        settings.apply(&update);
        info!(strategy = %settings.strategy, "History settings updated");
        settings.clone()
    }

    /// Restore the default settings.
    pub fn reset_settings(&self) -> HistorySettings {
        let mut settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        *settings = HistorySettings::default();
        info!("History settings reset to defaults");
        settings.clone()
    }

    // ── Per-message processing ─────────────────────────────────────

    /// Bound a message before it is persisted.
    ///
    /// Content over the per-message budget is truncated with the configured
    /// mode and tagged with `_truncated` / `_original_length`. When
    /// `preserve_tool_calls` is set, every tool-call argument string is
    /// bounded to `max_tool_argument_chars`.
    pub fn process_message_for_storage(&self, message: Message) -> Message {
        process_message(&self.settings(), message)
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Evict the oldest messages of one conversation if it is over its limit.
    ///
    /// Returns `true` when messages were removed and the result persisted.
    pub fn cleanup_conversation_if_needed(&self, id: &str) -> bool {
        self.cleanup_conversation(&self.settings(), id)
    }

    /// Evict whole conversations, least recently updated first, until the
    /// history fits the global budget.
    pub fn cleanup_history_if_needed(&self) -> HistoryCleanupReport {
        self.cleanup_history(&self.settings())
    }

    fn cleanup_conversation(&self, settings: &HistorySettings, id: &str) -> bool {
        let Some(_guard) = self.try_begin(CleanupScope::Conversation(id.to_string())) else {
            debug!(conversation = id, "Cleanup already in progress, skipping");
            return false;
        };

        let _writes = self.write_lock();
        let mut conversations = match self.store.load() {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(conversation = id, "Cleanup skipped: {e}");
                return false;
            }
        };
        let Some(conversation) = conversations.get_mut(id) else {
            debug!(conversation = id, "Cleanup skipped: unknown conversation");
            return false;
        };

        let start = window_start(settings, &conversation.messages);
        if start == 0 {
            return false;
        }

        let before = conversation.messages.len();
        conversation.messages.drain(..start);
        conversation.cleaned_at = Some(now_rfc3339());
        let after = conversation.messages.len();

        if let Err(e) = self.store.save(&conversations) {
            warn!(conversation = id, "Cleanup not persisted: {e}");
            return false;
        }

        info!(
            conversation = id,
            strategy = %settings.strategy,
            removed = start,
            "Evicted {start} of {before} messages ({after} kept)"
        );
        true
    }

    fn cleanup_history(&self, settings: &HistorySettings) -> HistoryCleanupReport {
        let guard = self.try_begin(CleanupScope::History);
        let estimator = settings.estimator();
        let include_tool_args = settings.preserve_tool_calls;

        let _writes = self.write_lock();
        let mut conversations = match self.store.load() {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Global cleanup skipped: {e}");
                return HistoryCleanupReport::unchanged(HistorySize::default());
            }
        };
        let old_stats = HistorySize::of(&conversations, &estimator, include_tool_args);

        if guard.is_none() {
            debug!("Global cleanup already in progress, skipping");
            return HistoryCleanupReport::unchanged(old_stats);
        }

        let budget = settings.budgets().total;
        let plan = plan_history_eviction(&conversations, old_stats.total_size, budget, |conv| {
            messages_cost(&conv.messages, &estimator, include_tool_args)
        });
        if plan.ids.is_empty() {
            return HistoryCleanupReport::unchanged(old_stats);
        }

        for id in &plan.ids {
            conversations.remove(id);
        }
        if let Err(e) = self.store.save(&conversations) {
            warn!("Global cleanup not persisted: {e}");
            return HistoryCleanupReport::unchanged(old_stats);
        }

        let new_stats = HistorySize::of(&conversations, &estimator, include_tool_args);
        info!(
            removed = plan.ids.len(),
            size_removed = plan.size_removed,
            unit = %estimator.unit(),
            "Evicted {} conversations ({} -> {})",
            plan.ids.len(),
            old_stats.total_size,
            new_stats.total_size,
        );

        HistoryCleanupReport {
            cleaned: true,
            conversations_removed: plan.ids.len(),
            size_removed: plan.size_removed,
            old_stats,
            new_stats,
        }
    }

    fn try_begin(&self, scope: CleanupScope) -> Option<CleanupGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(scope.clone()) {
            return None;
        }
        Some(CleanupGuard {
            in_flight: &self.in_flight,
            scope,
        })
    }

    /// Held across every load-change-save of the store.
    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Statistics ─────────────────────────────────────────────────

    /// Size of one conversation in the active cost unit. Zeros when the id
    /// is unknown or the store cannot be read.
    pub fn get_conversation_size(&self, id: &str) -> ConversationSize {
        let settings = self.settings();
        self.conversation(id)
            .map(|conv| {
                ConversationSize::of(&conv, &settings.estimator(), settings.preserve_tool_calls)
            })
            .unwrap_or_default()
    }

    /// Size of the whole history in the active cost unit.
    pub fn get_total_history_size(&self) -> HistorySize {
        let settings = self.settings();
        match self.store.load() {
            Ok(conversations) => HistorySize::of(
                &conversations,
                &settings.estimator(),
                settings.preserve_tool_calls,
            ),
            Err(e) => {
                warn!("History size unavailable: {e}");
                HistorySize::default()
            }
        }
    }

    /// Progress of one conversation toward its limit: message count against
    /// `max_messages` for the rolling window, cost against the
    /// per-conversation budget otherwise.
    pub fn conversation_usage(&self, id: &str) -> LimitUsage {
        let settings = self.settings();
        let size = self
            .conversation(id)
            .map(|conv| {
                ConversationSize::of(&conv, &settings.estimator(), settings.preserve_tool_calls)
            })
            .unwrap_or_default();
        match settings.eviction_strategy() {
            EvictionStrategy::RollingWindow { max_messages } => {
                LimitUsage::new(size.message_count, max_messages)
            }
            EvictionStrategy::ByteBudget(budgets) | EvictionStrategy::TokenBudget(budgets) => {
                LimitUsage::new(size.total_size, budgets.per_conversation)
            }
        }
    }

    /// Progress of the whole history toward the global budget.
    pub fn history_usage(&self) -> LimitUsage {
        let total = self.get_total_history_size().total_size;
        LimitUsage::new(total, self.settings().budgets().total)
    }

    fn conversation(&self, id: &str) -> Option<Conversation> {
        match self.store.get(id) {
            Ok(conversation) => conversation,
            Err(e) => {
                warn!(conversation = id, "Conversation unavailable: {e}");
                None
            }
        }
    }

    // ── Recording and reading ──────────────────────────────────────

    /// Process `message`, append it to conversation `id` (creating it if
    /// needed) and persist. Runs the conversation and global cleanups
    /// afterwards when `auto_cleanup` is enabled.
    ///
    /// Returns the message as stored, or `None` when the store failed.
    pub fn record_message(&self, id: &str, message: Message) -> Option<Message> {
        let settings = self.settings();
        let processed = process_message(&settings, message);
        self.append(id, processed.clone())?;
        debug!(conversation = id, role = %processed.role, "Recorded message");

        if settings.auto_cleanup {
            self.cleanup_conversation(&settings, id);
            self.cleanup_history(&settings);
        }
        Some(processed)
    }

    fn append(&self, id: &str, message: Message) -> Option<()> {
        let _writes = self.write_lock();
        let mut conversations = match self.store.load() {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(conversation = id, "Message not recorded: {e}");
                return None;
            }
        };
        let conversation = conversations
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id));
        conversation.messages.push(message);
        conversation.updated_at = Some(now_rfc3339());

        if let Err(e) = self.store.save(&conversations) {
            warn!(conversation = id, "Message not recorded: {e}");
            return None;
        }
        Some(())
    }

    /// Messages of conversation `id` ready to send to the model: bounded by
    /// a cleanup (when `auto_cleanup` is enabled) and stripped of storage
    /// bookkeeping. Empty for an unknown id.
    pub fn messages_for_api(&self, id: &str) -> Vec<Message> {
        let settings = self.settings();
        if settings.auto_cleanup {
            self.cleanup_conversation(&settings, id);
        }
        self.conversation(id)
            .map(|conv| conv.messages.iter().map(Message::for_api).collect())
            .unwrap_or_default()
    }
}

/// First message index to keep under the configured strategy.
fn window_start(settings: &HistorySettings, messages: &[Message]) -> usize {
    match settings.eviction_strategy() {
        EvictionStrategy::RollingWindow { max_messages } => {
            rolling_window_start(messages, max_messages)
        }
        EvictionStrategy::ByteBudget(budgets) | EvictionStrategy::TokenBudget(budgets) => {
            let estimator = settings.estimator();
            budget_window_start(messages, budgets.per_conversation, |msg| {
                message_cost(msg, &estimator, settings.preserve_tool_calls)
            })
        }
    }
}

fn process_message(settings: &HistorySettings, mut message: Message) -> Message {
    let budget = settings.budgets().per_message;

    if let Some(content) = message.content.as_deref() {
        let (bounded, truncated) = settings.truncation_policy().truncate(content, budget);
        if truncated {
            let original_length = content.chars().count();
            debug!(
                role = %message.role,
                mode = %settings.truncate_mode,
                "Truncated message from {original_length} chars to {}",
                bounded.chars().count()
            );
            message.content = Some(bounded);
            message.truncated = Some(true);
            message.original_length = Some(original_length);
        }
    }

    if settings.preserve_tool_calls {
        for call in message.tool_calls.iter_mut().flatten() {
            let (arguments, changed) = compact_arguments(
                &call.function.arguments,
                settings.max_tool_argument_chars,
                settings.compression_enabled,
            );
            if changed {
                debug!(
                    tool = %call.function.name,
                    "Bounded tool arguments to {} chars",
                    arguments.chars().count()
                );
                call.function.arguments = arguments;
            }
        }
    }

    message
}
