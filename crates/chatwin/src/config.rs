//! History settings: strategy selection, limits and behavioral flags.
//!
//! [`HistorySettings`] is the full configuration held by a
//! [`HistoryManager`](crate::context::manager::HistoryManager). The manager
//! takes one snapshot per operation, so a settings change never lands in the
//! middle of a cleanup.
//!
//! # Examples
//!
//! Defaults (rolling window of 50 messages, smart truncation):
//!
//! ```
//! use chatwin::config::{EvictionStrategy, HistorySettings};
//!
//! let settings = HistorySettings::default();
//! assert_eq!(
//!     settings.eviction_strategy(),
//!     EvictionStrategy::RollingWindow { max_messages: 50 }
//! );
//! ```
//!
//! Character budgets with head truncation:
//!
//! ```
//! use chatwin::config::{HistorySettings, StrategyKind};
//! use chatwin::context::truncation::TruncateMode;
//!
//! let settings = HistorySettings::default()
//!     .with_strategy(StrategyKind::ByteBudget)
//!     .with_char_limits(5_000, 50_000, 500_000)
//!     .with_truncate_mode(TruncateMode::Head);
//! assert_eq!(settings.budgets().per_message, 5_000);
//! ```
//!
//! Partial updates from a UI or a JSON file are expressed as a
//! [`SettingsUpdate`]; callers clamp them with [`SettingsUpdate::clamped`]
//! before applying.

use crate::context::estimator::{CostUnit, SizeEstimator};
use crate::context::truncation::{TruncateMode, TruncationPolicy};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

// ── Defaults ───────────────────────────────────────────────────────

pub const DEFAULT_MAX_MESSAGES: usize = 50;
pub const DEFAULT_MAX_CHARS_PER_MESSAGE: usize = 5_000;
pub const DEFAULT_MAX_CHARS_PER_CONVERSATION: usize = 50_000;
pub const DEFAULT_MAX_TOTAL_CHARS: usize = 500_000;
pub const DEFAULT_MAX_TOKENS_PER_MESSAGE: usize = 1_200;
pub const DEFAULT_MAX_TOKENS_PER_CONVERSATION: usize = 12_000;
pub const DEFAULT_MAX_TOTAL_TOKENS: usize = 125_000;
pub const DEFAULT_MAX_TOOL_ARGUMENT_CHARS: usize = 1_000;

// ── Documented ranges (applied by `SettingsUpdate::clamped`) ───────

pub const MAX_MESSAGES_RANGE: RangeInclusive<usize> = 10..=200;
pub const CHARS_PER_MESSAGE_RANGE: RangeInclusive<usize> = 500..=50_000;
pub const CHARS_PER_CONVERSATION_RANGE: RangeInclusive<usize> = 5_000..=500_000;
pub const TOTAL_CHARS_RANGE: RangeInclusive<usize> = 50_000..=5_000_000;
pub const TOKENS_PER_MESSAGE_RANGE: RangeInclusive<usize> = 100..=12_500;
pub const TOKENS_PER_CONVERSATION_RANGE: RangeInclusive<usize> = 1_000..=125_000;
pub const TOTAL_TOKENS_RANGE: RangeInclusive<usize> = 12_500..=1_250_000;
pub const TOOL_ARGUMENT_CHARS_RANGE: RangeInclusive<usize> = 100..=50_000;

// ── Strategy ───────────────────────────────────────────────────────

/// Which eviction strategy a manager enforces.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Keep the N most recent messages per conversation.
    #[default]
    RollingWindow,
    /// Character budgets per message, per conversation and globally.
    ByteBudget,
    /// Estimated-token budgets per message, per conversation and globally.
    TokenBudget,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rolling_window" | "rolling-window" => Ok(Self::RollingWindow),
            "byte_budget" | "byte-budget" => Ok(Self::ByteBudget),
            "token_budget" | "token-budget" => Ok(Self::TokenBudget),
            other => Err(format!(
                "unknown strategy '{other}' (expected rolling_window, byte_budget or token_budget)"
            )),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::RollingWindow => write!(f, "rolling_window"),
            StrategyKind::ByteBudget => write!(f, "byte_budget"),
            StrategyKind::TokenBudget => write!(f, "token_budget"),
        }
    }
}

/// Per-message, per-conversation and global limits in one cost unit.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Budgets {
    pub unit: CostUnit,
    pub per_message: usize,
    pub per_conversation: usize,
    pub total: usize,
}

/// The eviction strategy resolved from settings, carrying its limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionStrategy {
    /// Drop the oldest messages beyond `max_messages`.
    RollingWindow { max_messages: usize },
    /// Evict by aggregate character cost.
    ByteBudget(Budgets),
    /// Evict by aggregate estimated-token cost.
    TokenBudget(Budgets),
}

// ── Settings ───────────────────────────────────────────────────────

/// Active history configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct HistorySettings {
    pub strategy: StrategyKind,
    /// Rolling-window size per conversation.
    pub max_messages: usize,
    pub max_chars_per_message: usize,
    pub max_chars_per_conversation: usize,
    pub max_total_chars: usize,
    pub max_tokens_per_message: usize,
    pub max_tokens_per_conversation: usize,
    pub max_total_tokens: usize,
    /// Cap for each tool-call argument payload, always in characters.
    pub max_tool_argument_chars: usize,
    pub truncate_mode: TruncateMode,
    /// Bound tool-call arguments on storage and count them in sizes.
    pub preserve_tool_calls: bool,
    /// Run cleanup automatically when messages are recorded or read back.
    pub auto_cleanup: bool,
    /// Re-serialize JSON tool arguments compactly before cutting them.
    pub compression_enabled: bool,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            max_messages: DEFAULT_MAX_MESSAGES,
            max_chars_per_message: DEFAULT_MAX_CHARS_PER_MESSAGE,
            max_chars_per_conversation: DEFAULT_MAX_CHARS_PER_CONVERSATION,
            max_total_chars: DEFAULT_MAX_TOTAL_CHARS,
            max_tokens_per_message: DEFAULT_MAX_TOKENS_PER_MESSAGE,
            max_tokens_per_conversation: DEFAULT_MAX_TOKENS_PER_CONVERSATION,
            max_total_tokens: DEFAULT_MAX_TOTAL_TOKENS,
            max_tool_argument_chars: DEFAULT_MAX_TOOL_ARGUMENT_CHARS,
            truncate_mode: TruncateMode::default(),
            preserve_tool_calls: true,
            auto_cleanup: true,
            compression_enabled: true,
        }
    }
}

impl HistorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the eviction strategy.
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the rolling-window size.
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Set the three character budgets.
    pub fn with_char_limits(
        mut self,
        per_message: usize,
        per_conversation: usize,
        total: usize,
    ) -> Self {
        self.max_chars_per_message = per_message;
        self.max_chars_per_conversation = per_conversation;
        self.max_total_chars = total;
        self
    }

    /// Set the three token budgets.
    pub fn with_token_limits(
        mut self,
        per_message: usize,
        per_conversation: usize,
        total: usize,
    ) -> Self {
        self.max_tokens_per_message = per_message;
        self.max_tokens_per_conversation = per_conversation;
        self.max_total_tokens = total;
        self
    }

    pub fn with_truncate_mode(mut self, mode: TruncateMode) -> Self {
        self.truncate_mode = mode;
        self
    }

    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    pub fn with_preserve_tool_calls(mut self, enabled: bool) -> Self {
        self.preserve_tool_calls = enabled;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }

    /// Cost unit sizes are measured in. Rolling window measures characters.
    pub fn cost_unit(&self) -> CostUnit {
        match self.strategy {
            StrategyKind::TokenBudget => CostUnit::Tokens,
            StrategyKind::RollingWindow | StrategyKind::ByteBudget => CostUnit::Characters,
        }
    }

    pub fn estimator(&self) -> SizeEstimator {
        SizeEstimator::new(self.cost_unit())
    }

    pub fn truncation_policy(&self) -> TruncationPolicy {
        TruncationPolicy::new(self.truncate_mode, self.estimator())
    }

    /// Limits in the active cost unit.
    pub fn budgets(&self) -> Budgets {
        match self.cost_unit() {
            CostUnit::Tokens => Budgets {
                unit: CostUnit::Tokens,
                per_message: self.max_tokens_per_message,
                per_conversation: self.max_tokens_per_conversation,
                total: self.max_total_tokens,
            },
            CostUnit::Characters => Budgets {
                unit: CostUnit::Characters,
                per_message: self.max_chars_per_message,
                per_conversation: self.max_chars_per_conversation,
                total: self.max_total_chars,
            },
        }
    }

    /// Resolve the configured strategy together with its limits.
    pub fn eviction_strategy(&self) -> EvictionStrategy {
        match self.strategy {
            StrategyKind::RollingWindow => EvictionStrategy::RollingWindow {
                max_messages: self.max_messages,
            },
            StrategyKind::ByteBudget => EvictionStrategy::ByteBudget(self.budgets()),
            StrategyKind::TokenBudget => EvictionStrategy::TokenBudget(self.budgets()),
        }
    }

    /// Apply a partial update. Values are taken as given; see
    /// [`SettingsUpdate::clamped`] for range enforcement.
    pub fn apply(&mut self, update: &SettingsUpdate) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = update.$field {
                    self.$field = value;
                })*
            };
        }
        set!(
            strategy,
            max_messages,
            max_chars_per_message,
            max_chars_per_conversation,
            max_total_chars,
            max_tokens_per_message,
            max_tokens_per_conversation,
            max_total_tokens,
            max_tool_argument_chars,
            truncate_mode,
            preserve_tool_calls,
            auto_cleanup,
            compression_enabled,
        );
    }
}

/// A partial settings change. Absent fields are left as they are.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chars_per_message: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chars_per_conversation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_message: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_conversation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_argument_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate_mode: Option<TruncateMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cleanup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_enabled: Option<bool>,
}

impl SettingsUpdate {
    /// Clamp every numeric field into its documented range.
    pub fn clamped(mut self) -> Self {
        fn clamp(value: &mut Option<usize>, range: RangeInclusive<usize>) {
            if let Some(v) = value {
                *v = (*v).clamp(*range.start(), *range.end());
            }
        }
        clamp(&mut self.max_messages, MAX_MESSAGES_RANGE);
        clamp(&mut self.max_chars_per_message, CHARS_PER_MESSAGE_RANGE);
        clamp(
            &mut self.max_chars_per_conversation,
            CHARS_PER_CONVERSATION_RANGE,
        );
        clamp(&mut self.max_total_chars, TOTAL_CHARS_RANGE);
        clamp(&mut self.max_tokens_per_message, TOKENS_PER_MESSAGE_RANGE);
        clamp(
            &mut self.max_tokens_per_conversation,
            TOKENS_PER_CONVERSATION_RANGE,
        );
        clamp(&mut self.max_total_tokens, TOTAL_TOKENS_RANGE);
        clamp(&mut self.max_tool_argument_chars, TOOL_ARGUMENT_CHARS_RANGE);
        self
    }

    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Load an update from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, String> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings file {}: {e}", path.display()))?;
        serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse settings file {}: {e}", path.display()))
    }
}
