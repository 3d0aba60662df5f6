//! Convenience re-exports for common `chatwin` types.
//!
//! Meant to be glob-imported by applications embedding the manager:
//!
//! ```
//! use chatwin::prelude::*;
//! ```
//!
//! Boundary helpers ([`eviction`](crate::context::eviction)) and the raw
//! truncation functions are left out; import those from their modules
//! directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    CallType, Conversation, ConversationMap, FunctionCallData, Message, MessageRole, ToolCall,
};

// ── Settings ────────────────────────────────────────────────────────
pub use crate::config::{Budgets, EvictionStrategy, HistorySettings, SettingsUpdate, StrategyKind};

// ── History management ──────────────────────────────────────────────
pub use crate::context::{
    ConversationSize, CostUnit, HistoryCleanupReport, HistoryManager, HistorySize, LimitUsage,
    SizeEstimator, TruncateMode, TruncationPolicy,
};

// ── Storage ─────────────────────────────────────────────────────────
pub use crate::store::{ConversationStore, JsonFileStore, MemoryStore};

// ── Logging ─────────────────────────────────────────────────────────
pub use crate::logging::{BufferLayer, LogBuffer, LogLevel, LogLine};
