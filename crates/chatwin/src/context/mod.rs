//! History window management: estimation, truncation, accounting and eviction.
//!
//! The pieces stack bottom-up:
//!
//! 1. **[`estimator`]**: [`SizeEstimator`] turns text into a cost in
//!    characters or estimated tokens.
//! 2. **[`truncation`]**: [`TruncationPolicy`] shortens a single message to
//!    fit a per-message budget (smart, head or tail).
//! 3. **[`accounting`]**: per-conversation and whole-history size statistics.
//! 4. **[`eviction`]**: cut points that never separate an assistant tool call
//!    from its results, plus whole-conversation eviction order.
//! 5. **[`manager`]**: [`HistoryManager`] ties these to a store and the
//!    active settings.

pub mod accounting;
pub mod estimator;
pub mod eviction;
pub mod manager;
pub mod truncation;

pub use accounting::{ConversationSize, HistorySize, LimitUsage};
pub use estimator::{CostUnit, SizeEstimator};
pub use manager::{HistoryCleanupReport, HistoryManager};
pub use truncation::{TruncateMode, TruncationPolicy};
