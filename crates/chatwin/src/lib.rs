//! Conversation-history window manager for LLM chat clients.
//!
//! `chatwin` keeps a growing chat history inside bounded character or token
//! budgets without breaking the ordering the chat-completions protocol
//! depends on: an assistant message that issues tool calls is always kept
//! together with the tool results that answer it.
//!
//! The core abstraction is the [`HistoryManager`](context::manager::HistoryManager),
//! an explicit context object constructed once per session. It borrows a
//! [`ConversationStore`](store::ConversationStore) handle, processes messages
//! before they are persisted, and evicts old messages or whole conversations
//! when limits are exceeded.
//!
//! # Getting started
//!
//! ```
//! use chatwin::prelude::*;
//!
//! let store = MemoryStore::new();
//! let manager = HistoryManager::new(&store, HistorySettings::default());
//!
//! manager.record_message("conv-1", Message::user("What's the weather in Lisbon?"));
//! manager.record_message(
//!     "conv-1",
//!     Message::assistant_tool_calls(vec![ToolCall::function(
//!         "call-1",
//!         "get_weather",
//!         r#"{"city": "Lisbon"}"#,
//!     )]),
//! );
//! manager.record_message("conv-1", Message::tool_result("call-1", "22°C, sunny"));
//!
//! let size = manager.get_conversation_size("conv-1");
//! assert_eq!(size.message_count, 3);
//!
//! // Bounded, bookkeeping-free sequence ready for the chat-completions call.
//! let outbound = manager.messages_for_api("conv-1");
//! assert_eq!(outbound.len(), 3);
//! ```
//!
//! # Where to find things
//!
//! - **Cost estimation:** [`SizeEstimator`](context::estimator::SizeEstimator)
//!   with [`CostUnit::Characters`](context::estimator::CostUnit) or
//!   [`CostUnit::Tokens`](context::estimator::CostUnit).
//! - **Shortening a single message:** [`TruncationPolicy`](context::truncation::TruncationPolicy)
//!   and [`compact_arguments`](context::truncation::compact_arguments).
//! - **Size statistics:** [`context::accounting`].
//! - **Tool-group safe eviction boundaries:** [`context::eviction`].
//! - **Limits and flags:** [`HistorySettings`](config::HistorySettings),
//!   [`SettingsUpdate`](config::SettingsUpdate) and
//!   [`EvictionStrategy`](config::EvictionStrategy).
//! - **Persistence:** [`store`]: in-memory and JSON-file stores.
//! - **Log capture for frontends:** [`logging`].

pub mod config;
pub mod context;
pub mod logging;
pub mod prelude;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in a stored conversation.
///
/// The two underscore-prefixed fields are storage bookkeeping written by
/// [`HistoryManager::process_message_for_storage`](context::manager::HistoryManager::process_message_for_storage).
/// [`Message::for_api`] strips them before a message leaves the client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set when storage processing shortened the content.
    #[serde(rename = "_truncated", default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    /// Content length in characters before truncation.
    #[serde(
        rename = "_original_length",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_length: Option<usize>,
}

impl Message {
    fn with_role(role: MessageRole) -> Self {
        Self {
            role,
            content: None,
            tool_calls: None,
            tool_call_id: None,
            truncated: None,
            original_length: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_role(MessageRole::System)
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_role(MessageRole::User)
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_role(MessageRole::Assistant)
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::with_role(MessageRole::Assistant)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(MessageRole::Tool)
        }
    }

    /// Content text, treating a missing field as empty.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Ids of the tool calls this message issues (empty for non-callers).
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.tool_calls
            .iter()
            .flatten()
            .map(|call| call.id.as_str())
    }

    /// Whether this is an assistant message carrying at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.role == MessageRole::Assistant
            && self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Whether storage processing shortened this message.
    pub fn is_truncated(&self) -> bool {
        self.truncated == Some(true)
    }

    /// Copy of the message without storage bookkeeping.
    pub fn for_api(&self) -> Self {
        Self {
            truncated: None,
            original_length: None,
            ..self.clone()
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub enum CallType {
    #[default]
    #[serde(rename = "function")]
    Function,
}

/// A tool call issued by the assistant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Create a function tool call with serialized JSON arguments.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallData {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

// ── Conversation types ─────────────────────────────────────────────

/// A stored conversation: an ordered message list plus bookkeeping.
///
/// Fields the store carries that this crate does not model (titles,
/// creation times, UI state) are kept in `extra` and written back verbatim.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// RFC 3339 timestamp of the last appended message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// RFC 3339 timestamp of the last cleanup that removed messages.
    #[serde(rename = "_cleaned_at", default, skip_serializing_if = "Option::is_none")]
    pub cleaned_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            updated_at: None,
            cleaned_at: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Builder: start with the given messages.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Builder: set the `updated_at` timestamp.
    pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }
}

/// All conversations in a store, keyed by conversation id.
pub type ConversationMap = BTreeMap<String, Conversation>;

/// Current time as an RFC 3339 string (the store's timestamp format).
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let calls = Message::assistant_tool_calls(vec![ToolCall::function("c1", "read", "{}")]);
        assert!(calls.has_tool_calls());
        assert_eq!(calls.text(), "");
        assert_eq!(calls.tool_call_ids().collect::<Vec<_>>(), vec!["c1"]);

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn bookkeeping_fields_use_underscore_names() {
        let mut msg = Message::user("x");
        msg.truncated = Some(true);
        msg.original_length = Some(6000);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["_truncated"], true);
        assert_eq!(json["_original_length"], 6000);

        let api = serde_json::to_value(msg.for_api()).unwrap();
        assert!(api.get("_truncated").is_none());
        assert!(api.get("_original_length").is_none());
    }

    #[test]
    fn null_content_deserializes() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"assistant","content":null}"#).unwrap();
        assert!(msg.content.is_none());
        assert_eq!(msg.text(), "");
    }

    #[test]
    fn conversation_preserves_unknown_fields() {
        let json = r#"{
            "id": "c1",
            "title": "Trip planning",
            "messages": [{"role": "user", "content": "hi"}],
            "updated_at": "2026-01-02T03:04:05+00:00",
            "_cleaned_at": "2026-01-03T00:00:00+00:00"
        }"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.cleaned_at.as_deref(), Some("2026-01-03T00:00:00+00:00"));
        assert_eq!(conv.extra["title"], "Trip planning");

        let back = serde_json::to_value(&conv).unwrap();
        assert_eq!(back["title"], "Trip planning");
        assert_eq!(back["_cleaned_at"], "2026-01-03T00:00:00+00:00");
    }

    #[test]
    fn tool_call_type_defaults_to_function() {
        let call: ToolCall =
            serde_json::from_str(r#"{"id":"c1","function":{"name":"f","arguments":"{}"}}"#)
                .unwrap();
        assert_eq!(call.call_type, CallType::Function);
    }
}
