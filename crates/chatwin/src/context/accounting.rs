//! Size statistics for conversations and the whole history.
//!
//! Every size is expressed in the estimator's [`CostUnit`](super::estimator::CostUnit).
//! Eviction decisions and the reported statistics use the same
//! [`message_cost`] function, so a cleanup that reports a conversation as
//! within budget is consistent with [`ConversationSize::total_size`].

use super::estimator::SizeEstimator;
use crate::{Conversation, ConversationMap, Message};
use serde::{Deserialize, Serialize};

/// Cost of one message: its content plus, when `include_tool_args` is set,
/// every tool-call argument string it carries.
pub fn message_cost(
    message: &Message,
    estimator: &SizeEstimator,
    include_tool_args: bool,
) -> usize {
    let content = estimator.estimate(message.text());
    if !include_tool_args {
        return content;
    }
    let args: usize = message
        .tool_calls
        .iter()
        .flatten()
        .map(|call| estimator.estimate(&call.function.arguments))
        .sum();
    content + args
}

/// Aggregate cost of a slice of messages.
pub fn messages_cost(
    messages: &[Message],
    estimator: &SizeEstimator,
    include_tool_args: bool,
) -> usize {
    messages
        .iter()
        .map(|m| message_cost(m, estimator, include_tool_args))
        .sum()
}

/// Size statistics for one conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct ConversationSize {
    pub total_size: usize,
    pub message_count: usize,
    pub average_message_size: f64,
}

impl ConversationSize {
    pub fn of(
        conversation: &Conversation,
        estimator: &SizeEstimator,
        include_tool_args: bool,
    ) -> Self {
        let total_size = messages_cost(&conversation.messages, estimator, include_tool_args);
        let message_count = conversation.messages.len();
        Self {
            total_size,
            message_count,
            average_message_size: average(total_size, message_count),
        }
    }
}

/// Size statistics across every stored conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct HistorySize {
    pub total_size: usize,
    pub total_messages: usize,
    pub conversation_count: usize,
    pub average_per_conversation: f64,
}

impl HistorySize {
    pub fn of(
        conversations: &ConversationMap,
        estimator: &SizeEstimator,
        include_tool_args: bool,
    ) -> Self {
        let mut total_size = 0;
        let mut total_messages = 0;
        for conversation in conversations.values() {
            total_size += messages_cost(&conversation.messages, estimator, include_tool_args);
            total_messages += conversation.messages.len();
        }
        let conversation_count = conversations.len();
        Self {
            total_size,
            total_messages,
            conversation_count,
            average_per_conversation: average(total_size, conversation_count),
        }
    }
}

fn average(total: usize, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// How much of a limit is in use.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct LimitUsage {
    pub used: usize,
    pub limit: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl LimitUsage {
    pub fn new(used: usize, limit: usize) -> Self {
        let usage_pct = if limit > 0 {
            used as f64 / limit as f64
        } else if used == 0 {
            0.0
        } else {
            1.0
        };
        Self {
            used,
            limit,
            usage_pct,
        }
    }

    pub fn is_over(&self) -> bool {
        self.used > self.limit
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "{} / {} ({:.0}%)",
            self.used,
            self.limit,
            self.usage_pct * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    fn sample() -> Conversation {
        Conversation::new("c1").with_messages(vec![
            Message::user("hello"),
            Message::assistant_tool_calls(vec![ToolCall::function("t1", "read", "{\"p\":1}")]),
            Message::tool_result("t1", "ok"),
        ])
    }

    #[test]
    fn message_cost_includes_tool_args_when_asked() {
        let est = SizeEstimator::characters();
        let msg = Message::assistant_tool_calls(vec![ToolCall::function("t1", "f", "abcdef")]);
        assert_eq!(message_cost(&msg, &est, true), 6);
        assert_eq!(message_cost(&msg, &est, false), 0);
    }

    #[test]
    fn conversation_size_sums_messages() {
        let est = SizeEstimator::characters();
        let size = ConversationSize::of(&sample(), &est, true);
        assert_eq!(size.message_count, 3);
        assert_eq!(size.total_size, 5 + 7 + 2);
        assert!((size.average_message_size - 14.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_conversation_is_all_zero() {
        let size = ConversationSize::of(&Conversation::new("x"), &SizeEstimator::tokens(), true);
        assert_eq!(size, ConversationSize::default());
    }

    #[test]
    fn history_size_aggregates_conversations() {
        let est = SizeEstimator::characters();
        let mut map = ConversationMap::new();
        map.insert("c1".into(), sample());
        map.insert(
            "c2".into(),
            Conversation::new("c2").with_messages(vec![Message::user("abcd")]),
        );
        let size = HistorySize::of(&map, &est, true);
        assert_eq!(size.total_size, 18);
        assert_eq!(size.total_messages, 4);
        assert_eq!(size.conversation_count, 2);
        assert!((size.average_per_conversation - 9.0).abs() < 1e-9);

        assert_eq!(HistorySize::of(&ConversationMap::new(), &est, true), HistorySize::default());
    }

    #[test]
    fn limit_usage_formats() {
        let usage = LimitUsage::new(250, 1000);
        assert!((usage.usage_pct - 0.25).abs() < 1e-9);
        assert!(!usage.is_over());
        assert_eq!(usage.to_log_string(), "250 / 1000 (25%)");
        assert!(LimitUsage::new(5, 0).is_over());
    }
}
