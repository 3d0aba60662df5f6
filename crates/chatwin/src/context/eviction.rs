//! Eviction boundaries that never split a tool group.
//!
//! A *tool group* is an assistant message that issues tool calls together
//! with every tool-result message answering one of its call ids. The
//! chat-completions protocol rejects a history where a result appears
//! without its call, so every eviction here removes a prefix of the message
//! list whose boundary falls outside all groups.
//!
//! Two adjustment directions exist:
//!
//! - [`Adjust::Extend`] moves the cut backward to the start of the group it
//!   would split, keeping more messages than asked for. Used by the rolling
//!   window, which tolerates exceeding its count by at most
//!   `longest group length - 1`.
//! - [`Adjust::Shrink`] moves the cut forward past the group, dropping it
//!   entirely. Used by the budget strategies so the budget stays a hard limit.
//!
//! Whole-conversation eviction for the global budget lives here too
//! ([`plan_history_eviction`]).

use crate::{Conversation, ConversationMap, Message, MessageRole};
use chrono::{DateTime, FixedOffset};
use std::collections::{HashMap, HashSet};

/// Inclusive index span of one tool group (or of overlapping groups merged).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolGroup {
    pub start: usize,
    pub end: usize,
}

impl ToolGroup {
    fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Whether cutting before index `cut` would split this group.
    fn splits_at(&self, cut: usize) -> bool {
        self.start < cut && cut <= self.end
    }
}

/// Direction in which an unsafe cut is moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    /// Move the cut back to the group start (keep the group).
    Extend,
    /// Move the cut past the group end (drop the group).
    Shrink,
}

/// Locate the tool groups in `messages`, merged where they overlap.
///
/// Each tool result belongs to the nearest preceding assistant message that
/// issued its call id, so providers that reuse ids across turns still get
/// one group per turn. A group ends at its last result. Tool messages
/// without an id that directly follow a group are counted as part of it.
pub fn tool_groups(messages: &[Message]) -> Vec<ToolGroup> {
    let mut ends: Vec<Option<usize>> = vec![None; messages.len()];
    let mut issuer: HashMap<&str, usize> = HashMap::new();
    for (idx, msg) in messages.iter().enumerate() {
        if msg.has_tool_calls() {
            ends[idx] = Some(idx);
            for id in msg.tool_call_ids() {
                issuer.insert(id, idx);
            }
        } else if msg.role == MessageRole::Tool
            && let Some(id) = msg.tool_call_id.as_deref()
            && let Some(&call) = issuer.get(id)
        {
            ends[call] = Some(idx);
        }
    }

    let mut groups: Vec<ToolGroup> = Vec::new();
    for (idx, end) in ends.into_iter().enumerate() {
        let Some(mut end) = end else {
            continue;
        };
        while messages
            .get(end + 1)
            .is_some_and(|next| next.role == MessageRole::Tool && next.tool_call_id.is_none())
        {
            end += 1;
        }

        match groups.last_mut() {
            Some(prev) if idx <= prev.end => prev.end = prev.end.max(end),
            _ => groups.push(ToolGroup { start: idx, end }),
        }
    }
    groups
}

/// Longest tool group in `messages`, or 0 if there are none.
pub fn longest_group_len(messages: &[Message]) -> usize {
    tool_groups(messages)
        .iter()
        .map(ToolGroup::len)
        .max()
        .unwrap_or(0)
}

/// Move `cut` so that `messages[cut..]` neither splits a tool group nor
/// starts with an orphaned tool result.
pub fn safe_window_start(messages: &[Message], cut: usize, adjust: Adjust) -> usize {
    let mut cut = cut.min(messages.len());

    if let Some(group) = tool_groups(messages).iter().find(|g| g.splits_at(cut)) {
        cut = match adjust {
            Adjust::Extend => group.start,
            Adjust::Shrink => group.end + 1,
        };
    }

    while messages
        .get(cut)
        .is_some_and(|msg| msg.role == MessageRole::Tool)
        && cut > 0
    {
        cut += 1;
    }
    cut
}

/// Index of the first message kept by a rolling window of `max_messages`.
///
/// Returns 0 when nothing needs to be evicted.
pub fn rolling_window_start(messages: &[Message], max_messages: usize) -> usize {
    if messages.len() <= max_messages {
        return 0;
    }
    safe_window_start(messages, messages.len() - max_messages, Adjust::Extend)
}

/// Index of the first message kept when the suffix must cost at most
/// `budget`.
///
/// Scans from the newest message backward while messages fit, then moves
/// the cut forward past any tool group it would split. Returns 0 when the
/// whole list already fits.
pub fn budget_window_start<F>(messages: &[Message], budget: usize, cost: F) -> usize
where
    F: Fn(&Message) -> usize,
{
    let costs: Vec<usize> = messages.iter().map(&cost).collect();
    if costs.iter().sum::<usize>() <= budget {
        return 0;
    }

    let mut kept = 0usize;
    let mut start = messages.len();
    for (idx, &c) in costs.iter().enumerate().rev() {
        if kept + c > budget {
            break;
        }
        kept += c;
        start = idx;
    }
    safe_window_start(messages, start, Adjust::Shrink)
}

/// Whether every tool result is preceded by the assistant message that
/// issued its call id.
pub fn is_tool_adjacent(messages: &[Message]) -> bool {
    let mut issued: HashSet<&str> = HashSet::new();
    for msg in messages {
        if msg.has_tool_calls() {
            issued.extend(msg.tool_call_ids());
        }
        if msg.role == MessageRole::Tool
            && let Some(id) = msg.tool_call_id.as_deref()
            && !issued.contains(id)
        {
            return false;
        }
    }
    true
}

// ── Whole-conversation eviction ────────────────────────────────────

/// Conversations chosen for removal to bring the history under a budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEvictionPlan {
    /// Ids in eviction order (least recently updated first).
    pub ids: Vec<String>,
    /// Combined cost of the chosen conversations.
    pub size_removed: usize,
}

/// Conversations in eviction order: ascending `updated_at`, with missing or
/// unparseable timestamps first and ties broken by id.
pub fn eviction_order(conversations: &ConversationMap) -> Vec<(&str, &Conversation)> {
    let mut ordered: Vec<(Option<DateTime<FixedOffset>>, &String, &Conversation)> = conversations
        .iter()
        .map(|(id, conv)| (parse_timestamp(conv.updated_at.as_deref()), id, conv))
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    ordered
        .into_iter()
        .map(|(_, id, conv)| (id.as_str(), conv))
        .collect()
}

/// Pick whole conversations to drop, oldest first, until `total - removed`
/// fits `budget`.
pub fn plan_history_eviction<F>(
    conversations: &ConversationMap,
    total: usize,
    budget: usize,
    cost: F,
) -> HistoryEvictionPlan
where
    F: Fn(&Conversation) -> usize,
{
    let mut plan = HistoryEvictionPlan::default();
    if total <= budget {
        return plan;
    }

    let deficit = total - budget;
    for (id, conv) in eviction_order(conversations) {
        if plan.size_removed >= deficit {
            break;
        }
        plan.size_removed += cost(conv);
        plan.ids.push(id.to_string());
    }
    plan
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
    value.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    fn user(i: usize) -> Message {
        Message::user(format!("message {i}"))
    }

    fn call(id: &str) -> Message {
        Message::assistant_tool_calls(vec![ToolCall::function(id, "lookup", "{}")])
    }

    fn result(id: &str) -> Message {
        Message::tool_result(id, "done")
    }

    #[test]
    fn finds_simple_group() {
        let msgs = vec![user(0), call("a"), result("a"), user(3)];
        assert_eq!(tool_groups(&msgs), vec![ToolGroup { start: 1, end: 2 }]);
    }

    #[test]
    fn group_spans_parallel_results() {
        let msgs = vec![
            user(0),
            Message::assistant_tool_calls(vec![
                ToolCall::function("a", "f", "{}"),
                ToolCall::function("b", "g", "{}"),
            ]),
            result("a"),
            result("b"),
            user(4),
        ];
        assert_eq!(tool_groups(&msgs), vec![ToolGroup { start: 1, end: 3 }]);
        assert_eq!(longest_group_len(&msgs), 3);
    }

    #[test]
    fn idless_tool_message_extends_group() {
        let mut anonymous = Message::tool_result("x", "legacy");
        anonymous.tool_call_id = None;
        let msgs = vec![call("a"), result("a"), anonymous, user(3)];
        assert_eq!(tool_groups(&msgs), vec![ToolGroup { start: 0, end: 2 }]);
    }

    #[test]
    fn overlapping_groups_merge() {
        // Result for "a" arrives after the second call.
        let msgs = vec![call("a"), call("b"), result("b"), result("a"), user(4)];
        assert_eq!(tool_groups(&msgs), vec![ToolGroup { start: 0, end: 3 }]);
    }

    #[test]
    fn reused_call_ids_group_per_turn() {
        let mut msgs = Vec::new();
        for turn in 0..40 {
            msgs.push(user(turn));
            msgs.push(call("call_0"));
            msgs.push(result("call_0"));
            msgs.push(Message::assistant_text(format!("answer {turn}")));
        }

        let groups = tool_groups(&msgs);
        assert_eq!(groups.len(), 40);
        assert_eq!(groups[0], ToolGroup { start: 1, end: 2 });
        assert_eq!(groups[39], ToolGroup { start: 157, end: 158 });
        assert_eq!(longest_group_len(&msgs), 2);

        let start = rolling_window_start(&msgs, 50);
        assert_eq!(start, 109);
        assert_eq!(msgs.len() - start, 51);
        assert!(is_tool_adjacent(&msgs[start..]));
    }

    #[test]
    fn pending_call_is_a_single_message_group() {
        let msgs = vec![user(0), call("a")];
        assert_eq!(tool_groups(&msgs), vec![ToolGroup { start: 1, end: 1 }]);
    }

    #[test]
    fn extend_moves_cut_to_group_start() {
        let msgs = vec![user(0), call("a"), result("a"), user(3)];
        assert_eq!(safe_window_start(&msgs, 2, Adjust::Extend), 1);
        assert_eq!(safe_window_start(&msgs, 3, Adjust::Extend), 3);
        assert_eq!(safe_window_start(&msgs, 1, Adjust::Extend), 1);
    }

    #[test]
    fn shrink_moves_cut_past_group() {
        let msgs = vec![user(0), call("a"), result("a"), user(3)];
        assert_eq!(safe_window_start(&msgs, 2, Adjust::Shrink), 3);
        assert_eq!(safe_window_start(&msgs, 1, Adjust::Shrink), 1);
    }

    #[test]
    fn leading_orphans_are_skipped() {
        let msgs = vec![user(0), result("gone"), result("gone2"), user(3)];
        assert_eq!(safe_window_start(&msgs, 1, Adjust::Extend), 3);
        // A list that starts with an orphan is left alone when nothing is cut.
        assert_eq!(safe_window_start(&msgs[1..], 0, Adjust::Extend), 0);
    }

    #[test]
    fn rolling_window_keeps_group_whole() {
        let mut msgs: Vec<Message> = (0..45).map(user).collect();
        msgs.push(call("t"));
        msgs.push(result("t"));
        msgs.extend((47..60).map(user));
        assert_eq!(msgs.len(), 60);

        // Cut at 14 is outside the group.
        assert_eq!(rolling_window_start(&msgs, 46), 14);
        // A window of 14 would start at the result (index 46): extend to 45.
        assert_eq!(rolling_window_start(&msgs, 14), 45);
        assert!(is_tool_adjacent(&msgs[rolling_window_start(&msgs, 14)..]));
    }

    #[test]
    fn rolling_window_within_limit_is_noop() {
        let msgs: Vec<Message> = (0..10).map(user).collect();
        assert_eq!(rolling_window_start(&msgs, 10), 0);
        assert_eq!(rolling_window_start(&msgs, 0), 10);
    }

    #[test]
    fn budget_window_is_a_hard_limit() {
        let msgs = vec![user(0), call("a"), result("a"), user(3), user(4)];
        let cost = |m: &Message| m.text().chars().count().max(1);
        // "message 3" and "message 4" fit (18); "done" (4) would too with a
        // budget of 22, which would split the group, so it is dropped.
        let start = budget_window_start(&msgs, 22, cost);
        assert_eq!(start, 3);
        let kept: usize = msgs[start..].iter().map(cost).sum();
        assert!(kept <= 22);
    }

    #[test]
    fn budget_window_fits_returns_zero() {
        let msgs = vec![user(0), user(1)];
        assert_eq!(budget_window_start(&msgs, 1000, |m| m.text().len()), 0);
    }

    #[test]
    fn adjacency_check_detects_orphans() {
        assert!(is_tool_adjacent(&[call("a"), result("a")]));
        assert!(!is_tool_adjacent(&[result("a"), call("a")]));
        assert!(is_tool_adjacent(&[user(0)]));
    }

    fn conv(id: &str, updated_at: Option<&str>, text: &str) -> Conversation {
        let mut c = Conversation::new(id).with_messages(vec![Message::user(text)]);
        c.updated_at = updated_at.map(str::to_string);
        c
    }

    #[test]
    fn eviction_order_puts_untimed_first_then_oldest() {
        let mut map = ConversationMap::new();
        map.insert("new".into(), conv("new", Some("2026-03-01T00:00:00Z"), "x"));
        map.insert("old".into(), conv("old", Some("2026-01-01T00:00:00+00:00"), "x"));
        map.insert("bad".into(), conv("bad", Some("yesterday"), "x"));
        map.insert("none".into(), conv("none", None, "x"));
        let ids: Vec<&str> = eviction_order(&map).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["bad", "none", "old", "new"]);
    }

    #[test]
    fn eviction_order_compares_offsets() {
        let mut map = ConversationMap::new();
        // 10:00+02:00 is 08:00Z, older than 09:00Z.
        map.insert("a".into(), conv("a", Some("2026-01-01T09:00:00Z"), "x"));
        map.insert("b".into(), conv("b", Some("2026-01-01T10:00:00+02:00"), "x"));
        let ids: Vec<&str> = eviction_order(&map).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn plan_covers_deficit_oldest_first() {
        let mut map = ConversationMap::new();
        map.insert("a".into(), conv("a", Some("2026-01-01T00:00:00Z"), &"a".repeat(40)));
        map.insert("b".into(), conv("b", Some("2026-01-02T00:00:00Z"), &"b".repeat(40)));
        map.insert("c".into(), conv("c", Some("2026-01-03T00:00:00Z"), &"c".repeat(40)));
        let cost = |c: &Conversation| c.messages.iter().map(|m| m.text().len()).sum::<usize>();

        let plan = plan_history_eviction(&map, 120, 70, cost);
        assert_eq!(plan.ids, vec!["a", "b"]);
        assert_eq!(plan.size_removed, 80);

        assert_eq!(plan_history_eviction(&map, 120, 120, cost), HistoryEvictionPlan::default());
    }
}
