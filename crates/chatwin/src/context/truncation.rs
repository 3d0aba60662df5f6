//! Per-message truncation: shorten content that exceeds a budget.
//!
//! Three strategies are available through [`TruncateMode`]:
//!
//! - **smart** keeps whole paragraphs, then whole lines, then falls back to a
//!   raw character cut, and appends a visible `[... truncated]` marker.
//! - **head** keeps the beginning and appends `...`.
//! - **tail** keeps the end and prefixes `...`.
//!
//! Every strategy returns content whose estimated cost fits the budget, and
//! truncating an already-truncated result again returns it unchanged. All
//! cuts land on `char` boundaries.
//!
//! Tool-call argument payloads go through [`compact_arguments`] instead,
//! which first tries to re-serialize the JSON without formatting whitespace.

use crate::context::estimator::SizeEstimator;
use serde::{Deserialize, Serialize};

/// Marker appended by smart truncation after a paragraph cut.
pub const PARAGRAPH_MARKER: &str = "\n\n[... truncated]";

/// Marker appended by smart truncation after a line or raw cut.
pub const LINE_MARKER: &str = "\n[... truncated]";

/// Ellipsis used by head/tail truncation and argument cuts.
pub const ELLIPSIS: &str = "...";

/// Truncation strategy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TruncateMode {
    /// Cut at paragraph, then line, then character boundaries.
    #[default]
    Smart,
    /// Keep the end of the content.
    Tail,
    /// Keep the beginning of the content.
    Head,
}

impl std::str::FromStr for TruncateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smart" => Ok(Self::Smart),
            "tail" => Ok(Self::Tail),
            "head" => Ok(Self::Head),
            other => Err(format!(
                "unknown truncate mode '{other}' (expected smart, tail or head)"
            )),
        }
    }
}

impl std::fmt::Display for TruncateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TruncateMode::Smart => write!(f, "smart"),
            TruncateMode::Tail => write!(f, "tail"),
            TruncateMode::Head => write!(f, "head"),
        }
    }
}

/// A truncation strategy bound to a cost estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncationPolicy {
    mode: TruncateMode,
    estimator: SizeEstimator,
}

impl TruncationPolicy {
    pub fn new(mode: TruncateMode, estimator: SizeEstimator) -> Self {
        Self { mode, estimator }
    }

    pub fn mode(&self) -> TruncateMode {
        self.mode
    }

    /// Shorten `content` so its estimated cost fits `budget`.
    ///
    /// Returns the (possibly unchanged) content and whether it was altered.
    pub fn truncate(&self, content: &str, budget: usize) -> (String, bool) {
        if self.estimator.estimate(content) <= budget {
            return (content.to_string(), false);
        }

        let max_chars = self.estimator.char_budget(budget);
        let truncated = match self.mode {
            TruncateMode::Smart => smart_truncate(content, max_chars),
            TruncateMode::Tail => tail_truncate(content, max_chars),
            TruncateMode::Head => head_truncate(content, max_chars),
        };
        (truncated, true)
    }
}

/// Keep the first `max_chars - 3` characters and append an ellipsis.
pub fn head_truncate(content: &str, max_chars: usize) -> String {
    if max_chars <= ELLIPSIS.len() {
        return take_chars(content, max_chars).to_string();
    }
    format!(
        "{}{ELLIPSIS}",
        take_chars(content, max_chars - ELLIPSIS.len())
    )
}

/// Keep the last `max_chars - 3` characters behind a leading ellipsis.
pub fn tail_truncate(content: &str, max_chars: usize) -> String {
    if max_chars <= ELLIPSIS.len() {
        return take_chars(content, max_chars).to_string();
    }
    format!(
        "{ELLIPSIS}{}",
        last_chars(content, max_chars - ELLIPSIS.len())
    )
}

/// Structure-preserving truncation to at most `max_chars` characters.
pub fn smart_truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    if max_chars <= PARAGRAPH_MARKER.len() {
        return take_chars(content, max_chars).to_string();
    }

    let available = max_chars - PARAGRAPH_MARKER.len();
    if let Some(kept) = take_whole_pieces(content, "\n\n", available) {
        return format!("{kept}{PARAGRAPH_MARKER}");
    }

    let available = max_chars - LINE_MARKER.len();
    if let Some(kept) = take_whole_pieces(content, "\n", available) {
        return format!("{kept}{LINE_MARKER}");
    }

    format!("{}{LINE_MARKER}", take_chars(content, available))
}

/// Accumulate leading `separator`-delimited pieces while they fit in
/// `available` characters. Returns `None` when the content has no separator
/// or not even the first piece fits.
fn take_whole_pieces<'a>(content: &'a str, separator: &str, available: usize) -> Option<&'a str> {
    if !content.contains(separator) {
        return None;
    }

    let sep_chars = separator.chars().count();
    let mut used = 0;
    let mut end = 0;
    for piece in content.split(separator) {
        let piece_chars = piece.chars().count();
        if used + piece_chars > available {
            break;
        }
        used += piece_chars + sep_chars;
        end += piece.len() + separator.len();
    }

    if end == 0 {
        return None;
    }
    // `end` includes a trailing separator; `get` avoids overrunning when the
    // last piece counted was the final one.
    let kept = content.get(..end.min(content.len())).unwrap_or(content);
    let kept = kept.trim_end();
    if kept.is_empty() { None } else { Some(kept) }
}

/// Bound a tool-call argument payload to `max_chars` characters.
///
/// When `compress` is set and the payload parses as JSON, it is first
/// re-serialized compactly; the compact form is kept whenever it fits.
/// Anything still too long (or unparseable) is cut to `max_chars - 3`
/// characters plus an ellipsis. Parse failures never surface.
pub fn compact_arguments(arguments: &str, max_chars: usize, compress: bool) -> (String, bool) {
    if arguments.chars().count() <= max_chars {
        return (arguments.to_string(), false);
    }

    let compacted = if compress {
        serde_json::from_str::<serde_json::Value>(arguments)
            .ok()
            .and_then(|value| serde_json::to_string(&value).ok())
    } else {
        None
    };

    match compacted {
        Some(compact) if compact.chars().count() <= max_chars => (compact, true),
        Some(compact) => (head_truncate(&compact, max_chars), true),
        None => (head_truncate(arguments, max_chars), true),
    }
}

/// The first `n` characters of `s`.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.get(..idx).unwrap_or(s),
        None => s,
    }
}

/// The last `n` characters of `s`.
fn last_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => s.get(idx..).unwrap_or(s),
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: TruncateMode) -> TruncationPolicy {
        TruncationPolicy::new(mode, SizeEstimator::characters())
    }

    fn all_modes() -> [TruncateMode; 3] {
        [TruncateMode::Smart, TruncateMode::Tail, TruncateMode::Head]
    }

    fn sample_inputs() -> Vec<String> {
        vec![
            "a".repeat(6000),
            "Paragraph one is here.\n\nParagraph two follows.\n\nParagraph three ends it."
                .repeat(40),
            "line\n".repeat(500),
            "ünïcödé ".repeat(300),
            format!("{}\n\n{}", "x".repeat(300), "y".repeat(300)),
        ]
    }

    #[test]
    fn below_budget_is_untouched() {
        for mode in all_modes() {
            let (out, changed) = policy(mode).truncate("short text", 100);
            assert_eq!(out, "short text");
            assert!(!changed);
        }
    }

    #[test]
    fn budget_is_respected_by_every_mode() {
        for mode in all_modes() {
            for input in sample_inputs() {
                for budget in [1, 3, 10, 16, 17, 18, 50, 200, 5000] {
                    let (out, _) = policy(mode).truncate(&input, budget);
                    assert!(
                        out.chars().count() <= budget,
                        "{mode} exceeded budget {budget}: {}",
                        out.chars().count()
                    );
                }
            }
        }
    }

    #[test]
    fn truncation_is_idempotent() {
        for mode in all_modes() {
            for input in sample_inputs() {
                for budget in [1, 20, 120, 999] {
                    let p = policy(mode);
                    let (once, _) = p.truncate(&input, budget);
                    let (twice, changed) = p.truncate(&once, budget);
                    assert_eq!(once, twice);
                    assert!(!changed);
                }
            }
        }
    }

    #[test]
    fn head_keeps_beginning_with_marker() {
        let content = format!("{}{}", "a".repeat(3000), "b".repeat(3000));
        let (out, changed) = policy(TruncateMode::Head).truncate(&content, 5000);
        assert!(changed);
        assert_eq!(out.chars().count(), 5000);
        assert!(out.starts_with("aaa"));
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn tail_keeps_end_with_marker() {
        let content = format!("{}{}", "a".repeat(3000), "b".repeat(3000));
        let (out, changed) = policy(TruncateMode::Tail).truncate(&content, 5000);
        assert!(changed);
        assert_eq!(out.chars().count(), 5000);
        assert!(out.starts_with(ELLIPSIS));
        assert!(out.ends_with("bbb"));
    }

    #[test]
    fn smart_cuts_at_paragraphs() {
        let content = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph that is long.";
        let out = smart_truncate(content, 60);
        assert_eq!(out, "First paragraph.\n\nSecond paragraph.\n\n[... truncated]");
    }

    #[test]
    fn smart_falls_back_to_lines() {
        let content = format!("short line\nanother line\n{}", "z".repeat(100));
        let out = smart_truncate(&content, 50);
        assert_eq!(out, "short line\nanother line\n[... truncated]");
    }

    #[test]
    fn smart_falls_back_to_raw_cut() {
        let content = "x".repeat(100);
        let out = smart_truncate(&content, 40);
        assert_eq!(out.chars().count(), 40);
        assert!(out.ends_with(LINE_MARKER));
    }

    #[test]
    fn smart_skips_oversized_first_paragraph() {
        let content = format!("{}\n\nsmall", "x".repeat(100));
        let out = smart_truncate(&content, 40);
        assert!(out.chars().count() <= 40);
        assert!(out.ends_with("[... truncated]"));
    }

    #[test]
    fn multibyte_content_is_cut_on_char_boundaries() {
        let content = "é".repeat(100);
        for mode in all_modes() {
            let (out, _) = policy(mode).truncate(&content, 30);
            assert!(out.chars().count() <= 30);
        }
    }

    #[test]
    fn token_budget_is_respected() {
        let p = TruncationPolicy::new(TruncateMode::Smart, SizeEstimator::tokens());
        let content = format!("{{\"data\": \"{}\"}}", "q".repeat(10_000));
        let (out, changed) = p.truncate(&content, 200);
        assert!(changed);
        assert!(SizeEstimator::tokens().estimate(&out) <= 200);
        let (again, changed_again) = p.truncate(&out, 200);
        assert_eq!(again, out);
        assert!(!changed_again);
    }

    #[test]
    fn compact_arguments_strips_whitespace_first() {
        let pretty = serde_json::to_string_pretty(&serde_json::json!({
            "path": "src/main.rs",
            "lines": (0..150).collect::<Vec<_>>(),
        }))
        .unwrap();
        assert!(pretty.len() > 1000);

        let (out, changed) = compact_arguments(&pretty, 1000, true);
        assert!(changed);
        assert!(!out.contains('\n'));
        assert!(!out.ends_with(ELLIPSIS));
        let reparsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(reparsed["path"], "src/main.rs");
    }

    #[test]
    fn compact_arguments_cuts_when_still_too_long() {
        let big = serde_json::json!({ "blob": "b".repeat(2000) }).to_string();
        let (out, changed) = compact_arguments(&big, 1000, true);
        assert!(changed);
        assert_eq!(out.chars().count(), 1000);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn compact_arguments_malformed_falls_back_silently() {
        let broken = format!("{{\"unterminated\": \"{}", "x".repeat(1500));
        let (out, changed) = compact_arguments(&broken, 1000, true);
        assert!(changed);
        assert_eq!(out.chars().count(), 1000);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn compact_arguments_respects_compression_flag() {
        let pretty = format!("{{\n    \"k\": \"{}\"\n}}", "v".repeat(990));
        let (compressed, _) = compact_arguments(&pretty, 1000, true);
        assert!(!compressed.ends_with(ELLIPSIS));
        let (raw, _) = compact_arguments(&pretty, 1000, false);
        assert!(raw.ends_with(ELLIPSIS));
    }

    #[test]
    fn truncate_mode_parses() {
        assert_eq!("head".parse::<TruncateMode>(), Ok(TruncateMode::Head));
        assert!("middle".parse::<TruncateMode>().is_err());
    }
}
