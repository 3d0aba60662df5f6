//! Cheap size estimation for message content.
//!
//! No tokenizer is involved. In character mode the cost of a string is its
//! number of Unicode scalar values. In token mode the cost is a heuristic:
//! prose averages about 4 characters per token, while JSON payloads and
//! fenced code blocks are denser at about 3 characters per token (more
//! punctuation, shorter identifiers). Against real BPE tokenizers the error
//! is typically within ±25%, which is enough for budget enforcement.
//!
//! Costs are computed in integer twelfths of a token and rounded up once at
//! the end, so the estimate is deterministic and never decreases when text
//! is appended: appended characters add cost, and the only reclassification
//! appending can trigger (prose → code when a fence opens) moves characters
//! to the denser shape.

use serde::{Deserialize, Serialize};

/// Characters per token for natural-language text.
pub const PROSE_CHARS_PER_TOKEN: usize = 4;

/// Characters per token for JSON-like payloads and fenced code.
pub const DENSE_CHARS_PER_TOKEN: usize = 3;

/// Fence delimiter for code blocks.
const CODE_FENCE: &str = "```";

/// Twelfths of a token per prose character (12 / 4).
const PROSE_TWELFTHS: usize = 12 / PROSE_CHARS_PER_TOKEN;
/// Twelfths of a token per dense character (12 / 3).
const DENSE_TWELFTHS: usize = 12 / DENSE_CHARS_PER_TOKEN;

/// Unit in which budgets and sizes are expressed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostUnit {
    /// Unicode scalar values.
    #[default]
    Characters,
    /// Estimated LLM tokens.
    Tokens,
}

impl std::fmt::Display for CostUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostUnit::Characters => write!(f, "chars"),
            CostUnit::Tokens => write!(f, "tokens"),
        }
    }
}

/// Converts text into a cost in a [`CostUnit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeEstimator {
    unit: CostUnit,
}

impl SizeEstimator {
    pub fn new(unit: CostUnit) -> Self {
        Self { unit }
    }

    pub fn characters() -> Self {
        Self::new(CostUnit::Characters)
    }

    pub fn tokens() -> Self {
        Self::new(CostUnit::Tokens)
    }

    pub fn unit(&self) -> CostUnit {
        self.unit
    }

    /// Estimate the cost of `text` in this estimator's unit.
    pub fn estimate(&self, text: &str) -> usize {
        match self.unit {
            CostUnit::Characters => text.chars().count(),
            CostUnit::Tokens => estimate_tokens(text),
        }
    }

    /// Number of characters that always fits within `budget`.
    ///
    /// Every character costs at most one dense-character's worth of tokens,
    /// so `3 * budget` characters can never exceed a token budget.
    pub fn char_budget(&self, budget: usize) -> usize {
        match self.unit {
            CostUnit::Characters => budget,
            CostUnit::Tokens => budget.saturating_mul(DENSE_CHARS_PER_TOKEN),
        }
    }
}

/// Heuristic token estimate for a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let twelfths = if looks_like_json(text) {
        text.chars().count() * DENSE_TWELFTHS
    } else {
        let (dense, prose) = split_fenced(text);
        dense * DENSE_TWELFTHS + prose * PROSE_TWELFTHS
    };

    twelfths.div_ceil(12)
}

/// JSON-like when the first non-whitespace character opens an object or array.
fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().chars().next(), Some('{' | '['))
}

/// Count characters inside fenced code blocks (fences included) and outside.
///
/// An unclosed fence runs to the end of the text.
fn split_fenced(text: &str) -> (usize, usize) {
    let mut dense = 0;
    let mut prose = 0;
    let mut in_code = false;
    let mut rest = text;

    while !rest.is_empty() {
        match rest.find(CODE_FENCE) {
            Some(pos) => {
                let (before, after) = rest.split_at(pos);
                let before_chars = before.chars().count();
                if in_code {
                    dense += before_chars;
                } else {
                    prose += before_chars;
                }
                // Fence markers belong to the code block on both sides.
                dense += CODE_FENCE.len();
                in_code = !in_code;
                rest = after.strip_prefix(CODE_FENCE).unwrap_or("");
            }
            None => {
                let chars = rest.chars().count();
                if in_code {
                    dense += chars;
                } else {
                    prose += chars;
                }
                rest = "";
            }
        }
    }

    (dense, prose)
}
