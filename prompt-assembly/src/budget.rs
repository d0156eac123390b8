use serde::Serialize;

use common::utils::text::estimate_tokens;

/// Breakdown of the token budget for one assembled prompt.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenBudget {
    pub context_window: usize,
    pub reserved_for_response: usize,
    /// Tokens available to the prompt itself.
    pub available: usize,
}

impl TokenBudget {
    pub fn new(context_window: usize, reserved_for_response: usize) -> Self {
        Self {
            context_window,
            reserved_for_response,
            available: context_window.saturating_sub(reserved_for_response),
        }
    }
}

/// Reported with every assembled prompt so callers can see what fitting the
/// budget cost them.
#[derive(Debug, Clone, Serialize)]
pub struct TokenValidation {
    pub estimated_tokens: usize,
    pub budget: TokenBudget,
    pub within_budget: bool,
    /// Chunks dropped entirely to fit the budget.
    pub chunks_dropped: usize,
    /// Chunks shortened at a sentence boundary.
    pub chunks_truncated: usize,
    /// History messages dropped to fit the budget.
    pub history_dropped: usize,
}

/// Shortens text to at most `max_chars`, preferring to cut at the last
/// sentence boundary inside the window. Falls back to the last whitespace,
/// then to a hard cut, and appends an ellipsis when anything was removed.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let window: String = text.chars().take(max_chars).collect();

    let sentence_end = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(position, c)| position + c.len_utf8())
        .next_back();

    if let Some(end) = sentence_end {
        if end * 2 >= window.len() {
            return window[..end].trim_end().to_string();
        }
    }

    let cut = window
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(position, _)| position)
        .next_back()
        .unwrap_or(window.len());
    let mut truncated = window[..cut].trim_end().to_string();
    truncated.push('…');
    truncated
}

/// Token estimate for a chunk capped at `max_tokens`, in characters.
pub fn chunk_char_cap(max_tokens: usize) -> usize {
    max_tokens.saturating_mul(4)
}

pub fn estimate(text: &str) -> usize {
    estimate_tokens(text)
}
