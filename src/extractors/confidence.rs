// src/extractors/confidence.rs
use crate::extractors::registry::{PatternEntry, Specificity};

pub const MIN_CONFIDENCE: f64 = 0.10;
pub const MAX_CONFIDENCE: f64 = 0.98;

/// Bytes inspected on each side of a match for hedging language.
const CONTEXT_RADIUS: usize = 120;
const HEDGE_PENALTY: f64 = 0.05;
const CONTEXT_FLOOR: f64 = 0.6;

// Hedges only; "approximately" qualifies reported actuals
const HEDGE_WORDS: &[&str] = &[
    "estimated", "estimate", "projected", "expected", "may", "might", "could", "forecast",
    "anticipate", "guidance", "target", "pro forma", "preliminary", "pursuant", "risk",
];

/// Initial confidence for a match of `entry` at `start..end` within `text`.
pub fn score_match(entry: &PatternEntry, text: &str, start: usize, end: usize) -> f64 {
    let priority_factor = 0.5 + f64::from(entry.priority) / 200.0;
    let specificity = match entry.specificity {
        Specificity::Anchored => 1.0,
        Specificity::Bare => 0.75,
    };
    let context = context_factor(text, start, end);
    clamp(priority_factor * specificity * context)
}

pub fn clamp(confidence: f64) -> f64 {
    confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

fn context_factor(text: &str, start: usize, end: usize) -> f64 {
    let window = surrounding(text, start, end, CONTEXT_RADIUS).to_lowercase();
    let hits = HEDGE_WORDS
        .iter()
        .filter(|word| contains_word(&window, word))
        .count();
    (1.0 - HEDGE_PENALTY * hits as f64).max(CONTEXT_FLOOR)
}

/// Slice of `text` around `start..end`, widened to char boundaries.
pub(crate) fn surrounding(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let mut lo = start.saturating_sub(radius);
    while lo > 0 && !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + radius).min(text.len());
    while hi < text.len() && !text.is_char_boundary(hi) {
        hi += 1;
    }
    &text[lo..hi]
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
