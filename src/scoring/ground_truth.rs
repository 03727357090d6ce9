// src/scoring/ground_truth.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::extractors::consolidate::{ConsolidatedRecord, ABSENT};
use crate::extractors::fields::{Field, ValueKind};
use crate::extractors::normalize::parse_currency;
use crate::utils::error::AppError;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("Failed to compile YEAR_RE"));

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-−]?\d[\d,]*(?:\.\d+)?").expect("Failed to compile NUMBER_RE"));

const PERCENT_POINT_TOLERANCE: f64 = 0.5;

/// Known-correct values for one company, used only for scoring.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GroundTruth {
    pub expected: BTreeMap<Field, String>,
    /// Overall accuracy the run should reach, in percent.
    #[serde(default)]
    pub target_accuracy: Option<f64>,
}

impl GroundTruth {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid ground truth file {}: {}", path.display(), e)))
    }

    /// Per-field accuracy in `0.0..=1.0` for every expected field.
    pub fn score(&self, record: &ConsolidatedRecord) -> BTreeMap<Field, f64> {
        self.expected
            .iter()
            .map(|(field, expected)| (*field, score_field(*field, expected, record)))
            .collect()
    }

    /// Mean field accuracy, or `None` when nothing is expected.
    pub fn accuracy(&self, record: &ConsolidatedRecord) -> Option<f64> {
        let scores = self.score(record);
        if scores.is_empty() {
            return None;
        }
        Some(scores.values().sum::<f64>() / scores.len() as f64)
    }
}

pub fn score_field(field: Field, expected: &str, record: &ConsolidatedRecord) -> f64 {
    let expected = expected.trim();
    let Some(selection) = record.get(field) else {
        return if expected.eq_ignore_ascii_case(ABSENT) { 1.0 } else { 0.0 };
    };
    if expected.eq_ignore_ascii_case(ABSENT) {
        return 0.0;
    }

    let actual = selection.display.as_str();
    match field.kind() {
        ValueKind::Ticker => {
            if actual.eq_ignore_ascii_case(expected) {
                1.0
            } else {
                0.0
            }
        }
        ValueKind::Text | ValueKind::List => text_similarity(actual, expected),
        ValueKind::Date => {
            let a = actual.to_lowercase();
            let e = expected.to_lowercase();
            if a.contains(&e) || e.contains(&a) {
                1.0
            } else if same_year(&a, &e) {
                0.8
            } else {
                0.0
            }
        }
        ValueKind::Currency => match (selection.value.numeric(), expected_amount(expected)) {
            (Some(a), Some(e)) => relative_score(a, e),
            _ => exact(actual, expected),
        },
        ValueKind::Count => match (selection.value.numeric(), first_number(expected)) {
            (Some(a), Some(e)) => relative_score(a, e),
            _ => exact(actual, expected),
        },
        ValueKind::Percentage => {
            // A bare "%" only asks for a percentage-shaped value
            if expected == "%" {
                return 1.0;
            }
            match (selection.value.numeric(), first_number(expected)) {
                (Some(a), Some(e)) if (a - e).abs() <= PERCENT_POINT_TOLERANCE => 1.0,
                (Some(_), Some(_)) => 0.0,
                _ => exact(actual, expected),
            }
        }
    }
}

fn exact(actual: &str, expected: &str) -> f64 {
    if actual.eq_ignore_ascii_case(expected) {
        1.0
    } else {
        0.0
    }
}

fn text_similarity(actual: &str, expected: &str) -> f64 {
    let a = actual.to_lowercase();
    let e = expected.to_lowercase();
    if a.contains(&e) || e.contains(&a) {
        return 1.0;
    }
    let words: Vec<&str> = e
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| a.contains(*w)).count();
    if hits == words.len() {
        1.0
    } else if hits > 0 {
        0.7
    } else {
        0.0
    }
}

fn same_year(a: &str, b: &str) -> bool {
    match (YEAR_RE.find(a), YEAR_RE.find(b)) {
        (Some(x), Some(y)) => x.as_str() == y.as_str(),
        _ => false,
    }
}

fn expected_amount(expected: &str) -> Option<f64> {
    parse_currency(expected)
        .map(|(amount, _)| amount)
        .ok()
        .or_else(|| first_number(expected))
}

fn first_number(text: &str) -> Option<f64> {
    NUMBER_RE
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").replace('−', "-").parse().ok())
}

/// 1.0 within 5 %, 0.5 within 20 %, else 0.
fn relative_score(actual: f64, expected: f64) -> f64 {
    let scale = expected.abs().max(f64::EPSILON);
    let diff = (actual - expected).abs() / scale;
    if diff <= 0.05 {
        1.0
    } else if diff <= 0.20 {
        0.5
    } else {
        0.0
    }
}
