// src/extractors/validate.rs
//! Field-specific acceptance rules and the rejection audit log.

use std::ops::Deref;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::extractors::candidate::{Candidate, Span};
use crate::extractors::fields::Field;
use crate::extractors::normalize::{FiscalWindow, NormalizedValue};
use crate::extractors::registry::PatternRegistry;
use crate::utils::error::RejectionReason;

// --- Regex Patterns (Lazy Static) ---
// Legal and accounting boilerplate that leaks into narrative fields
static BOILERPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:pursuant\s+to|section\s+\d+[a-z]?|regulation\s+[a-z]{1,2}-[a-z]\b|rule\s+\d+[a-z]?(?:-\d+)?|act\s+of\s+\d{4}|(?:internal\s+revenue|bankruptcy)\s+code|disclosures?|commitments?|lease\s+(?:obligations?|liabilit(?:y|ies)|payments?)|obligations?|contingent|financial\s+condition|results\s+of\s+operations|consolidated\s+(?:financial\s+statements?|balance\s+sheets?|statements?\s+of)|goodwill|intangible|amortization|depreciation|impairment|risk\s+that|could\s+be\s+construed|forward-looking|incorporated\s+by\s+reference)\b",
    )
    .expect("Failed to compile BOILERPLATE_RE")
});

static LONG_LETTER_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]{25,}").expect("Failed to compile LONG_LETTER_RUN_RE"));

static LOCALITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)[A-Z][A-Za-z.'\-]+(?:\s+[A-Z][A-Za-z.'\-]+)*,\s*[A-Z][A-Za-z.]+")
        .expect("Failed to compile LOCALITY_RE")
});

/// Text at least this long must contain a reasonable share of spaces.
const SPACING_CHECK_MIN_LEN: usize = 40;
const MIN_SPACE_RATIO: f64 = 0.05;

/// A candidate that has passed validation.
///
/// Only the Validator can construct one, so the Consolidator never sees
/// unvalidated input.
#[derive(Debug, Clone, Copy)]
pub struct ValidCandidate<'a> {
    candidate: &'a Candidate,
    value: &'a NormalizedValue,
}

impl<'a> ValidCandidate<'a> {
    pub fn candidate(&self) -> &'a Candidate {
        self.candidate
    }

    pub fn value(&self) -> &'a NormalizedValue {
        self.value
    }
}

impl Deref for ValidCandidate<'_> {
    type Target = Candidate;

    fn deref(&self) -> &Candidate {
        self.candidate
    }
}

/// One excluded candidate, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectionRecord {
    pub field: Field,
    pub source_document_id: String,
    pub pattern_name: String,
    pub raw_value: String,
    pub span: Span,
    pub reason: RejectionReason,
    pub message: String,
}

impl RejectionRecord {
    fn new(candidate: &Candidate, reason: RejectionReason) -> Self {
        Self {
            field: candidate.field,
            source_document_id: candidate.source_document_id.clone(),
            pattern_name: candidate.pattern_name.clone(),
            raw_value: candidate.raw_value.clone(),
            span: candidate.span,
            message: reason.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct Validated<'a> {
    pub accepted: Vec<ValidCandidate<'a>>,
    pub rejected: Vec<RejectionRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct Validator<'r> {
    registry: &'r PatternRegistry,
    window: FiscalWindow,
}

impl<'r> Validator<'r> {
    pub fn new(registry: &'r PatternRegistry, window: FiscalWindow) -> Self {
        Self { registry, window }
    }

    pub fn is_acceptable(&self, candidate: &Candidate) -> bool {
        self.check(candidate).is_ok()
    }

    pub fn check(&self, candidate: &Candidate) -> Result<(), RejectionReason> {
        self.accept(candidate).map(|_| ())
    }

    /// Wraps `candidate` as a [`ValidCandidate`] if every rule passes.
    ///
    /// A candidate whose normalization failed is judged on its partial reading
    /// and is rejected outright only when it has none.
    pub fn accept<'a>(&self, candidate: &'a Candidate) -> Result<ValidCandidate<'a>, RejectionReason> {
        let value = match &candidate.normalized_value {
            Some(value) => value,
            None => {
                return Err(RejectionReason::Unnormalized(
                    candidate
                        .normalization_error
                        .clone()
                        .unwrap_or_else(|| "no normalized value".to_string()),
                ))
            }
        };

        if value.kind() != candidate.field.kind() {
            return Err(RejectionReason::KindMismatch);
        }

        let rule = candidate.field.rule();
        match value {
            NormalizedValue::Ticker(symbol) => {
                if self.registry.is_stoplisted(symbol) {
                    return Err(RejectionReason::StoplistedTicker(symbol.clone()));
                }
            }
            NormalizedValue::Text(_) | NormalizedValue::List(_) => {
                let text = value.display();
                let tokens = text.split_whitespace().count();
                if tokens < rule.min_tokens {
                    return Err(RejectionReason::TooShort {
                        found: tokens,
                        required: rule.min_tokens,
                    });
                }
                if let Some(marker) = BOILERPLATE_RE.find(&text) {
                    return Err(RejectionReason::Boilerplate(marker.as_str().to_lowercase()));
                }
                if is_garbled(&text) {
                    return Err(RejectionReason::Garbled);
                }
                if !rule.required_keywords.is_empty() {
                    let lower = text.to_lowercase();
                    if !rule.required_keywords.iter().any(|kw| lower.contains(kw)) {
                        return Err(RejectionReason::MissingKeyword);
                    }
                }
                if rule.requires_locality && !LOCALITY_RE.is_match(&text) {
                    return Err(RejectionReason::MissingLocality);
                }
            }
            NormalizedValue::Currency { amount, .. } => check_magnitude(*amount, rule.allow_negative, rule.max_magnitude)?,
            NormalizedValue::Count(n) => check_magnitude(*n as f64, rule.allow_negative, rule.max_magnitude)?,
            NormalizedValue::Percentage { percent } => {
                if !(-100.0..=1000.0).contains(percent) {
                    return Err(RejectionReason::PercentageOutOfRange(*percent));
                }
            }
            NormalizedValue::Date(date) => {
                if !self.window.contains(date.year) {
                    return Err(RejectionReason::OutsideFiscalWindow(date.year));
                }
            }
        }
        Ok(ValidCandidate { candidate, value })
    }

    /// Splits candidates into accepted and rejected, preserving input order.
    pub fn partition<'a>(&self, candidates: &'a [Candidate]) -> Validated<'a> {
        let mut out = Validated::default();
        for candidate in candidates {
            match self.accept(candidate) {
                Ok(valid) => out.accepted.push(valid),
                Err(reason) => {
                    tracing::debug!(
                        "Rejected {} '{}' from {}: {}",
                        candidate.field,
                        candidate.raw_value,
                        candidate.source_document_id,
                        reason
                    );
                    out.rejected.push(RejectionRecord::new(candidate, reason));
                }
            }
        }
        out
    }
}

fn check_magnitude(value: f64, allow_negative: bool, max: Option<f64>) -> Result<(), RejectionReason> {
    if value < 0.0 && !allow_negative {
        return Err(RejectionReason::Negative(value));
    }
    if max.is_some_and(|max| value.abs() > max) {
        return Err(RejectionReason::ImplausibleMagnitude(value));
    }
    Ok(())
}

/// Unspaced runs such as "Theprincipalmarketsforourservices".
fn is_garbled(text: &str) -> bool {
    if LONG_LETTER_RUN_RE.is_match(text) {
        return true;
    }
    let len = text.chars().count();
    if len < SPACING_CHECK_MIN_LEN {
        return false;
    }
    let spaces = text.chars().filter(|c| c.is_whitespace()).count();
    (spaces as f64) / (len as f64) < MIN_SPACE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::confidence::MIN_CONFIDENCE;
    use crate::extractors::normalize::{FieldNormalizer, FiscalDate};

    fn candidate(field: Field, raw: &str) -> Candidate {
        let normalizer = FieldNormalizer::new(FiscalWindow::around(2024));
        let (normalized_value, normalization_error, confidence) = match normalizer.normalize(raw, field.kind()) {
            Ok(v) => (Some(v), None, 0.5),
            Err(e) => (normalizer.fallback(raw, field.kind(), None), Some(e.to_string()), MIN_CONFIDENCE),
        };
        Candidate {
            field,
            raw_value: raw.to_string(),
            normalized_value,
            normalization_error,
            source_document_id: "doc.txt".into(),
            document_index: 0,
            pattern_name: "test".into(),
            pattern_priority: 50,
            company_scoped: false,
            confidence,
            span: Span { page: 0, start: 0, end: raw.len() },
        }
    }

    fn check(c: &Candidate) -> Result<(), RejectionReason> {
        let registry = PatternRegistry::new();
        Validator::new(&registry, FiscalWindow::around(2024)).check(c)
    }

    #[test]
    fn stoplisted_ticker_is_rejected() {
        assert_eq!(
            check(&candidate(Field::StockSymbol, "under")),
            Err(RejectionReason::StoplistedTicker("UNDER".into()))
        );
        assert!(check(&candidate(Field::StockSymbol, "BLBD")).is_ok());
    }

    #[test]
    fn candidates_without_any_reading_are_rejected() {
        let c = candidate(Field::Revenue, "a lot");
        assert!(c.normalized_value.is_none());
        assert!(matches!(check(&c), Err(RejectionReason::Unnormalized(_))));
        assert!(matches!(
            check(&candidate(Field::StockSymbol, "TOOLONG")),
            Err(RejectionReason::Unnormalized(_))
        ));
    }

    #[test]
    fn floored_candidates_face_the_usual_rules() {
        let partial = candidate(Field::Revenue, "$12.3.4M");
        assert!(!partial.is_normalized());
        assert_eq!(partial.confidence, MIN_CONFIDENCE);
        assert!(check(&partial).is_ok());

        // Partial readings are still held to the field's rules
        assert_eq!(
            check(&candidate(Field::FiscalYear, "December 31, 1970")),
            Err(RejectionReason::OutsideFiscalWindow(1970))
        );
        assert!(matches!(
            check(&candidate(Field::NetMargin, "1500%")),
            Err(RejectionReason::PercentageOutOfRange(_))
        ));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut c = candidate(Field::Revenue, "$5M");
        c.normalized_value = Some(NormalizedValue::Ticker("ABC".into()));
        assert_eq!(check(&c), Err(RejectionReason::KindMismatch));
    }

    #[test]
    fn narrative_rules() {
        assert!(matches!(
            check(&candidate(Field::CompanyName, "Bird")),
            Err(RejectionReason::TooShort { found: 1, required: 2 })
        ));
        assert!(matches!(
            check(&candidate(Field::PrimaryBusiness, "provider of services pursuant to Section 13 of the Act")),
            Err(RejectionReason::Boilerplate(_))
        ));
        assert_eq!(
            check(&candidate(Field::Industry, "Theprincipalmarketsforourbusinessare global")),
            Err(RejectionReason::Garbled)
        );
        assert_eq!(
            check(&candidate(Field::PrimaryBusiness, "one of the oldest names around here")),
            Err(RejectionReason::MissingKeyword)
        );
        assert!(check(&candidate(Field::PrimaryBusiness, "leading independent designer and manufacturer of school buses")).is_ok());
    }

    #[test]
    fn legal_citations_are_boilerplate_but_entity_words_are_not() {
        assert!(check(&candidate(Field::CompanyName, "Consolidated Edison, Inc.")).is_ok());
        assert!(check(&candidate(Field::CompanyName, "Pacific Coast Building Code Partners")).is_ok());
        assert!(check(&candidate(Field::CompanyAddress, "1 Section Road, Rule, Texas")).is_ok());
        assert!(matches!(
            check(&candidate(Field::CompanyName, "Securities Exchange Act of 1934")),
            Err(RejectionReason::Boilerplate(_))
        ));
        assert!(matches!(
            check(&candidate(Field::CompanyName, "Rule 10b-5 Statement")),
            Err(RejectionReason::Boilerplate(_))
        ));
        assert!(matches!(
            check(&candidate(Field::CompanyName, "Notes to Consolidated Financial Statements")),
            Err(RejectionReason::Boilerplate(_))
        ));
    }

    #[test]
    fn address_needs_a_locality() {
        assert!(check(&candidate(Field::CompanyAddress, "Macon, Georgia")).is_ok());
        assert!(check(&candidate(Field::CompanyAddress, "3920 Arkwright Road, Macon, Georgia 31210")).is_ok());
        assert_eq!(
            check(&candidate(Field::CompanyAddress, "our main plant")),
            Err(RejectionReason::MissingLocality)
        );
    }

    #[test]
    fn magnitude_and_sign_rules() {
        assert!(matches!(
            check(&candidate(Field::Employees, "-25")),
            Err(RejectionReason::Negative(_))
        ));
        assert!(matches!(
            check(&candidate(Field::TotalLiabilities, "-$5M")),
            Err(RejectionReason::Negative(_))
        ));
        assert!(check(&candidate(Field::NetIncome, "-$5M")).is_ok());
        assert!(matches!(
            check(&candidate(Field::Revenue, "$50T")),
            Err(RejectionReason::ImplausibleMagnitude(_))
        ));
    }

    #[test]
    fn date_window_is_rechecked() {
        let mut c = candidate(Field::FiscalYear, "September 30, 2023");
        assert!(check(&c).is_ok());
        c.normalized_value = Some(NormalizedValue::Date(FiscalDate { year: 1950, month: None, day: None }));
        assert_eq!(check(&c), Err(RejectionReason::OutsideFiscalWindow(1950)));
    }

    #[test]
    fn partition_keeps_audit_trail() {
        let registry = PatternRegistry::new();
        let validator = Validator::new(&registry, FiscalWindow::around(2024));
        let candidates = vec![
            candidate(Field::StockSymbol, "under"),
            candidate(Field::StockSymbol, "BLBD"),
        ];
        let out = validator.partition(&candidates);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].raw_value, "BLBD");
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].raw_value, "under");

        let json = serde_json::to_value(&out.rejected[0]).unwrap();
        assert_eq!(json["reason"]["reason"], "stoplisted_ticker");
        assert_eq!(json["reason"]["detail"], "UNDER");
    }
}
