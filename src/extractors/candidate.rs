// src/extractors/candidate.rs
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::documents::Document;
use crate::extractors::confidence::{self, MIN_CONFIDENCE};
use crate::extractors::fields::{Field, ValueKind};
use crate::extractors::normalize::{FieldNormalizer, NormalizedValue, Scale};
use crate::extractors::registry::{CompanyIdentity, PatternRegistry};

// --- Regex Patterns (Lazy Static) ---
// "(in thousands)", "(amounts in millions, except per share data)", "(Dollars in thousands)"
static STATEMENT_SCALE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\((?:[a-z$.\s]{0,20}\s)?in\s+(?P<scale>thousands|millions|billions)\b[^)\n]{0,60}\)")
        .expect("Failed to compile STATEMENT_SCALE_RE")
});

/// Location of a match: page index plus byte range within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub page: usize,
    pub start: usize,
    pub end: usize,
}

/// A single extracted, not-yet-reconciled reading of one field from one document.
///
/// Never mutated after creation; rejection is recorded elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub field: Field,
    pub raw_value: String,
    /// After a normalization failure this is the partial reading, if any.
    pub normalized_value: Option<NormalizedValue>,
    pub normalization_error: Option<String>,
    pub source_document_id: String,
    /// Position of the source document in the run's input ordering.
    pub document_index: usize,
    pub pattern_name: String,
    pub pattern_priority: u8,
    pub company_scoped: bool,
    pub confidence: f64,
    pub span: Span,
}

impl Candidate {
    pub fn is_normalized(&self) -> bool {
        self.normalized_value.is_some() && self.normalization_error.is_none()
    }

    /// Display form of the normalized value, falling back to the raw text.
    pub fn display(&self) -> String {
        self.normalized_value
            .as_ref()
            .map(NormalizedValue::display)
            .unwrap_or_else(|| self.raw_value.clone())
    }
}

/// Scans document text against the registry for one company identity.
#[derive(Debug, Clone, Copy)]
pub struct CandidateExtractor<'r> {
    registry: &'r PatternRegistry,
    normalizer: FieldNormalizer,
    identity: CompanyIdentity,
}

impl<'r> CandidateExtractor<'r> {
    pub fn new(registry: &'r PatternRegistry, normalizer: FieldNormalizer, identity: CompanyIdentity) -> Self {
        Self {
            registry,
            normalizer,
            identity,
        }
    }

    /// Every match of every applicable pattern, per field, per page, in page order.
    pub fn extract(&self, document: &Document, document_index: usize) -> Vec<Candidate> {
        // 1. Statement headers ("in thousands") per page
        let scales: Vec<Option<Scale>> = document.pages.iter().map(|p| statement_scale(p)).collect();
        let mut candidates = Vec::new();

        for field in Field::ALL {
            let kind = field.kind();
            let scale_applies = kind == ValueKind::Currency && field.rule().statement_scaled;

            // 2. Generic patterns plus those scoped to this company
            for entry in self.registry.lookup(field, self.identity) {
                for (page_index, page) in document.pages.iter().enumerate() {
                    for caps in entry.regex.captures_iter(page) {
                        let Some(m) = caps.name("value") else {
                            continue;
                        };
                        let raw = m.as_str();
                        if raw.trim().is_empty() {
                            continue;
                        }

                        // 3. Normalize; a failure keeps the partial reading at floor confidence
                        let scale = if scale_applies { scales[page_index] } else { None };
                        let (normalized_value, normalization_error, confidence) =
                            match self.normalizer.normalize_scaled(raw, kind, scale) {
                                Ok(value) => {
                                    let c = confidence::score_match(entry, page, m.start(), m.end());
                                    (Some(value), None, c)
                                }
                                Err(e) => (
                                    self.normalizer.fallback(raw, kind, scale),
                                    Some(e.to_string()),
                                    MIN_CONFIDENCE,
                                ),
                            };

                        tracing::debug!(
                            "{} [{}] {}: '{}' (p{}, conf {:.2})",
                            document.id,
                            entry.name,
                            field,
                            raw,
                            page_index + 1,
                            confidence
                        );

                        // 4. Keep every match with its provenance
                        candidates.push(Candidate {
                            field,
                            raw_value: raw.to_string(),
                            normalized_value,
                            normalization_error,
                            source_document_id: document.id.clone(),
                            document_index,
                            pattern_name: entry.name.clone(),
                            pattern_priority: entry.priority,
                            company_scoped: entry.is_scoped(),
                            confidence,
                            span: Span {
                                page: page_index,
                                start: m.start(),
                                end: m.end(),
                            },
                        });
                    }
                }
            }
        }

        tracing::info!("{}: {} candidates", document.id, candidates.len());
        candidates
    }
}

/// Magnitude declared by a statement header on this page, if any.
pub fn statement_scale(page: &str) -> Option<Scale> {
    STATEMENT_SCALE_RE
        .captures(page)
        .and_then(|c| c.name("scale"))
        .and_then(|m| Scale::from_suffix(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::normalize::FiscalWindow;

    fn extractor(registry: &PatternRegistry, identity: CompanyIdentity) -> CandidateExtractor<'_> {
        CandidateExtractor::new(registry, FieldNormalizer::new(FiscalWindow::around(2024)), identity)
    }

    fn displays(candidates: &[Candidate], field: Field) -> Vec<String> {
        candidates
            .iter()
            .filter(|c| c.field == field)
            .map(Candidate::display)
            .collect()
    }

    #[test]
    fn detects_statement_scale_headers() {
        assert_eq!(statement_scale("CONSOLIDATED BALANCE SHEETS\n(in thousands of dollars)"), Some(Scale::Thousands));
        assert_eq!(
            statement_scale("(Amounts in millions, except per share data)"),
            Some(Scale::Millions)
        );
        assert_eq!(statement_scale("We invested in thousands of schools."), None);
    }

    #[test]
    fn retains_every_match_with_provenance() {
        let registry = PatternRegistry::builtin().unwrap();
        let doc = Document::from_text(
            "release.txt",
            "Blue Bird Corporation (NASDAQ: BLBD) reported results.\x0CTicker symbol: BLBD",
        );
        let candidates = extractor(&registry, CompanyIdentity::BlueBird).extract(&doc, 3);

        let symbols: Vec<&Candidate> = candidates.iter().filter(|c| c.field == Field::StockSymbol).collect();
        assert!(symbols.len() >= 3);
        assert!(symbols.iter().all(|c| c.document_index == 3 && c.source_document_id == "release.txt"));
        assert!(symbols.iter().any(|c| c.span.page == 1));

        let scoped = symbols.iter().find(|c| c.pattern_name == "blue_bird_ticker").unwrap();
        assert!(scoped.company_scoped);
        assert_eq!(scoped.normalized_value, Some(NormalizedValue::Ticker("BLBD".into())));
        assert_eq!(&doc.pages[scoped.span.page][scoped.span.start..scoped.span.end], "BLBD");
    }

    #[test]
    fn scoped_patterns_need_matching_identity() {
        let registry = PatternRegistry::builtin().unwrap();
        let doc = Document::from_text("deck.txt", "Our plant is in Macon, Georgia.");
        let scoped = extractor(&registry, CompanyIdentity::BlueBird).extract(&doc, 0);
        let generic = extractor(&registry, CompanyIdentity::Unrecognized).extract(&doc, 0);
        assert_eq!(displays(&scoped, Field::CompanyAddress), ["Macon, Georgia"]);
        assert!(displays(&generic, Field::CompanyAddress).is_empty());
    }

    #[test]
    fn applies_page_scale_to_unsuffixed_amounts() {
        let registry = PatternRegistry::builtin().unwrap();
        let doc = Document::from_text(
            "10k.txt",
            "BALANCE SHEET\n(in thousands of dollars)\nTotal liabilities $ 66,590\x0CTotal liabilities were $66.59 million.",
        );
        let candidates = extractor(&registry, CompanyIdentity::Unrecognized).extract(&doc, 0);
        let values = displays(&candidates, Field::TotalLiabilities);
        assert!(!values.is_empty());
        assert!(values.iter().all(|v| v == "$66.59M"), "{:?}", values);
    }

    #[test]
    fn normalization_failure_floors_confidence() {
        let registry = PatternRegistry::builtin().unwrap();
        let doc = Document::from_text("old.txt", "For the fiscal year ended December 31, 1970, revenue grew.");
        let candidates = extractor(&registry, CompanyIdentity::Unrecognized).extract(&doc, 0);
        let dated: Vec<&Candidate> = candidates.iter().filter(|c| c.field == Field::FiscalYear).collect();
        assert!(!dated.is_empty());
        for c in dated {
            assert!(!c.is_normalized());
            assert!(c.normalization_error.is_some());
            assert_eq!(c.confidence, MIN_CONFIDENCE);
            // Partial reading kept for the validator
            assert!(matches!(c.normalized_value, Some(NormalizedValue::Date(d)) if d.year == 1970));
        }
    }

    #[test]
    fn anchored_match_outscores_bare_match() {
        let registry = PatternRegistry::builtin().unwrap();
        let doc = Document::from_text("r.txt", "Net income was $24.3 million.\nNet income: $24.3 million");
        let candidates = extractor(&registry, CompanyIdentity::Unrecognized).extract(&doc, 0);
        let labelled = candidates.iter().find(|c| c.pattern_name == "net_income_labelled").unwrap();
        let bare = candidates.iter().find(|c| c.pattern_name == "net_income_bare").unwrap();
        assert!(labelled.confidence > bare.confidence);
        assert_eq!(labelled.display(), bare.display());
    }
}
