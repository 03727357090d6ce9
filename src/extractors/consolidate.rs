// src/extractors/consolidate.rs
//! Reduces validated candidates to one authoritative value per field.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::extractors::candidate::Candidate;
use crate::extractors::fields::Field;
use crate::extractors::normalize::NormalizedValue;
use crate::extractors::validate::ValidCandidate;

pub const ABSENT: &str = "N/A";

/// Weight of each non-best candidate within one document.
const REPEAT_WEIGHT: f64 = 0.25;
const SCORE_EPSILON: f64 = 1e-9;

/// The winning value for a field plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub value: NormalizedValue,
    pub display: String,
    pub confidence: f64,
    pub group_score: f64,
    pub winner: Candidate,
    /// Distinct documents whose candidates agreed on this value, in input order.
    pub supporting_documents: Vec<String>,
    /// Validated candidates considered for the field, across all groups.
    pub candidate_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldValue {
    Present(Selection),
    Absent,
}

/// One value per field, or an explicit absence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedRecord {
    pub company: String,
    pub fields: BTreeMap<Field, FieldValue>,
}

impl ConsolidatedRecord {
    pub fn get(&self, field: Field) -> Option<&Selection> {
        match self.fields.get(&field) {
            Some(FieldValue::Present(selection)) => Some(selection),
            _ => None,
        }
    }

    pub fn is_present(&self, field: Field) -> bool {
        self.get(field).is_some()
    }

    /// Display value, or `N/A` for an absent field.
    pub fn display(&self, field: Field) -> String {
        self.get(field)
            .map(|s| s.display.clone())
            .unwrap_or_else(|| ABSENT.to_string())
    }

    /// Flat `field name -> value` mapping covering every field.
    pub fn flat(&self) -> BTreeMap<String, String> {
        Field::ALL
            .into_iter()
            .map(|f| (f.name().to_string(), self.display(f)))
            .collect()
    }

    /// Tracked fields with a value.
    pub fn filled_tracked(&self) -> usize {
        Field::tracked().filter(|f| self.is_present(*f)).count()
    }
}

/// Candidates sharing one normalized value.
#[derive(Debug, Clone)]
pub struct ValueGroup<'a> {
    pub key: String,
    pub members: Vec<ValidCandidate<'a>>,
    pub score: f64,
}

impl<'a> ValueGroup<'a> {
    fn max_priority(&self) -> u8 {
        self.members.iter().map(|m| m.pattern_priority).max().unwrap_or(0)
    }

    fn earliest_document(&self) -> usize {
        self.members.iter().map(|m| m.document_index).min().unwrap_or(usize::MAX)
    }

    /// Highest priority, then confidence, then earliest document, then earliest span.
    /// Pattern name settles exact duplicates.
    pub fn representative(&self) -> Option<ValidCandidate<'a>> {
        self.members.iter().copied().reduce(|best, c| {
            if representative_order(&c, &best) == Ordering::Greater {
                c
            } else {
                best
            }
        })
    }

    fn supporting_documents(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut ordered: Vec<(usize, String)> = Vec::new();
        for m in &self.members {
            if seen.insert(m.document_index) {
                ordered.push((m.document_index, m.source_document_id.clone()));
            }
        }
        ordered.sort();
        ordered.into_iter().map(|(_, id)| id).collect()
    }
}

fn representative_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.pattern_priority
        .cmp(&b.pattern_priority)
        .then_with(|| a.confidence.partial_cmp(&b.confidence).unwrap_or(Ordering::Equal))
        .then_with(|| b.document_index.cmp(&a.document_index))
        .then_with(|| b.span.cmp(&a.span))
        .then_with(|| b.pattern_name.cmp(&a.pattern_name))
}

/// Selection score of a group.
///
/// Each document contributes its best weight plus a fraction of the rest, and
/// the total is multiplied up by the number of distinct agreeing documents.
pub fn group_score(field: Field, members: &[ValidCandidate<'_>]) -> f64 {
    let mut per_document: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for m in members {
        let weight = m.confidence * f64::from(m.pattern_priority) / 100.0;
        per_document.entry(m.document_index).or_default().push(weight);
    }

    let base: f64 = per_document
        .values_mut()
        .map(|weights| {
            // Order-independent sum
            weights.sort_by(f64::total_cmp);
            let best = weights.iter().copied().fold(0.0, f64::max);
            let sum: f64 = weights.iter().sum();
            best + REPEAT_WEIGHT * (sum - best)
        })
        .sum();

    let distinct = per_document.len().max(1) as f64;
    let corroboration = 1.0 + field.rule().corroboration_bonus * (distinct - 1.0);
    let specificity = members.first().map(|m| m.value().specificity()).unwrap_or(1.0);
    base * corroboration * specificity
}

/// Groups a field's candidates by equivalence key, in key order.
pub fn group_candidates<'a>(field: Field, candidates: &[ValidCandidate<'a>]) -> Vec<ValueGroup<'a>> {
    let mut by_key: BTreeMap<String, Vec<ValidCandidate<'a>>> = BTreeMap::new();
    for c in candidates.iter().filter(|c| c.field == field) {
        by_key.entry(c.value().equivalence_key()).or_default().push(*c);
    }
    by_key
        .into_iter()
        .map(|(key, members)| {
            let score = group_score(field, &members);
            ValueGroup { key, members, score }
        })
        .collect()
}

/// True when `a` should win over `b`.
fn outranks(a: &ValueGroup<'_>, b: &ValueGroup<'_>) -> bool {
    if (a.score - b.score).abs() >= SCORE_EPSILON {
        return a.score > b.score;
    }
    a.max_priority()
        .cmp(&b.max_priority())
        .then_with(|| b.earliest_document().cmp(&a.earliest_document()))
        .then_with(|| b.key.cmp(&a.key))
        == Ordering::Greater
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Consolidator;

impl Consolidator {
    pub fn new() -> Self {
        Self
    }

    pub fn consolidate(&self, company: &str, candidates: &[ValidCandidate<'_>]) -> ConsolidatedRecord {
        let fields = Field::ALL
            .into_iter()
            .map(|field| (field, self.consolidate_field(field, candidates)))
            .collect();
        ConsolidatedRecord {
            company: company.to_string(),
            fields,
        }
    }

    pub fn consolidate_field(&self, field: Field, candidates: &[ValidCandidate<'_>]) -> FieldValue {
        // 1. Group by exact normalized value
        let groups = group_candidates(field, candidates);
        let candidate_count: usize = groups.iter().map(|g| g.members.len()).sum();

        // 2. Best group by score, then priority, document order and key
        let Some(best) = groups.iter().reduce(|best, g| if outranks(g, best) { g } else { best }) else {
            tracing::debug!("{}: no surviving candidates", field);
            return FieldValue::Absent;
        };
        // 3. One member speaks for the group
        let Some(winner) = best.representative() else {
            return FieldValue::Absent;
        };

        tracing::debug!(
            "{}: '{}' wins with score {:.3} over {} groups",
            field,
            winner.value().display(),
            best.score,
            groups.len()
        );

        FieldValue::Present(Selection {
            value: winner.value().clone(),
            display: winner.value().display(),
            confidence: winner.confidence,
            group_score: best.score,
            winner: winner.candidate().clone(),
            supporting_documents: best.supporting_documents(),
            candidate_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::candidate::Span;
    use crate::extractors::confidence::MIN_CONFIDENCE;
    use crate::extractors::normalize::{FieldNormalizer, FiscalWindow};
    use crate::extractors::registry::PatternRegistry;
    use crate::extractors::validate::Validator;

    fn candidate(field: Field, raw: &str, doc: usize, priority: u8, confidence: f64) -> Candidate {
        let value = FieldNormalizer::new(FiscalWindow::around(2024))
            .normalize(raw, field.kind())
            .unwrap();
        Candidate {
            field,
            raw_value: raw.to_string(),
            normalized_value: Some(value),
            normalization_error: None,
            source_document_id: format!("doc{}.txt", doc),
            document_index: doc,
            pattern_name: format!("p{}", priority),
            pattern_priority: priority,
            company_scoped: false,
            confidence,
            span: Span { page: 0, start: 0, end: raw.len() },
        }
    }

    /// A candidate whose normalization failed, as the extractor records it.
    fn floored(field: Field, raw: &str, doc: usize, priority: u8) -> Candidate {
        let normalizer = FieldNormalizer::new(FiscalWindow::around(2024));
        let error = normalizer.normalize(raw, field.kind()).unwrap_err();
        Candidate {
            raw_value: raw.to_string(),
            normalized_value: normalizer.fallback(raw, field.kind(), None),
            normalization_error: Some(error.to_string()),
            confidence: MIN_CONFIDENCE,
            ..candidate(field, "$1", doc, priority, MIN_CONFIDENCE)
        }
    }

    fn validated(candidates: &[Candidate]) -> Vec<ValidCandidate<'_>> {
        let registry = PatternRegistry::new();
        let validator = Validator::new(&registry, FiscalWindow::around(2024));
        validator.partition(candidates).accepted
    }

    #[test]
    fn corroboration_outranks_repetition() {
        let candidates = vec![
            // one document repeating a value three times
            candidate(Field::TotalAssets, "$500M", 0, 80, 0.9),
            candidate(Field::TotalAssets, "$500M", 0, 80, 0.9),
            candidate(Field::TotalAssets, "$500M", 0, 80, 0.9),
            // two documents agreeing once each
            candidate(Field::TotalAssets, "$521.74M", 1, 80, 0.9),
            candidate(Field::TotalAssets, "$521.74 million", 2, 80, 0.9),
        ];
        let valid = validated(&candidates);
        let record = Consolidator::new().consolidate("TEST", &valid);
        let selection = record.get(Field::TotalAssets).unwrap();
        assert_eq!(selection.display, "$521.74M");
        assert_eq!(selection.supporting_documents, ["doc1.txt", "doc2.txt"]);
        assert_eq!(selection.candidate_count, 5);
    }

    #[test]
    fn distinct_amounts_with_the_same_display_stay_apart() {
        let candidates = vec![
            candidate(Field::Revenue, "$1,234,567", 0, 80, 0.9),
            candidate(Field::Revenue, "$1,230,000", 1, 80, 0.6),
            candidate(Field::Revenue, "$1.23 million", 2, 80, 0.6),
        ];
        let valid = validated(&candidates);
        let groups = group_candidates(Field::Revenue, &valid);
        assert_eq!(groups.len(), 2);

        // Two documents agreeing exactly beat one stronger reading
        let selection = Consolidator::new().consolidate("TEST", &valid).get(Field::Revenue).cloned().unwrap();
        assert_eq!(selection.value.numeric(), Some(1_230_000.0));
        assert_eq!(selection.supporting_documents, ["doc1.txt", "doc2.txt"]);
    }

    #[test]
    fn floored_candidate_competes_and_loses() {
        let candidates = vec![
            floored(Field::Revenue, "$12.3.4M", 0, 80),
            candidate(Field::Revenue, "$11.9M", 1, 80, 0.8),
        ];
        let valid = validated(&candidates);
        assert_eq!(valid.len(), 2);
        assert_eq!(group_candidates(Field::Revenue, &valid).len(), 2);

        let record = Consolidator::new().consolidate("TEST", &valid);
        let selection = record.get(Field::Revenue).unwrap();
        assert_eq!(selection.display, "$11.90M");
        assert_eq!(selection.candidate_count, 2);
    }

    #[test]
    fn floored_candidate_fills_an_otherwise_empty_field() {
        let candidates = vec![floored(Field::Revenue, "$12.3.4M", 0, 80)];
        let valid = validated(&candidates);
        let record = Consolidator::new().consolidate("TEST", &valid);
        let selection = record.get(Field::Revenue).unwrap();
        assert_eq!(selection.display, "$12.30M");
        assert_eq!(selection.confidence, MIN_CONFIDENCE);
    }

    #[test]
    fn corroboration_never_decreases_score() {
        let one = vec![candidate(Field::StockSymbol, "BLBD", 0, 95, 0.9)];
        let two = vec![
            candidate(Field::StockSymbol, "BLBD", 0, 95, 0.9),
            candidate(Field::StockSymbol, "BLBD", 1, 40, 0.2),
        ];
        let a = group_score(Field::StockSymbol, &validated(&one));
        let b = group_score(Field::StockSymbol, &validated(&two));
        assert!(b >= a);
    }

    #[test]
    fn higher_priority_breaks_score_ties() {
        // equal weight: 0.9 * 80/100 == 0.8 * 90/100
        let candidates = vec![
            candidate(Field::NetMargin, "2.1%", 0, 80, 0.9),
            candidate(Field::NetMargin, "2.4%", 1, 90, 0.8),
        ];
        let valid = validated(&candidates);
        let record = Consolidator::new().consolidate("TEST", &valid);
        assert_eq!(record.display(Field::NetMargin), "2.40%");
    }

    #[test]
    fn earlier_document_breaks_remaining_ties() {
        let candidates = vec![
            candidate(Field::OperatingMargin, "3.6%", 1, 80, 0.9),
            candidate(Field::OperatingMargin, "4.0%", 0, 80, 0.9),
        ];
        let valid = validated(&candidates);
        let record = Consolidator::new().consolidate("TEST", &valid);
        assert_eq!(record.display(Field::OperatingMargin), "4.00%");
    }

    #[test]
    fn full_dates_outrank_bare_years() {
        let candidates = vec![
            candidate(Field::FiscalYear, "2023", 0, 80, 0.9),
            candidate(Field::FiscalYear, "2022", 0, 80, 0.9),
            candidate(Field::FiscalYear, "September 30, 2023", 1, 80, 0.8),
        ];
        let valid = validated(&candidates);
        let record = Consolidator::new().consolidate("TEST", &valid);
        assert_eq!(record.display(Field::FiscalYear), "September 30, 2023");
    }

    #[test]
    fn representative_prefers_priority_then_confidence() {
        let candidates = vec![
            candidate(Field::CompanyName, "Blue Bird Corporation", 0, 55, 0.9),
            candidate(Field::CompanyName, "BLUE BIRD CORPORATION", 1, 95, 0.7),
        ];
        let valid = validated(&candidates);
        let record = Consolidator::new().consolidate("TEST", &valid);
        let selection = record.get(Field::CompanyName).unwrap();
        assert_eq!(selection.display, "BLUE BIRD CORPORATION");
        assert_eq!(selection.winner.document_index, 1);
    }

    #[test]
    fn consolidation_is_deterministic() {
        let candidates = vec![
            candidate(Field::Revenue, "$1.13B", 0, 80, 0.9),
            candidate(Field::Revenue, "$1.2B", 1, 80, 0.9),
            candidate(Field::Revenue, "$1.13 billion", 2, 60, 0.6),
            candidate(Field::NetIncome, "$24.3M", 0, 60, 0.6),
        ];
        let valid = validated(&candidates);
        let first = Consolidator::new().consolidate("TEST", &valid);
        for _ in 0..10 {
            let mut shuffled = valid.clone();
            shuffled.reverse();
            assert_eq!(Consolidator::new().consolidate("TEST", &shuffled), first);
        }
        assert_eq!(first.display(Field::Revenue), "$1.13B");
    }

    #[test]
    fn absent_fields_render_as_na() {
        let record = Consolidator::new().consolidate("TEST", &[]);
        let flat = record.flat();
        assert_eq!(flat.len(), Field::ALL.len());
        assert!(flat.values().all(|v| v == ABSENT));
        assert_eq!(record.filled_tracked(), 0);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fields"]["stock_symbol"]["status"], "absent");
    }
}
