// src/scoring/mod.rs
//! Completeness, confidence and quality metrics for a consolidated record.

pub mod ground_truth;

use std::collections::BTreeMap;

use serde::Serialize;

pub use ground_truth::GroundTruth;

use crate::documents::DocumentFailure;
use crate::extractors::consolidate::ConsolidatedRecord;
use crate::extractors::fields::Field;
use crate::reference::{ReferenceOutcome, ReferenceQuote};

/// Winning confidence a tracked field needs to count as intrinsically plausible.
pub const PLAUSIBLE_CONFIDENCE: f64 = 0.6;
/// Relative tolerance for a reference cross-check.
pub const REFERENCE_TOLERANCE: f64 = 0.20;
/// Confidence multiplier when the reference lookup was attempted and failed.
const DEGRADED_CONFIDENCE_FACTOR: f64 = 0.9;

const COMPLETENESS_WEIGHT: f64 = 0.3;
const QUALITY_WEIGHT: f64 = 0.3;
const CONFIDENCE_WEIGHT: f64 = 0.1;
const GROUND_TRUTH_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldScore {
    pub filled: bool,
    pub confidence: Option<f64>,
    /// Accuracy against ground truth, when an expected value was supplied.
    pub ground_truth: Option<f64>,
}

/// Per-document success/failure counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentTally {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<DocumentFailure>,
}

impl DocumentTally {
    pub fn new(succeeded: usize, failures: Vec<DocumentFailure>) -> Self {
        Self {
            total: succeeded + failures.len(),
            succeeded,
            failed: failures.len(),
            failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossCheck {
    pub field: Field,
    pub extracted: String,
    pub reference: String,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReferenceCheck {
    Compared { passed: usize, checks: Vec<CrossCheck> },
    /// The quote arrived but shared no field with the record.
    NoComparableFields,
    Unavailable { attempts: u32, error: String },
    Skipped,
}

impl ReferenceCheck {
    /// Fraction of cross-checks within tolerance, if any were made.
    pub fn component(&self) -> Option<f64> {
        match self {
            ReferenceCheck::Compared { passed, checks } if !checks.is_empty() => {
                Some(*passed as f64 / checks.len() as f64)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub company: String,
    pub per_field_score: BTreeMap<Field, FieldScore>,
    pub filled_fields: usize,
    pub total_fields: usize,
    pub completeness_score: f64,
    pub confidence_score: f64,
    pub quality_score: f64,
    pub ground_truth_accuracy: Option<f64>,
    pub overall_accuracy: f64,
    /// Percent.
    pub target_accuracy: Option<f64>,
    pub meets_target: Option<bool>,
    pub documents: DocumentTally,
    pub reference_check: ReferenceCheck,
}

/// Builds the report for one run. Pure: reference values are compared, never applied.
pub fn score(
    record: &ConsolidatedRecord,
    reference: &ReferenceOutcome,
    ground_truth: Option<&GroundTruth>,
    documents: DocumentTally,
) -> AccuracyReport {
    let total_fields = Field::tracked().count();
    let filled_fields = record.filled_tracked();
    let completeness_score = if total_fields == 0 {
        0.0
    } else {
        filled_fields as f64 / total_fields as f64
    };

    let winning: Vec<f64> = Field::tracked()
        .filter_map(|f| record.get(f).map(|s| s.confidence))
        .collect();
    let mut confidence_score = mean(&winning).unwrap_or(0.0);
    if matches!(reference, ReferenceOutcome::Failed { .. }) {
        confidence_score *= DEGRADED_CONFIDENCE_FACTOR;
    }

    let plausible = winning.iter().filter(|c| **c >= PLAUSIBLE_CONFIDENCE).count();
    let intrinsic = if total_fields == 0 {
        0.0
    } else {
        plausible as f64 / total_fields as f64
    };
    let reference_check = cross_check(record, reference);
    let quality_score = match reference_check.component() {
        Some(component) => (intrinsic + component) / 2.0,
        None => intrinsic,
    };

    let field_truth = ground_truth.map(|gt| gt.score(record)).unwrap_or_default();
    let ground_truth_accuracy = ground_truth.and_then(|gt| gt.accuracy(record));

    let per_field_score = Field::ALL
        .into_iter()
        .map(|f| {
            let selection = record.get(f);
            (
                f,
                FieldScore {
                    filled: selection.is_some(),
                    confidence: selection.map(|s| s.confidence),
                    ground_truth: field_truth.get(&f).copied(),
                },
            )
        })
        .collect();

    let mut components = vec![
        (completeness_score, COMPLETENESS_WEIGHT),
        (quality_score, QUALITY_WEIGHT),
        (confidence_score, CONFIDENCE_WEIGHT),
    ];
    if let Some(gt) = ground_truth_accuracy {
        components.push((gt, GROUND_TRUTH_WEIGHT));
    }
    let weight_sum: f64 = components.iter().map(|(_, w)| w).sum();
    let overall_accuracy = components.iter().map(|(v, w)| v * w).sum::<f64>() / weight_sum;

    let target_accuracy = ground_truth.and_then(|gt| gt.target_accuracy);
    let meets_target = target_accuracy.map(|target| overall_accuracy * 100.0 >= target);

    tracing::info!(
        "{}: {}/{} fields, completeness {:.2}, confidence {:.2}, quality {:.2}, overall {:.2}",
        record.company,
        filled_fields,
        total_fields,
        completeness_score,
        confidence_score,
        quality_score,
        overall_accuracy
    );

    AccuracyReport {
        company: record.company.clone(),
        per_field_score,
        filled_fields,
        total_fields,
        completeness_score,
        confidence_score,
        quality_score,
        ground_truth_accuracy,
        overall_accuracy,
        target_accuracy,
        meets_target,
        documents,
        reference_check,
    }
}

fn cross_check(record: &ConsolidatedRecord, reference: &ReferenceOutcome) -> ReferenceCheck {
    let quote = match reference {
        ReferenceOutcome::Available(quote) => quote,
        ReferenceOutcome::Failed { attempts, error } => {
            return ReferenceCheck::Unavailable {
                attempts: *attempts,
                error: error.clone(),
            }
        }
        ReferenceOutcome::Skipped => return ReferenceCheck::Skipped,
    };

    let mut checks = Vec::new();
    if let Some(symbol) = record.get(Field::StockSymbol) {
        checks.push(CrossCheck {
            field: Field::StockSymbol,
            extracted: symbol.display.clone(),
            reference: quote.symbol.to_uppercase(),
            within_tolerance: symbol.display.eq_ignore_ascii_case(&quote.symbol),
        });
    }
    for (field, expected) in numeric_references(quote) {
        let (Some(selection), Some(expected)) = (record.get(field), expected) else {
            continue;
        };
        let Some(actual) = selection.value.numeric() else {
            continue;
        };
        let within_tolerance = within(actual, expected, REFERENCE_TOLERANCE);
        if !within_tolerance {
            tracing::warn!(
                "{} {} differs from reference {} by more than {:.0}%",
                field,
                selection.display,
                expected,
                REFERENCE_TOLERANCE * 100.0
            );
        }
        checks.push(CrossCheck {
            field,
            extracted: selection.display.clone(),
            reference: expected.to_string(),
            within_tolerance,
        });
    }

    if checks.is_empty() {
        return ReferenceCheck::NoComparableFields;
    }
    let passed = checks.iter().filter(|c| c.within_tolerance).count();
    ReferenceCheck::Compared { passed, checks }
}

fn numeric_references(quote: &ReferenceQuote) -> [(Field, Option<f64>); 5] {
    [
        (Field::MarketCap, quote.market_cap),
        (Field::Revenue, quote.revenue),
        (Field::NetIncome, quote.net_income),
        (Field::TotalAssets, quote.total_assets),
        (Field::Employees, quote.employees),
    ]
}

fn within(actual: f64, expected: f64, tolerance: f64) -> bool {
    let scale = expected.abs().max(f64::EPSILON);
    (actual - expected).abs() / scale <= tolerance
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// One company's line in a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub company: String,
    pub overall_accuracy: Option<f64>,
    pub completeness_score: Option<f64>,
    pub ground_truth_accuracy: Option<f64>,
    pub meets_target: Option<bool>,
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn from_report(report: &AccuracyReport) -> Self {
        Self {
            company: report.company.clone(),
            overall_accuracy: Some(report.overall_accuracy),
            completeness_score: Some(report.completeness_score),
            ground_truth_accuracy: report.ground_truth_accuracy,
            meets_target: report.meets_target,
            error: None,
        }
    }

    pub fn failed(company: impl Into<String>, error: impl ToString) -> Self {
        Self {
            company: company.into(),
            overall_accuracy: None,
            completeness_score: None,
            ground_truth_accuracy: None,
            meets_target: None,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate over the companies of a batch run. Means skip failed companies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub companies: Vec<BatchEntry>,
    pub succeeded: usize,
    pub failed: usize,
    pub mean_overall_accuracy: Option<f64>,
    pub mean_completeness: Option<f64>,
    pub mean_ground_truth_accuracy: Option<f64>,
    pub targets_met: usize,
    pub targets_missed: usize,
}

impl BatchSummary {
    pub fn new(companies: Vec<BatchEntry>) -> Self {
        let overall: Vec<f64> = companies.iter().filter_map(|c| c.overall_accuracy).collect();
        let completeness: Vec<f64> = companies.iter().filter_map(|c| c.completeness_score).collect();
        let truth: Vec<f64> = companies.iter().filter_map(|c| c.ground_truth_accuracy).collect();
        let failed = companies.iter().filter(|c| c.error.is_some()).count();
        Self {
            succeeded: companies.len() - failed,
            failed,
            mean_overall_accuracy: mean(&overall),
            mean_completeness: mean(&completeness),
            mean_ground_truth_accuracy: mean(&truth),
            targets_met: companies.iter().filter(|c| c.meets_target == Some(true)).count(),
            targets_missed: companies.iter().filter(|c| c.meets_target == Some(false)).count(),
            companies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::candidate::{Candidate, Span};
    use crate::extractors::consolidate::{FieldValue, Selection};
    use crate::extractors::normalize::{FieldNormalizer, FiscalWindow};

    fn record(values: &[(Field, &str, f64)]) -> ConsolidatedRecord {
        let normalizer = FieldNormalizer::new(FiscalWindow::around(2024));
        let mut fields: BTreeMap<Field, FieldValue> =
            Field::ALL.into_iter().map(|f| (f, FieldValue::Absent)).collect();
        for (field, raw, confidence) in values {
            let value = normalizer.normalize(raw, field.kind()).unwrap();
            let winner = Candidate {
                field: *field,
                raw_value: raw.to_string(),
                normalized_value: Some(value.clone()),
                normalization_error: None,
                source_document_id: "doc.txt".into(),
                document_index: 0,
                pattern_name: "test".into(),
                pattern_priority: 80,
                company_scoped: false,
                confidence: *confidence,
                span: Span { page: 0, start: 0, end: 0 },
            };
            fields.insert(
                *field,
                FieldValue::Present(Selection {
                    display: value.display(),
                    value,
                    confidence: *confidence,
                    group_score: 1.0,
                    winner,
                    supporting_documents: vec!["doc.txt".into()],
                    candidate_count: 1,
                }),
            );
        }
        ConsolidatedRecord { company: "BLBD".into(), fields }
    }

    fn sample() -> ConsolidatedRecord {
        record(&[
            (Field::StockSymbol, "BLBD", 0.9),
            (Field::CompanyAddress, "Macon, Georgia", 0.8),
            (Field::Revenue, "$1.13B", 0.9),
            (Field::NetMargin, "2.1%", 0.5),
            (Field::Employees, "1,900", 0.7),
        ])
    }

    fn quote() -> ReferenceQuote {
        ReferenceQuote {
            revenue: Some(1.2e9),
            employees: Some(2_500.0),
            ..ReferenceQuote::new("BLBD")
        }
    }

    #[test]
    fn completeness_counts_tracked_fields_only() {
        let report = score(&sample(), &ReferenceOutcome::Skipped, None, DocumentTally::default());
        // Employees is supplementary
        assert_eq!(report.filled_fields, 4);
        assert_eq!(report.total_fields, 12);
        assert!((report.completeness_score - 4.0 / 12.0).abs() < 1e-12);
        assert!((report.confidence_score - 0.775).abs() < 1e-12);
        assert!(report.per_field_score[&Field::Employees].filled);
        assert!(!report.per_field_score[&Field::Industry].filled);
    }

    #[test]
    fn reference_component_joins_quality() {
        let report = score(
            &sample(),
            &ReferenceOutcome::Available(quote()),
            None,
            DocumentTally::default(),
        );
        match &report.reference_check {
            ReferenceCheck::Compared { passed, checks } => {
                // symbol and revenue agree; employees is off by 24 %
                assert_eq!(checks.len(), 3);
                assert_eq!(*passed, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        let intrinsic = 3.0 / 12.0;
        assert!((report.quality_score - (intrinsic + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn failed_reference_is_excluded_not_zeroed() {
        let failed = ReferenceOutcome::Failed {
            attempts: 3,
            error: "Reference lookup timed out after 5000 ms".into(),
        };
        let degraded = score(&sample(), &failed, None, DocumentTally::default());
        let skipped = score(&sample(), &ReferenceOutcome::Skipped, None, DocumentTally::default());

        assert_eq!(degraded.quality_score, skipped.quality_score);
        assert!((degraded.quality_score - 3.0 / 12.0).abs() < 1e-12);
        assert!((degraded.confidence_score - skipped.confidence_score * 0.9).abs() < 1e-12);
        assert!(matches!(degraded.reference_check, ReferenceCheck::Unavailable { attempts: 3, .. }));
    }

    #[test]
    fn ground_truth_joins_overall_and_target() {
        let truth: GroundTruth = serde_json::from_str(
            r#"{"expected": {"stock_symbol": "BLBD", "company_address": "Macon, Georgia"}, "target_accuracy": 99}"#,
        )
        .unwrap();
        let report = score(&sample(), &ReferenceOutcome::Skipped, Some(&truth), DocumentTally::default());
        assert_eq!(report.ground_truth_accuracy, Some(1.0));
        assert_eq!(report.per_field_score[&Field::StockSymbol].ground_truth, Some(1.0));

        let expected = (0.3 * report.completeness_score
            + 0.3 * report.quality_score
            + 0.1 * report.confidence_score
            + 0.3)
            / 1.0;
        assert!((report.overall_accuracy - expected).abs() < 1e-12);
        assert_eq!(report.meets_target, Some(false));
    }

    #[test]
    fn overall_renormalizes_without_ground_truth() {
        let report = score(&sample(), &ReferenceOutcome::Skipped, None, DocumentTally::default());
        let expected = (0.3 * report.completeness_score + 0.3 * report.quality_score + 0.1 * report.confidence_score) / 0.7;
        assert!((report.overall_accuracy - expected).abs() < 1e-12);
        assert_eq!(report.meets_target, None);
    }

    #[test]
    fn confidently_full_but_wrong_is_penalized() {
        let truth: GroundTruth =
            serde_json::from_str(r#"{"expected": {"stock_symbol": "DV", "company_address": "New York, New York"}}"#)
                .unwrap();
        let report = score(&sample(), &ReferenceOutcome::Skipped, Some(&truth), DocumentTally::default());
        let untested = score(&sample(), &ReferenceOutcome::Skipped, None, DocumentTally::default());
        assert_eq!(report.ground_truth_accuracy, Some(0.0));
        assert!(report.overall_accuracy < untested.overall_accuracy);
    }

    #[test]
    fn tally_counts_failures() {
        let tally = DocumentTally::new(
            2,
            vec![DocumentFailure {
                document_id: "deck.pdf".into(),
                error: "unsupported".into(),
            }],
        );
        assert_eq!((tally.total, tally.succeeded, tally.failed), (3, 2, 1));
    }

    #[test]
    fn batch_summary_skips_failed_companies() {
        let truth: GroundTruth = serde_json::from_str(r#"{"expected": {"stock_symbol": "BLBD"}, "target_accuracy": 10}"#).unwrap();
        let report = score(&sample(), &ReferenceOutcome::Skipped, Some(&truth), DocumentTally::default());
        let summary = BatchSummary::new(vec![
            BatchEntry::from_report(&report),
            BatchEntry::failed("DV", "No documents supplied for company DV"),
        ]);
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert_eq!(summary.mean_overall_accuracy, Some(report.overall_accuracy));
        assert_eq!(summary.mean_ground_truth_accuracy, Some(1.0));
        assert_eq!((summary.targets_met, summary.targets_missed), (1, 0));
    }
}
