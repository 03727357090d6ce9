// src/pipeline/mod.rs
//! One run per company: documents in, record and report out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::documents::{self, Document, DocumentFailure, LoadedDocuments};
use crate::extractors::candidate::{Candidate, CandidateExtractor};
use crate::extractors::consolidate::{ConsolidatedRecord, Consolidator};
use crate::extractors::fields::Field;
use crate::extractors::normalize::FieldNormalizer;
use crate::extractors::registry::{CompanyIdentity, PatternRegistry};
use crate::extractors::validate::{RejectionRecord, Validated, Validator};
use crate::reference::{lookup_with_retry, ReferenceOutcome, ReferenceSource};
use crate::scoring::{self, AccuracyReport, BatchEntry, BatchSummary, DocumentTally, GroundTruth};
use crate::utils::error::{AppError, DocumentError};

/// Ground truth file looked for inside each batch company directory.
pub const GROUND_TRUTH_FILE: &str = "ground_truth.json";

/// Everything a completed run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub company: String,
    pub identity: CompanyIdentity,
    pub record: ConsolidatedRecord,
    pub report: AccuracyReport,
    /// All candidates in document order, accepted or not.
    pub candidates: Vec<Candidate>,
    pub rejections: Vec<RejectionRecord>,
    pub reference: ReferenceOutcome,
    pub documents: Vec<Document>,
}

/// One company of a batch run.
#[derive(Debug, Clone)]
pub struct BatchCompany {
    pub company: String,
    pub input_dir: PathBuf,
    pub ground_truth: Option<GroundTruth>,
}

pub struct Pipeline {
    registry: Arc<PatternRegistry>,
    reference: ReferenceSource,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(registry: PatternRegistry, reference: ReferenceSource, config: PipelineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            reference,
            config,
        }
    }

    /// Built-in patterns plus the configured pattern file and reference source.
    pub fn from_config(config: PipelineConfig) -> Result<Self, AppError> {
        let mut registry = PatternRegistry::builtin()?;
        if let Some(path) = &config.patterns {
            registry.extend_from_json(path)?;
        }
        let reference = config.reference_source()?;
        tracing::info!(
            "Pipeline ready: {} patterns, reference lookups {}",
            registry.len(),
            if reference.is_enabled() { "enabled" } else { "disabled" }
        );
        Ok(Self::new(registry, reference, config))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Loads `dir` and runs the pipeline under the overall run timeout.
    ///
    /// A timed-out run returns [`AppError::Timeout`] and nothing else.
    pub async fn run_directory(
        &self,
        company: &str,
        dir: &Path,
        ground_truth: Option<&GroundTruth>,
    ) -> Result<RunOutcome, AppError> {
        let run = async {
            let loaded = documents::load_directory(dir, Some(company))?;
            self.run(company, loaded, ground_truth).await
        };
        match tokio::time::timeout(self.config.run_timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Run for {} exceeded {:?}; discarding partial results",
                    company,
                    self.config.run_timeout
                );
                Err(AppError::Timeout(self.config.run_timeout.as_secs()))
            }
        }
    }

    /// Runs the pipeline over already-loaded documents.
    pub async fn run(
        &self,
        company: &str,
        loaded: LoadedDocuments,
        ground_truth: Option<&GroundTruth>,
    ) -> Result<RunOutcome, AppError> {
        let LoadedDocuments { documents, mut failures } = loaded;
        if documents.is_empty() && failures.is_empty() {
            return Err(AppError::NoDocuments(company.to_string()));
        }

        let identity = CompanyIdentity::resolve(
            company,
            documents.iter().flat_map(|d| d.pages.iter().map(String::as_str)),
        );
        tracing::info!(
            "Processing {} ({:?}): {} documents, {} unreadable",
            company,
            identity,
            documents.len(),
            failures.len()
        );

        let documents: Vec<Arc<Document>> = documents.into_iter().map(Arc::new).collect();
        let (candidates, extraction_failures, succeeded) = self.extract_all(&documents, identity).await;
        failures.extend(extraction_failures);

        let validator = Validator::new(&self.registry, self.config.fiscal_window);
        let (record, rejections) = {
            let Validated { accepted, rejected } = validator.partition(&candidates);
            tracing::info!(
                "{}: {} candidates, {} accepted, {} rejected",
                company,
                candidates.len(),
                accepted.len(),
                rejected.len()
            );
            (Consolidator::new().consolidate(company, &accepted), rejected)
        };

        let reference = self.check_reference(&record).await;
        let tally = DocumentTally::new(succeeded, failures);
        let report = scoring::score(&record, &reference, ground_truth, tally);

        let documents = documents
            .into_iter()
            .map(|d| Arc::try_unwrap(d).unwrap_or_else(|shared| (*shared).clone()))
            .collect();

        Ok(RunOutcome {
            company: company.to_string(),
            identity,
            record,
            report,
            candidates,
            rejections,
            reference,
            documents,
        })
    }

    /// Extracts every document on the blocking pool and joins in input order.
    async fn extract_all(
        &self,
        documents: &[Arc<Document>],
        identity: CompanyIdentity,
    ) -> (Vec<Candidate>, Vec<DocumentFailure>, usize) {
        let normalizer = FieldNormalizer::new(self.config.fiscal_window);

        let mut handles = Vec::with_capacity(documents.len());
        for (index, document) in documents.iter().enumerate() {
            if document.is_empty() {
                handles.push((index, None));
                continue;
            }
            let registry = Arc::clone(&self.registry);
            let document = Arc::clone(document);
            let handle = tokio::task::spawn_blocking(move || {
                CandidateExtractor::new(&registry, normalizer, identity).extract(&document, index)
            });
            handles.push((index, Some(handle)));
        }

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        let mut succeeded = 0;
        for (index, handle) in handles {
            let id = &documents[index].id;
            let error = match handle {
                None => DocumentError::Empty(id.clone()),
                Some(handle) => match handle.await {
                    Ok(found) => {
                        succeeded += 1;
                        candidates.extend(found);
                        continue;
                    }
                    Err(e) => {
                        tracing::error!("Extraction task for {} failed: {}", id, e);
                        DocumentError::TaskFailed(id.clone())
                    }
                },
            };
            tracing::warn!("{}", error);
            failures.push(DocumentFailure::new(id.clone(), &error));
        }
        (candidates, failures, succeeded)
    }

    async fn check_reference(&self, record: &ConsolidatedRecord) -> ReferenceOutcome {
        if !self.reference.is_enabled() {
            return ReferenceOutcome::Skipped;
        }
        let Some(symbol) = record.get(Field::StockSymbol) else {
            tracing::warn!("{}: no stock symbol, skipping reference check", record.company);
            return ReferenceOutcome::Skipped;
        };
        lookup_with_retry(&self.reference, &symbol.display, &self.config.reference_retry).await
    }

    /// Runs every company in turn. One company's failure never stops the batch.
    pub async fn run_batch(&self, companies: &[BatchCompany]) -> Vec<(String, Result<RunOutcome, AppError>)> {
        let mut results = Vec::with_capacity(companies.len());
        for entry in companies {
            let result = self
                .run_directory(&entry.company, &entry.input_dir, entry.ground_truth.as_ref())
                .await;
            if let Err(e) = &result {
                tracing::error!("Batch run for {} failed: {}", entry.company, e);
            }
            results.push((entry.company.clone(), result));
        }
        results
    }
}

/// Each subdirectory of `dir` is one company, named by the directory.
pub fn discover_batch(dir: &Path) -> Result<Vec<BatchCompany>, AppError> {
    if !dir.is_dir() {
        return Err(AppError::Config(format!("Batch directory {} does not exist", dir.display())));
    }

    let mut companies = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        let company = entry.file_name().to_string_lossy().to_string();
        if company.starts_with('.') {
            continue;
        }
        let truth_path = entry.path().join(GROUND_TRUTH_FILE);
        let ground_truth = if truth_path.is_file() {
            Some(GroundTruth::from_file(&truth_path)?)
        } else {
            None
        };
        companies.push(BatchCompany {
            company,
            input_dir: entry.path().to_path_buf(),
            ground_truth,
        });
    }
    tracing::info!("Found {} companies under {}", companies.len(), dir.display());
    Ok(companies)
}

pub fn summarize(results: &[(String, Result<RunOutcome, AppError>)]) -> BatchSummary {
    BatchSummary::new(
        results
            .iter()
            .map(|(company, result)| match result {
                Ok(outcome) => BatchEntry::from_report(&outcome.report),
                Err(e) => BatchEntry::failed(company.clone(), e),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::normalize::FiscalWindow;
    use std::time::Duration;

    fn pipeline() -> Pipeline {
        let config = PipelineConfig {
            fiscal_window: FiscalWindow::around(2024),
            ..PipelineConfig::default()
        };
        Pipeline::new(PatternRegistry::builtin().unwrap(), ReferenceSource::Disabled, config)
    }

    fn loaded(docs: Vec<Document>) -> LoadedDocuments {
        LoadedDocuments {
            documents: docs,
            failures: Vec::new(),
        }
    }

    #[tokio::test]
    async fn no_input_is_fatal() {
        let result = pipeline().run("BLBD", LoadedDocuments::default(), None).await;
        assert!(matches!(result, Err(AppError::NoDocuments(_))));
    }

    #[tokio::test]
    async fn only_failures_still_produce_a_record() {
        let input = LoadedDocuments {
            documents: Vec::new(),
            failures: vec![DocumentFailure {
                document_id: "deck.pdf".into(),
                error: "unsupported".into(),
            }],
        };
        let outcome = pipeline().run("BLBD", input, None).await.unwrap();
        assert_eq!(outcome.record.filled_tracked(), 0);
        assert_eq!(outcome.record.display(Field::StockSymbol), "N/A");
        assert_eq!(outcome.report.documents.failed, 1);
        assert_eq!(outcome.report.completeness_score, 0.0);
        assert_eq!(outcome.reference, ReferenceOutcome::Skipped);
    }

    #[tokio::test]
    async fn empty_document_counts_as_failure() {
        let docs = vec![
            Document::from_text("blank.txt", "   \n\x0C  "),
            Document::from_text("release.txt", "Blue Bird Corporation (NASDAQ: BLBD) reported results."),
        ];
        let outcome = pipeline().run("BLBD", loaded(docs), None).await.unwrap();
        assert_eq!(outcome.report.documents.succeeded, 1);
        assert_eq!(outcome.report.documents.failed, 1);
        assert_eq!(outcome.report.documents.failures[0].document_id, "blank.txt");
        assert_eq!(outcome.record.display(Field::StockSymbol), "BLBD");
    }

    #[tokio::test]
    async fn candidates_keep_document_order() {
        let docs = vec![
            Document::from_text("a.txt", "Blue Bird Corporation (NASDAQ: BLBD)"),
            Document::from_text("b.txt", "Ticker symbol: BLBD"),
        ];
        let outcome = pipeline().run("BLBD", loaded(docs), None).await.unwrap();
        let indices: Vec<usize> = outcome.candidates.iter().map(|c| c.document_index).collect();
        let mut sorted = indices.clone();
        sorted.sort();
        assert_eq!(indices, sorted);
        assert_eq!(outcome.documents.len(), 2);
        let symbol = outcome.record.get(Field::StockSymbol).unwrap();
        assert_eq!(symbol.supporting_documents, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn run_timeout_discards_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let body = "Blue Bird Corporation (NASDAQ: BLBD) net sales of $1.13 billion. ".repeat(2_000);
        std::fs::write(dir.path().join("release.txt"), body).unwrap();

        let mut p = pipeline();
        p.config.run_timeout = Duration::ZERO;
        let result = p.run_directory("BLBD", dir.path(), None).await;
        assert!(matches!(result, Err(AppError::Timeout(0))));
    }

    #[tokio::test]
    async fn unknown_directory_is_a_config_error() {
        let result = pipeline()
            .run_directory("BLBD", Path::new("/nonexistent/blbd"), None)
            .await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn batch_discovery_reads_company_dirs_and_ground_truth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bluebird_files")).unwrap();
        std::fs::create_dir(dir.path().join("doubleverify_files")).unwrap();
        std::fs::write(
            dir.path().join("bluebird_files").join(GROUND_TRUTH_FILE),
            r#"{"expected": {"stock_symbol": "BLBD"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a company").unwrap();

        let companies = discover_batch(dir.path()).unwrap();
        let names: Vec<&str> = companies.iter().map(|c| c.company.as_str()).collect();
        assert_eq!(names, vec!["bluebird_files", "doubleverify_files"]);
        assert!(companies[0].ground_truth.is_some());
        assert!(companies[1].ground_truth.is_none());
    }

    #[tokio::test]
    async fn batch_keeps_going_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("bluebird_files");
        std::fs::create_dir(&good).unwrap();
        std::fs::write(good.join("release.txt"), "Blue Bird Corporation (NASDAQ: BLBD)").unwrap();
        let empty = dir.path().join("empty_co");
        std::fs::create_dir(&empty).unwrap();

        let companies = discover_batch(dir.path()).unwrap();
        let results = pipeline().run_batch(&companies).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(AppError::NoDocuments(_))));

        let summary = summarize(&results);
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
    }
}
