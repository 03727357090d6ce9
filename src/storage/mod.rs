// src/storage/mod.rs
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::pipeline::RunOutcome;
use crate::scoring::BatchSummary;
use crate::utils::error::StorageError;
use crate::utils::html_debug;

pub const BATCH_SUMMARY_FILE: &str = "batch_summary.json";

pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    /// Creates a new StorageManager with the specified base directory
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }

        Ok(Self { base_dir: base_path })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Record, report and audit files for one completed run.
    pub fn save_outcome(&self, outcome: &RunOutcome) -> Result<Vec<PathBuf>, StorageError> {
        Ok(vec![
            self.save_record(outcome)?,
            self.save_report(outcome)?,
            self.save_audit(outcome)?,
        ])
    }

    /// `<COMPANY>_record.json`: flat field -> value map, absent fields as `N/A`.
    pub fn save_record(&self, outcome: &RunOutcome) -> Result<PathBuf, StorageError> {
        let path = self.company_file(&outcome.company, "record");
        write_json(&path, &outcome.record.flat())?;
        tracing::info!("Saved record to {}", path.display());
        Ok(path)
    }

    /// `<COMPANY>_accuracy.json`: the accuracy report plus a generation timestamp.
    pub fn save_report(&self, outcome: &RunOutcome) -> Result<PathBuf, StorageError> {
        let path = self.company_file(&outcome.company, "accuracy");
        let report = serde_json::json!({
            "report": outcome.report,
            "generated_at": chrono::Utc::now().to_rfc3339(),
        });
        write_json(&path, &report)?;
        tracing::info!("Saved accuracy report to {}", path.display());
        Ok(path)
    }

    /// `<COMPANY>_audit.json`: winning provenance per field and every rejection.
    pub fn save_audit(&self, outcome: &RunOutcome) -> Result<PathBuf, StorageError> {
        let path = self.company_file(&outcome.company, "audit");
        let audit = serde_json::json!({
            "company": outcome.company,
            "identity": outcome.identity,
            "documents": outcome.documents.iter().map(|d| &d.id).collect::<Vec<_>>(),
            "candidate_count": outcome.candidates.len(),
            "rejected_count": outcome.rejections.len(),
            "fields": outcome.record.fields,
            "rejections": outcome.rejections,
            "reference": outcome.reference,
        });
        write_json(&path, &audit)?;
        tracing::info!("Saved audit log to {}", path.display());
        Ok(path)
    }

    /// One annotated HTML file per document under `<COMPANY>_debug/`.
    pub fn save_debug(&self, outcome: &RunOutcome) -> Result<Vec<PathBuf>, StorageError> {
        let debug_dir = self.base_dir.join(format!("{}_debug", company_label(&outcome.company)));
        fs::create_dir_all(&debug_dir).map_err(StorageError::IoError)?;

        let mut written = Vec::with_capacity(outcome.documents.len());
        for document in &outcome.documents {
            let highlights =
                html_debug::document_highlights(document, &outcome.candidates, &outcome.rejections, &outcome.record);
            let path = debug_dir.join(format!("{}_annotated.html", sanitize(&document.id)));
            html_debug::save_debug_html(document, &highlights, &path)?;
            written.push(path);
        }
        Ok(written)
    }

    pub fn save_batch_summary(&self, summary: &BatchSummary) -> Result<PathBuf, StorageError> {
        let path = self.base_dir.join(BATCH_SUMMARY_FILE);
        let body = serde_json::json!({
            "summary": summary,
            "generated_at": chrono::Utc::now().to_rfc3339(),
        });
        write_json(&path, &body)?;
        tracing::info!("Saved batch summary to {}", path.display());
        Ok(path)
    }

    fn company_file(&self, company: &str, kind: &str) -> PathBuf {
        self.base_dir.join(format!("{}_{}.json", company_label(company), kind))
    }
}

/// Upper-cased, filesystem-safe company identifier, e.g. `bluebird_files` -> `BLUEBIRD_FILES`.
pub fn company_label(company: &str) -> String {
    sanitize(company).to_uppercase()
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "UNNAMED".to_string()
    } else {
        cleaned
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let body = serde_json::to_string_pretty(value).map_err(|e| StorageError::SerializationError(e.to_string()))?;
    fs::write(path, body).map_err(StorageError::IoError)
}
