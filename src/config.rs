// src/config.rs
use std::path::PathBuf;
use std::time::Duration;

use crate::extractors::normalize::FiscalWindow;
use crate::reference::{HttpReferenceAdapter, ReferenceSource, RetryPolicy, StaticReferenceAdapter};
use crate::utils::error::AppError;

pub const DEFAULT_REFERENCE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REFERENCE_RETRIES: u32 = 2;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

/// Settings for one pipeline run (or every run of a batch).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fiscal_window: FiscalWindow,
    pub reference_retry: RetryPolicy,
    /// Whole-run limit; a run that exceeds it is discarded.
    pub run_timeout: Duration,
    /// Extra pattern file loaded on top of the built-in set.
    pub patterns: Option<PathBuf>,
    pub reference_url: Option<String>,
    pub reference_file: Option<PathBuf>,
    /// Write annotated HTML per document.
    pub debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fiscal_window: FiscalWindow::current(),
            reference_retry: RetryPolicy {
                timeout: Duration::from_millis(DEFAULT_REFERENCE_TIMEOUT_MS),
                retries: DEFAULT_REFERENCE_RETRIES,
                ..RetryPolicy::default()
            },
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            patterns: None,
            reference_url: None,
            reference_file: None,
            debug: false,
        }
    }
}

impl PipelineConfig {
    /// Reference adapter implied by the settings. A URL takes precedence over a file.
    pub fn reference_source(&self) -> Result<ReferenceSource, AppError> {
        if let Some(url) = &self.reference_url {
            let adapter = HttpReferenceAdapter::new(url, self.reference_retry.timeout)
                .map_err(|e| AppError::Config(format!("Cannot build reference client: {}", e)))?;
            return Ok(ReferenceSource::Http(adapter));
        }
        if let Some(path) = &self.reference_file {
            return Ok(ReferenceSource::Static(StaticReferenceAdapter::from_file(path)?));
        }
        Ok(ReferenceSource::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.reference_retry.timeout, Duration::from_secs(5));
        assert_eq!(config.reference_retry.retries, 2);
        assert_eq!(config.run_timeout, Duration::from_secs(300));
        assert!(!config.reference_source().unwrap().is_enabled());
    }

    #[test]
    fn url_wins_over_file() {
        let config = PipelineConfig {
            reference_url: Some("http://localhost:8080".into()),
            reference_file: Some(PathBuf::from("/nonexistent/quotes.json")),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.reference_source().unwrap(), ReferenceSource::Http(_)));
    }

    #[test]
    fn missing_reference_file_is_an_error() {
        let config = PipelineConfig {
            reference_file: Some(PathBuf::from("/nonexistent/quotes.json")),
            ..PipelineConfig::default()
        };
        assert!(config.reference_source().is_err());
    }
}
