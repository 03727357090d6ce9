// src/reference/mod.rs
//! Authoritative reference figures, used only to cross-check a record.

pub mod client;
pub mod models;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

pub use client::HttpReferenceAdapter;
pub use models::ReferenceQuote;

use crate::utils::error::{AppError, ReferenceError};

pub trait ReferenceDataAdapter {
    fn lookup(&self, symbol: &str) -> impl Future<Output = Result<ReferenceQuote, ReferenceError>> + Send;
}

/// Quotes read from a JSON file: `{"BLBD": {"symbol": "BLBD", ...}}`.
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceAdapter {
    quotes: HashMap<String, ReferenceQuote>,
}

impl StaticReferenceAdapter {
    pub fn new(quotes: impl IntoIterator<Item = ReferenceQuote>) -> Self {
        Self {
            quotes: quotes
                .into_iter()
                .map(|q| (q.symbol.to_uppercase(), q))
                .collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        let quotes: HashMap<String, ReferenceQuote> = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid reference file {}: {}", path.display(), e)))?;
        Ok(Self {
            quotes: quotes
                .into_iter()
                .map(|(k, v)| (k.to_uppercase(), v))
                .collect(),
        })
    }
}

impl ReferenceDataAdapter for StaticReferenceAdapter {
    async fn lookup(&self, symbol: &str) -> Result<ReferenceQuote, ReferenceError> {
        self.quotes
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| ReferenceError::NotFound(symbol.to_uppercase()))
    }
}

/// The adapter a run is configured with.
#[derive(Debug, Clone, Default)]
pub enum ReferenceSource {
    Http(HttpReferenceAdapter),
    Static(StaticReferenceAdapter),
    #[default]
    Disabled,
}

impl ReferenceSource {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ReferenceSource::Disabled)
    }
}

impl ReferenceDataAdapter for ReferenceSource {
    async fn lookup(&self, symbol: &str) -> Result<ReferenceQuote, ReferenceError> {
        match self {
            ReferenceSource::Http(adapter) => adapter.lookup(symbol).await,
            ReferenceSource::Static(adapter) => adapter.lookup(symbol).await,
            ReferenceSource::Disabled => Err(ReferenceError::NotFound(symbol.to_uppercase())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Attempts after the first.
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Result of the single reference lookup of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReferenceOutcome {
    Available(ReferenceQuote),
    Failed { attempts: u32, error: String },
    Skipped,
}

/// Looks `symbol` up with a timeout per attempt and a bounded retry count.
///
/// Never fails: exhaustion is reported as [`ReferenceOutcome::Failed`].
pub async fn lookup_with_retry<A: ReferenceDataAdapter>(
    adapter: &A,
    symbol: &str,
    policy: &RetryPolicy,
) -> ReferenceOutcome {
    let max_attempts = policy.retries + 1;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match tokio::time::timeout(policy.timeout, adapter.lookup(symbol)).await {
            Ok(Ok(quote)) => {
                tracing::info!("Reference quote for {} received on attempt {}", symbol, attempt);
                return ReferenceOutcome::Available(quote);
            }
            Ok(Err(ReferenceError::NotFound(s))) => {
                // Retrying will not make the symbol appear
                tracing::warn!("No reference data for {}", s);
                return ReferenceOutcome::Failed {
                    attempts: attempt,
                    error: ReferenceError::NotFound(s).to_string(),
                };
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = ReferenceError::Timeout(policy.timeout.as_millis()).to_string(),
        }

        tracing::warn!(
            "Reference lookup for {} failed (attempt {}/{}): {}",
            symbol,
            attempt,
            max_attempts,
            last_error
        );
        if attempt < max_attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    ReferenceOutcome::Failed {
        attempts: max_attempts,
        error: last_error,
    }
}
