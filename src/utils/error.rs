// src/utils/error.rs
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

// Define specific error types for different parts of the pipeline
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Could not read document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document {0} is not valid UTF-8 text")]
    Encoding(PathBuf),

    #[error("Unsupported document format for {0} (needs external text extraction)")]
    UnsupportedFormat(PathBuf),

    #[error("Document {0} contains no text")]
    Empty(String),

    #[error("Extraction task for document {0} did not complete")]
    TaskFailed(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("Pattern '{0}' has no capture group named 'value'")]
    MissingValueGroup(String),

    #[error("Could not read pattern file: {0}")]
    PatternFile(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("empty value")]
    Empty,

    #[error("'{0}' is not a number")]
    NotNumeric(String),

    #[error("percentage {0} is outside [-100, 1000]")]
    PercentageOutOfRange(f64),

    #[error("'{0}' does not match any accepted date shape")]
    UnrecognizedDate(String),

    #[error("year {year} is outside the plausible fiscal range {earliest}..={latest}")]
    YearOutOfRange { year: i32, earliest: i32, latest: i32 },

    #[error("'{0}' is not a 1-5 letter ticker")]
    InvalidTicker(String),
}

/// Why the Validator excluded a candidate from consolidation.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("value did not normalize: {0}")]
    Unnormalized(String),

    #[error("normalized value does not match the field kind")]
    KindMismatch,

    #[error("ticker '{0}' is a stoplisted word")]
    StoplistedTicker(String),

    #[error("text has {found} tokens, at least {required} required")]
    TooShort { found: usize, required: usize },

    #[error("text matches boilerplate marker '{0}'")]
    Boilerplate(String),

    #[error("text looks garbled or unspaced")]
    Garbled,

    #[error("text lacks any of the field's keywords")]
    MissingKeyword,

    #[error("text does not look like a locality")]
    MissingLocality,

    #[error("negative value {0} not allowed for this field")]
    Negative(f64),

    #[error("magnitude {0} is implausible for this field")]
    ImplausibleMagnitude(f64),

    #[error("percentage {0} is outside [-100, 1000]")]
    PercentageOutOfRange(f64),

    #[error("year {0} is outside the plausible fiscal window")]
    OutsideFiscalWindow(i32),
}

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode),

    #[error("Reference lookup timed out after {0} ms")]
    Timeout(u128),

    #[error("No reference data for symbol {0}")]
    NotFound(String),

    #[error("Failed to parse reference response: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("No documents supplied for company {0}")]
    NoDocuments(String),

    #[error("Pattern registry failed to load: {0}")]
    Registry(#[from] RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Run exceeded the {0} s timeout; partial results discarded")]
    Timeout(u64),

    #[error("Data processing failed: {0}")]
    Processing(String),
}
