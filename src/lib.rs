// src/lib.rs
//! Extracts a fixed set of financial facts from a company's documents,
//! reconciles conflicting readings across documents and scores the result.

pub mod config;
pub mod documents;
pub mod extractors;
pub mod pipeline;
pub mod reference;
pub mod scoring;
pub mod storage;
pub mod utils;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, RunOutcome};
pub use utils::AppError;
