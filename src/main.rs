// src/main.rs
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fact_extractor::config::{
    DEFAULT_REFERENCE_RETRIES, DEFAULT_REFERENCE_TIMEOUT_MS, DEFAULT_RUN_TIMEOUT_SECS,
};
use fact_extractor::pipeline::{self, Pipeline};
use fact_extractor::reference::RetryPolicy;
use fact_extractor::scoring::GroundTruth;
use fact_extractor::storage::StorageManager;
use fact_extractor::utils::{self, AppError};
use fact_extractor::PipelineConfig;

/// Extract and reconcile financial facts from a company's documents
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Company identifier, e.g. BLBD or bluebird_files
    #[arg(short, long, env = "FACT_COMPANY", required_unless_present = "batch")]
    company: Option<String>,

    /// Directory of plain-text / HTML documents for the company
    #[arg(short, long, env = "FACT_INPUT_DIR", required_unless_present = "batch")]
    input_dir: Option<PathBuf>,

    /// Batch mode: every subdirectory is one company
    #[arg(long, env = "FACT_BATCH_DIR", conflicts_with_all = ["company", "input_dir"])]
    batch: Option<PathBuf>,

    /// Output directory for record, report and audit files
    #[arg(short, long, env = "FACT_OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    /// Ground truth JSON used for scoring (single-company mode)
    #[arg(short, long, env = "FACT_GROUND_TRUTH")]
    ground_truth: Option<PathBuf>,

    /// Extra extraction patterns (JSON array)
    #[arg(short, long, env = "FACT_PATTERNS")]
    patterns: Option<PathBuf>,

    /// Base URL of the reference quote endpoint
    #[arg(long, env = "FACT_REFERENCE_URL")]
    reference_url: Option<String>,

    /// Static reference quotes (JSON map of symbol -> quote)
    #[arg(long, env = "FACT_REFERENCE_FILE")]
    reference_file: Option<PathBuf>,

    /// Per-attempt reference lookup timeout
    #[arg(long, env = "FACT_REFERENCE_TIMEOUT_MS", default_value_t = DEFAULT_REFERENCE_TIMEOUT_MS)]
    reference_timeout_ms: u64,

    /// Reference lookup retries after the first attempt
    #[arg(long, env = "FACT_REFERENCE_RETRIES", default_value_t = DEFAULT_REFERENCE_RETRIES)]
    reference_retries: u32,

    /// Overall limit for one company's run
    #[arg(long, env = "FACT_RUN_TIMEOUT_SECS", default_value_t = DEFAULT_RUN_TIMEOUT_SECS)]
    run_timeout_secs: u64,

    /// Debug mode - save annotated HTML per document
    #[arg(short, long)]
    debug: bool,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            reference_retry: RetryPolicy {
                timeout: Duration::from_millis(self.reference_timeout_ms),
                retries: self.reference_retries,
                ..RetryPolicy::default()
            },
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            patterns: self.patterns.clone(),
            reference_url: self.reference_url.clone(),
            reference_file: self.reference_file.clone(),
            debug: self.debug,
            ..PipelineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Parse CLI Arguments
    let args = Args::parse();

    // 2. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging(args.verbose);
    tracing::info!("Starting processing for args: {:?}", args);

    // 3. Initialize storage and pipeline
    let storage = StorageManager::new(&args.output_dir)?;
    let pipeline = Pipeline::from_config(args.pipeline_config())?;

    // 4. Batch mode
    if let Some(batch_dir) = &args.batch {
        let companies = pipeline::discover_batch(batch_dir)?;
        if companies.is_empty() {
            return Err(AppError::Config(format!("No company directories under {}", batch_dir.display())));
        }

        let results = pipeline.run_batch(&companies).await;
        for (company, result) in &results {
            if let Ok(outcome) = result {
                persist(&storage, &pipeline, outcome);
            } else {
                tracing::warn!("Nothing persisted for {}", company);
            }
        }

        let summary = pipeline::summarize(&results);
        storage.save_batch_summary(&summary)?;
        tracing::info!(
            "Batch finished. Success: {}, Failures: {}, mean overall accuracy: {}",
            summary.succeeded,
            summary.failed,
            summary
                .mean_overall_accuracy
                .map(|a| format!("{:.1}%", a * 100.0))
                .unwrap_or_else(|| "N/A".to_string())
        );
        if summary.succeeded == 0 {
            return Err(AppError::Processing(format!("All {} batch runs failed", summary.failed)));
        }
        return Ok(());
    }

    // 5. Single company
    let (Some(company), Some(input_dir)) = (&args.company, &args.input_dir) else {
        return Err(AppError::Config("--company and --input-dir are required without --batch".to_string()));
    };
    let ground_truth = args.ground_truth.as_deref().map(GroundTruth::from_file).transpose()?;

    let outcome = pipeline.run_directory(company, input_dir, ground_truth.as_ref()).await?;
    storage.save_outcome(&outcome)?;
    if pipeline.config().debug {
        storage.save_debug(&outcome)?;
    }

    let report = &outcome.report;
    tracing::info!(
        "Processing finished. {}/{} fields, overall accuracy {:.1}%{}",
        report.filled_fields,
        report.total_fields,
        report.overall_accuracy * 100.0,
        match report.meets_target {
            Some(true) => " (target met)",
            Some(false) => " (target missed)",
            None => "",
        }
    );
    Ok(())
}

/// Batch runs keep going when one company's output cannot be written.
fn persist(storage: &StorageManager, pipeline: &Pipeline, outcome: &fact_extractor::RunOutcome) {
    match storage.save_outcome(outcome) {
        Ok(paths) => tracing::info!("Saved {} files for {}", paths.len(), outcome.company),
        Err(e) => tracing::error!("Failed to save results for {}: {}", outcome.company, e),
    }
    if pipeline.config().debug {
        if let Err(e) = storage.save_debug(outcome) {
            tracing::error!("Failed to save debug HTML for {}: {}", outcome.company, e);
        }
    }
}
