use anyhow::{ensure, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reason_seg_rs::{Config, ImageProcessor};

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    ensure!(config.model_path.exists(), "Model path does not exist");
    ensure!(config.input_dir.is_dir(), "Input directory does not exist");
    ensure!(config.input_ids.exists(), "Prompt token file does not exist");
    config.validate()?;

    let processor = ImageProcessor::with_onnx_model(config)
        .context("Failed to initialize the segmentation pipeline")?;
    let summary = processor
        .process_directory()
        .context("Failed to process input directory")?;

    info!(
        "Finished: {} written, {} skipped",
        summary.processed.len(),
        summary.failed.len()
    );
    Ok(())
}
