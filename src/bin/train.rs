//! Offline trainer for the isolation-forest model.
//!
//! Pulls SAFE-mode simulation events from the event store, engineers
//! rolling-window features, fits the forest, calibrates the anomaly
//! threshold, and persists the bundle atomically. The running service picks
//! the new bundle up via its `/retrain` reload or on next start.

use anyhow::{bail, Result};
use clap::Parser;
use log::info;
use std::path::Path;
use tourist_sentinel::anomaly::{train_and_save, TrainingOptions};
use tourist_sentinel::features::{
    build_training_matrix, DEFAULT_STRIDE_SECONDS, DEFAULT_WINDOW_SECONDS,
};
use tourist_sentinel::store::{EventStore, SupabaseStore};
use tourist_sentinel::Config;

/// Row cap on the training fetch
const TRAINING_EVENT_CAP: usize = 50_000;

/// Train the isolation forest anomaly detection model
#[derive(Parser, Debug)]
#[command(name = "train")]
struct Args {
    /// Number of days of historical data to use
    #[arg(long, default_value_t = 7)]
    days: i64,

    /// Number of isolation trees
    #[arg(long, default_value_t = 200)]
    estimators: usize,

    /// Expected anomaly fraction in the training data
    #[arg(long, default_value_t = 0.02)]
    contamination: f64,

    /// Model version string
    #[arg(long, default_value = "v1")]
    version: String,

    /// Output path for the model bundle (defaults to MODEL_PATH)
    #[arg(long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let (Some(url), Some(key)) = (&config.supabase_url, &config.supabase_service_key) else {
        bail!("SUPABASE_URL and SUPABASE_SERVICE_KEY must be set to fetch training data");
    };
    let store = SupabaseStore::new(url.clone(), key.clone());

    info!("Fetching SAFE-mode data (last {} days)", args.days);
    let events = store
        .read_safe_training_events(args.days, TRAINING_EVENT_CAP)
        .await?;
    if events.is_empty() {
        bail!(
            "No SAFE-mode training data found in the last {} days. \
             Run the simulation in SAFE mode to generate events first.",
            args.days
        );
    }
    info!("Fetched {} raw events for training", events.len());

    let samples = build_training_matrix(&events, DEFAULT_WINDOW_SECONDS, DEFAULT_STRIDE_SECONDS);
    info!("Generated {} feature windows", samples.len());

    let output = args.output.unwrap_or(config.model_path);
    let options = TrainingOptions {
        n_estimators: args.estimators,
        contamination: args.contamination,
        version: args.version,
    };
    let report = train_and_save(&samples, Path::new(&output), &options)?;

    info!("Training complete");
    info!("  Model version : {}", report.model_version);
    info!("  Samples       : {}", report.training_samples);
    info!("  Threshold     : {:.4}", report.threshold);
    info!("  Saved to      : {}", report.output_path.display());
    Ok(())
}
