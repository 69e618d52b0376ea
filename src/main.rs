use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tourist_sentinel::anomaly::AnomalyScorer;
use tourist_sentinel::driver::{AnalysisDriver, AppContext};
use tourist_sentinel::server;
use tourist_sentinel::store::{EventStore, SupabaseStore};
use tourist_sentinel::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    env_logger::Builder::from_default_env()
        .filter_level(
            config
                .log_level
                .parse()
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    info!("Tourist Safety Anomaly Detection Service");
    info!("========================================");

    // Load the ML model (graceful degradation if not found)
    let scorer = Arc::new(AnomalyScorer::open(config.model_path.clone()));

    let store: Option<Arc<dyn EventStore>> =
        match (&config.supabase_url, &config.supabase_service_key) {
            (Some(url), Some(key)) => Some(Arc::new(SupabaseStore::new(url.clone(), key.clone()))),
            _ => {
                warn!("Supabase credentials not configured - starting without an event store");
                None
            }
        };

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        store,
        scorer,
    });
    let driver = Arc::new(AnalysisDriver::new(ctx.clone()));

    // Scheduled analysis loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.run_scheduler(shutdown_rx).await })
    };

    info!(
        "Service started (interval={}s, model_loaded={})",
        config.analysis_interval_seconds,
        ctx.scorer.is_loaded()
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("HTTP surface listening on {}:{}", config.host, config.port);

    axum::serve(listener, server::router(driver.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Stop the scheduler and wait for any in-flight cycle to complete
    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    info!("Service shut down");
    Ok(())
}
