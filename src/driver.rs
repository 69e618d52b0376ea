//! Periodic analysis driver: fans the detection pipeline out across all
//! active tourists on a fixed cadence and persists the resulting alerts.
//!
//! Contracts enforced here:
//! - a cycle never propagates an error; per-tourist failures are contained
//! - two cycles never overlap; a tick arriving mid-cycle is dropped
//! - per-tourist analyses within one cycle run concurrently on a bounded
//!   pool; there is no cross-tourist shared mutable state
//! - graceful shutdown stops the ticker and waits for the in-flight cycle

use crate::anomaly::{train_and_save, AnomalyScorer, TrainingOptions, TrainingReport};
use crate::config::Config;
use crate::errors::{Result, SentinelError};
use crate::features::{
    build_training_matrix, enrich, WindowSnapshot, DEFAULT_STRIDE_SECONDS, DEFAULT_WINDOW_SECONDS,
};
use crate::fusion::{compute_hybrid_score, Concordance, FusionResult};
use crate::rules::{evaluate_rules, RuleEngineOutput};
use crate::store::EventStore;
use crate::types::{round_to, AggregatedWindow, IncidentAlert, Severity, TouristEvent};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;

/// Days of history pulled for retraining
const TRAINING_LOOKBACK_DAYS: i64 = 7;

/// Row cap on the retraining fetch
const TRAINING_EVENT_CAP: usize = 50_000;

/// Everything the pipeline needs, owned explicitly and passed around
/// instead of living in process-wide globals. Lifetime is tied to service
/// startup and shutdown.
pub struct AppContext {
    /// Service configuration
    pub config: Config,
    /// Event database, absent when credentials are not configured
    pub store: Option<Arc<dyn EventStore>>,
    /// Shared anomaly scorer
    pub scorer: Arc<AnomalyScorer>,
}

/// Result of running the full pipeline for one tourist window
pub struct TouristAnalysis {
    /// Enriched window snapshot
    pub snapshot: WindowSnapshot,
    /// Rule engine output
    pub rules: RuleEngineOutput,
    /// Fused assessment
    pub fusion: FusionResult,
}

/// Wire-friendly report for the on-demand analysis endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Tourist analysed
    pub tourist_id: String,
    /// Feature values, rounded to 6 decimals
    pub features: BTreeMap<String, f64>,
    /// Composite rule score, rounded to 4 decimals
    pub rule_score: f64,
    /// Normalized anomaly score, rounded to 4 decimals
    pub anomaly_score: f64,
    /// Fused score, rounded to 4 decimals
    pub hybrid_score: f64,
    /// Severity of the fused score
    pub severity: Severity,
    /// Rules that fired, in definition order
    pub triggered_rules: Vec<String>,
    /// Agreement pattern between the two systems
    pub concordance: Concordance,
    /// Whether the configured threshold was met
    pub should_alert: bool,
}

/// Totals from one completed analysis cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    /// Aggregated rows examined
    pub tourists: usize,
    /// Alerts the fusion step decided to raise
    pub alerts: usize,
    /// Wall-clock cycle duration in milliseconds
    pub elapsed_ms: u128,
}

/// Run the full hybrid pipeline for one tourist window. Pure compute: no
/// I/O happens past this point.
pub fn analyze_window(
    ctx: &AppContext,
    agg: &AggregatedWindow,
    events: &[TouristEvent],
) -> TouristAnalysis {
    let window_seconds = (ctx.config.feature_window_minutes * 60) as f64;
    let snapshot = enrich(agg, events, window_seconds);
    let rules = evaluate_rules(&snapshot, events);
    let anomaly_score = ctx.scorer.predict(&snapshot.features);
    let fusion = compute_hybrid_score(
        rules.rule_score,
        anomaly_score,
        ctx.config.rule_weight,
        ctx.config.ml_weight,
        ctx.config.alert_severity_threshold,
    );

    TouristAnalysis {
        snapshot,
        rules,
        fusion,
    }
}

fn build_alert(ctx: &AppContext, agg: &AggregatedWindow, analysis: &TouristAnalysis) -> IncidentAlert {
    let feature_vector = analysis
        .snapshot
        .features
        .to_map()
        .into_iter()
        .map(|(name, value)| (name, round_to(value, 6)))
        .collect();

    IncidentAlert {
        tourist_id: agg.tourist_id.clone(),
        timestamp: Utc::now(),
        rule_score: round_to(analysis.fusion.rule_score, 4),
        anomaly_score: round_to(analysis.fusion.anomaly_score, 4),
        hybrid_score: round_to(analysis.fusion.hybrid_score, 4),
        severity: analysis.fusion.severity,
        triggered_rules: analysis.rules.triggered_rules.clone(),
        feature_vector,
        latitude: agg.latest_latitude,
        longitude: agg.latest_longitude,
        zone_state: agg.latest_zone_state.clone(),
        model_version: ctx.scorer.model_version(),
    }
}

impl AnalysisReport {
    fn from_analysis(tourist_id: &str, analysis: &TouristAnalysis) -> Self {
        AnalysisReport {
            tourist_id: tourist_id.to_string(),
            features: analysis
                .snapshot
                .features
                .to_map()
                .into_iter()
                .map(|(name, value)| (name, round_to(value, 6)))
                .collect(),
            rule_score: round_to(analysis.fusion.rule_score, 4),
            anomaly_score: round_to(analysis.fusion.anomaly_score, 4),
            hybrid_score: round_to(analysis.fusion.hybrid_score, 4),
            severity: analysis.fusion.severity,
            triggered_rules: analysis.rules.triggered_rules.clone(),
            concordance: analysis.fusion.concordance,
            should_alert: analysis.fusion.should_alert,
        }
    }
}

/// The periodic driver
pub struct AnalysisDriver {
    ctx: Arc<AppContext>,
    cycle_guard: Arc<Mutex<()>>,
}

impl AnalysisDriver {
    /// Create a driver over an application context
    pub fn new(ctx: Arc<AppContext>) -> Self {
        AnalysisDriver {
            ctx,
            cycle_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Borrow the underlying context
    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Run one analysis cycle across all active tourists.
    ///
    /// Returns `None` when the previous cycle is still running (the tick is
    /// dropped) or when no store is configured. Store failures are logged
    /// and the cycle proceeds with whatever data is available.
    pub async fn run_cycle(&self) -> Option<CycleStats> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            warn!("Previous analysis cycle still running, dropping this tick");
            return None;
        };
        let store = self.ctx.store.clone()?;

        let start = Instant::now();
        let rows = match store.read_aggregated_windows().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Failed to read aggregated windows: {err}");
                Vec::new()
            }
        };

        let permits = Arc::new(Semaphore::new(num_cpus::get().max(1)));
        let mut tasks = JoinSet::new();
        let mut tourists = 0usize;

        for agg in rows {
            if agg.tourist_id.is_empty() {
                continue;
            }
            tourists += 1;

            let ctx = self.ctx.clone();
            let store = store.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                Some(analyze_and_persist(&ctx, store.as_ref(), &agg).await)
            });
        }

        let mut alerts = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(true)) => alerts += 1,
                Ok(_) => {}
                Err(err) => error!("Per-tourist analysis task failed: {err}"),
            }
        }

        let elapsed_ms = start.elapsed().as_millis();
        info!("Analysis cycle: tourists={tourists} alerts={alerts} duration={elapsed_ms}ms");
        Some(CycleStats {
            tourists,
            alerts,
            elapsed_ms,
        })
    }

    /// On-demand analysis of one tourist through the same pipeline.
    ///
    /// `Ok(None)` means the tourist has no aggregated row (not enough recent
    /// activity); an unconfigured store is an error the HTTP layer maps to
    /// 503.
    pub async fn analyze_tourist(&self, tourist_id: &str) -> Result<Option<AnalysisReport>> {
        let store = self.ctx.store.clone().ok_or_else(|| SentinelError::StoreError {
            message: "event store not configured".to_string(),
        })?;

        let rows = match store.read_aggregated_windows().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Failed to read aggregated windows: {err}");
                Vec::new()
            }
        };
        let Some(agg) = rows.into_iter().find(|row| row.tourist_id == tourist_id) else {
            return Ok(None);
        };

        let events = match store
            .read_recent_events(tourist_id, self.ctx.config.feature_window_minutes)
            .await
        {
            Ok(events) => events,
            Err(err) => {
                warn!("Failed to fetch events for tourist {tourist_id}: {err}");
                Vec::new()
            }
        };

        let analysis = analyze_window(&self.ctx, &agg, &events);
        Ok(Some(AnalysisReport::from_analysis(tourist_id, &analysis)))
    }

    /// Fire-and-forget retraining.
    ///
    /// The spawned task runs to completion even if the service is shutting
    /// down; a failure leaves the current bundle, in memory and on disk,
    /// untouched.
    pub fn spawn_retraining(&self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            info!("Background retraining started");
            match retrain(&ctx).await {
                Ok(report) => info!(
                    "Background retraining complete: version={} samples={} threshold={:.4}",
                    report.model_version, report.training_samples, report.threshold
                ),
                Err(err) => error!("Background retraining failed: {err}"),
            }
        });
    }

    /// Tick [`run_cycle`](Self::run_cycle) on the configured interval until
    /// shutdown is signalled, then wait for the in-flight cycle to finish.
    pub async fn run_scheduler(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.ctx.config.analysis_interval_seconds.max(1));
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        info!(
            "Analysis scheduler started (interval={}s)",
            period.as_secs()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Block until any in-flight cycle releases the guard
        let _ = self.cycle_guard.lock().await;
        info!("Analysis scheduler stopped");
    }
}

async fn analyze_and_persist(
    ctx: &AppContext,
    store: &dyn EventStore,
    agg: &AggregatedWindow,
) -> bool {
    let events = match store
        .read_recent_events(&agg.tourist_id, ctx.config.feature_window_minutes)
        .await
    {
        Ok(events) => events,
        Err(err) => {
            warn!("Failed to fetch events for tourist {}: {err}", agg.tourist_id);
            Vec::new()
        }
    };

    let analysis = analyze_window(ctx, agg, &events);
    if !analysis.fusion.should_alert {
        return false;
    }

    let alert = build_alert(ctx, agg, &analysis);
    if let Err(err) = store.write_incident_alert(&alert).await {
        // At-most-once: the alert is dropped, never retried
        error!(
            "Failed to insert incident alert for {}: {err}",
            agg.tourist_id
        );
    }
    true
}

/// Full retraining pipeline: SAFE-mode history → training matrix → fit →
/// calibrate → atomic save → live reload.
pub async fn retrain(ctx: &AppContext) -> Result<TrainingReport> {
    let store = ctx.store.as_ref().ok_or_else(|| SentinelError::StoreError {
        message: "event store not configured".to_string(),
    })?;

    let events = store
        .read_safe_training_events(TRAINING_LOOKBACK_DAYS, TRAINING_EVENT_CAP)
        .await?;
    let samples = build_training_matrix(&events, DEFAULT_WINDOW_SECONDS, DEFAULT_STRIDE_SECONDS);
    info!(
        "Generated {} feature windows from {} raw events",
        samples.len(),
        events.len()
    );

    let report = train_and_save(
        &samples,
        Path::new(&ctx.config.model_path),
        &TrainingOptions::default(),
    )?;
    ctx.scorer.reload();
    Ok(report)
}
