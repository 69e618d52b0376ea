//! HTTP surface of the detection service.
//!
//! Four routes stabilized for the driver: health, on-demand single-tourist
//! analysis, background retraining, and model metadata. The detection core
//! never depends on this module; it is a thin shell over
//! [`AnalysisDriver`].

use crate::driver::AnalysisDriver;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Shared handler state
#[derive(Clone)]
pub struct ServerState {
    /// The analysis driver (carries the application context)
    pub driver: Arc<AnalysisDriver>,
}

/// Build the service router
pub fn router(driver: Arc<AnalysisDriver>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze/{tourist_id}", post(analyze_tourist))
        .route("/retrain", post(retrain))
        .route("/model/info", get(model_info))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(ServerState { driver })
}

/// Health check with model and scheduler status
async fn health(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let ctx = state.driver.context();
    Json(json!({
        "status": "ok",
        "model_loaded": ctx.scorer.is_loaded(),
        "model_version": ctx.scorer.model_version(),
        "analysis_interval": ctx.config.analysis_interval_seconds,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// On-demand analysis for a single tourist
async fn analyze_tourist(
    State(state): State<ServerState>,
    Path(tourist_id): Path<String>,
) -> Response {
    if state.driver.context().store.is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Event store not initialised" })),
        )
            .into_response();
    }

    match state.driver.analyze_tourist(&tourist_id).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!(
                    "No recent activity for tourist {tourist_id} (need >= 3 events in 2 min)"
                )
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// Trigger model retraining in the background
async fn retrain(State(state): State<ServerState>) -> Json<serde_json::Value> {
    state.driver.spawn_retraining();
    Json(json!({
        "status": "retraining_started",
        "message": "Model retraining initiated in background",
    }))
}

/// Metadata of the currently loaded model bundle
async fn model_info(State(state): State<ServerState>) -> Json<serde_json::Value> {
    match state.driver.context().scorer.current() {
        None => Json(json!({
            "status": "no_model",
            "message": "No model loaded - running in rules-only mode",
        })),
        Some(bundle) => Json(json!({
            "model_version": bundle.model_version,
            "training_samples": bundle.training_samples,
            "threshold": bundle.threshold,
            "feature_columns": bundle.feature_columns,
            "trained_at": bundle.trained_at.to_rfc3339(),
        })),
    }
}
