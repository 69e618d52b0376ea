//! # Tourist Sentinel
//!
//! Hybrid anomaly detection for tourist safety: a deterministic rule engine
//! fused with an isolation-forest behavioural scorer over geolocated event
//! streams.
//!
//! ## Pipeline
//!
//! Every analysis cycle, for each active tourist:
//!
//! 1. **Features**: the pre-aggregated 2-minute window row is enriched
//!    with geodesic distance and speed into the canonical 12-feature vector
//! 2. **Rules**: six deterministic safety rules score the window
//! 3. **Anomaly**: the isolation forest scores the same vector to `[0, 1]`
//!    (exactly `0.0` when no model is loaded: rules-only mode)
//! 4. **Fusion**: the two scores are combined with concordance-based
//!    adjustments and classified into `LOW..CRITICAL`
//! 5. Alerts at or above the configured severity are persisted to the
//!    event store
//!
//! ## Quick Start
//!
//! ```rust
//! use tourist_sentinel::features::enrich;
//! use tourist_sentinel::fusion::compute_hybrid_score;
//! use tourist_sentinel::rules::evaluate_rules;
//! use tourist_sentinel::types::{AggregatedWindow, Severity};
//!
//! let agg = AggregatedWindow {
//!     tourist_id: "tourist-42".to_string(),
//!     event_count: 6.0,
//!     panic_count: 1.0,
//!     ..Default::default()
//! };
//!
//! let snapshot = enrich(&agg, &[], 120.0);
//! let rules = evaluate_rules(&snapshot, &[]);
//! let fusion = compute_hybrid_score(rules.rule_score, 0.0, 0.6, 0.4, Severity::Medium);
//!
//! assert_eq!(fusion.severity, Severity::High);
//! assert!(fusion.should_alert);
//! ```
//!
//! ## Core Components
//!
//! - [`features`]: window feature engineering and the training matrix
//! - [`rules`]: the fixed six-rule safety table and composite scoring
//! - [`anomaly`]: isolation forest, model bundle lifecycle, trainer
//! - [`fusion`]: rule/ML score fusion with concordance analysis
//! - [`driver`]: the periodic analysis driver and application context
//! - [`store`]: the Event Store trait and its Supabase binding
//! - [`server`]: the HTTP surface

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Isolation-forest anomaly scoring and model lifecycle
pub mod anomaly;
/// Environment-driven service configuration
pub mod config;
/// Periodic analysis driver and application context
pub mod driver;
/// Error types and result handling
pub mod errors;
/// Window feature engineering
pub mod features;
/// Hybrid score fusion
pub mod fusion;
/// Geodesic distance utility
pub mod geo;
/// Deterministic safety rules
pub mod rules;
/// HTTP surface
pub mod server;
/// Event Store abstraction and Supabase adapter
pub mod store;
/// Core domain types
pub mod types;

// Re-export the types most callers need
pub use anomaly::{AnomalyScorer, ModelBundle};
pub use config::Config;
pub use driver::{AnalysisDriver, AnalysisReport, AppContext};
pub use errors::{Result, SentinelError};
pub use features::{FeatureVector, WindowSnapshot, FEATURE_COLUMNS};
pub use fusion::{compute_hybrid_score, Concordance, FusionResult};
pub use rules::{evaluate_rules, RuleEngineOutput, RuleResult};
pub use store::{EventStore, SupabaseStore};
pub use types::{
    AggregatedWindow, EventType, IncidentAlert, Severity, TouristEvent, ZoneState,
};
