//! Event Store abstraction.
//!
//! The detection core only needs a handful of operations against the event
//! database; they are expressed as an async trait so the driver can run
//! against the hosted Supabase backend in production and an in-memory
//! implementation in tests.

pub mod supabase;

pub use supabase::SupabaseStore;

use crate::errors::Result;
use crate::types::{AggregatedWindow, IncidentAlert, TouristEvent};
use async_trait::async_trait;

/// Operations the detection pipeline requires from the event database.
///
/// Implementations must be safe for concurrent use: one cycle issues many
/// reads and writes in parallel through a shared handle.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// One aggregated row per active tourist from the 2-minute view.
    ///
    /// The view enforces the minimum-events-per-window filter.
    async fn read_aggregated_windows(&self) -> Result<Vec<AggregatedWindow>>;

    /// Raw events for one tourist over the last `window_minutes`, ascending
    /// by timestamp.
    async fn read_recent_events(
        &self,
        tourist_id: &str,
        window_minutes: i64,
    ) -> Result<Vec<TouristEvent>>;

    /// Historical SAFE-simulation events for training, ascending by
    /// timestamp, capped at `limit` rows.
    async fn read_safe_training_events(&self, days: i64, limit: usize)
        -> Result<Vec<TouristEvent>>;

    /// Insert one incident alert
    async fn write_incident_alert(&self, alert: &IncidentAlert) -> Result<()>;

    /// Mark an alert as acknowledged by an officer
    async fn acknowledge_alert(&self, alert_id: &str, officer_id: &str) -> Result<()>;

    /// Mark an alert as resolved
    async fn resolve_alert(&self, alert_id: &str) -> Result<()>;
}
