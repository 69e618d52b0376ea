//! Supabase (PostgREST) binding of the [`EventStore`] trait.
//!
//! Thin JSON-over-HTTP adapter: the aggregation view and the event table
//! are queried with PostgREST filter parameters, alerts are inserted into
//! `incident_alerts`. Rows that fail to deserialize are skipped row-by-row
//! so one malformed record never poisons a whole read.

use crate::errors::{Result, SentinelError};
use crate::store::EventStore;
use crate::types::{
    parse_event_timestamp, AggregatedWindow, EventType, IncidentAlert, TouristEvent, ZoneState,
};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::Deserialize;

const AGGREGATION_VIEW: &str = "feature_agg_2min";
const EVENTS_TABLE: &str = "tourist_events";
const ALERTS_TABLE: &str = "incident_alerts";

/// PostgREST client for the hosted event database
pub struct SupabaseStore {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl SupabaseStore {
    /// Create a store client for a Supabase project
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let base_url = url.into().trim_end_matches('/').to_string();
        info!("Supabase event store initialised for {base_url}");
        SupabaseStore {
            http: reqwest::Client::new(),
            base_url,
            service_key: service_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn select(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<serde_json::Value>> {
        let response = self
            .request(reqwest::Method::GET, table)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Wire shape of one `tourist_events` row.
///
/// Everything is optional so a sparse or slightly malformed row still
/// deserializes; the conversion below decides what is usable.
#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(default)]
    tourist_id: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    zone_state: Option<ZoneState>,
    #[serde(default)]
    event_type: Option<EventType>,
    #[serde(default)]
    risk_timer_value: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    simulation_mode: Option<String>,
}

impl EventRow {
    /// Canonicalize into a [`TouristEvent`], or `None` when the timestamp
    /// is missing or unparseable.
    fn into_event(self) -> Option<TouristEvent> {
        let timestamp = parse_event_timestamp(self.timestamp.as_deref()?)?;
        Some(TouristEvent {
            tourist_id: self.tourist_id,
            timestamp,
            zone_state: self
                .zone_state
                .unwrap_or_else(|| ZoneState::Unknown(String::new())),
            event_type: self
                .event_type
                .unwrap_or_else(|| EventType::Other(String::new())),
            risk_timer_value: self.risk_timer_value.unwrap_or(0.0),
            latitude: self.latitude,
            longitude: self.longitude,
            simulation_mode: self.simulation_mode,
        })
    }
}

fn parse_events(rows: Vec<serde_json::Value>) -> Vec<TouristEvent> {
    let total = rows.len();
    let mut events: Vec<TouristEvent> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<EventRow>(row).ok())
        .filter_map(EventRow::into_event)
        .collect();
    if events.len() < total {
        debug!("Skipped {} unusable event rows", total - events.len());
    }
    events.sort_by_key(|e| e.timestamp);
    events
}

#[async_trait]
impl EventStore for SupabaseStore {
    async fn read_aggregated_windows(&self) -> Result<Vec<AggregatedWindow>> {
        let rows = self
            .select(AGGREGATION_VIEW, &[("select", "*".to_string())])
            .await?;
        let total = rows.len();
        let windows: Vec<AggregatedWindow> = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect();
        if windows.len() < total {
            warn!(
                "Skipped {} malformed rows from {AGGREGATION_VIEW}",
                total - windows.len()
            );
        }
        Ok(windows)
    }

    async fn read_recent_events(
        &self,
        tourist_id: &str,
        window_minutes: i64,
    ) -> Result<Vec<TouristEvent>> {
        let since = (Utc::now() - Duration::minutes(window_minutes))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let rows = self
            .select(
                EVENTS_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("tourist_id", format!("eq.{tourist_id}")),
                    ("timestamp", format!("gte.{since}")),
                    ("order", "timestamp.asc".to_string()),
                ],
            )
            .await?;
        Ok(parse_events(rows))
    }

    async fn read_safe_training_events(
        &self,
        days: i64,
        limit: usize,
    ) -> Result<Vec<TouristEvent>> {
        let since =
            (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Micros, true);
        let rows = self
            .select(
                EVENTS_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("simulation_mode", "eq.safe".to_string()),
                    ("timestamp", format!("gte.{since}")),
                    ("order", "timestamp.asc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(parse_events(rows))
    }

    async fn write_incident_alert(&self, alert: &IncidentAlert) -> Result<()> {
        self.request(reqwest::Method::POST, ALERTS_TABLE)
            .header("Prefer", "return=minimal")
            .json(alert)
            .send()
            .await?
            .error_for_status()?;
        info!(
            "Alert inserted: tourist={} severity={} hybrid={:.2}",
            alert.tourist_id, alert.severity, alert.hybrid_score
        );
        Ok(())
    }

    async fn acknowledge_alert(&self, alert_id: &str, officer_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "acknowledged": true,
            "acknowledged_by": officer_id,
            "acknowledged_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        });
        self.request(reqwest::Method::PATCH, ALERTS_TABLE)
            .query(&[("id", format!("eq.{alert_id}"))])
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| SentinelError::StoreError {
                message: format!("failed to acknowledge alert {alert_id}: {err}"),
            })?;
        Ok(())
    }

    async fn resolve_alert(&self, alert_id: &str) -> Result<()> {
        self.request(reqwest::Method::PATCH, ALERTS_TABLE)
            .query(&[("id", format!("eq.{alert_id}"))])
            .json(&serde_json::json!({ "resolved": true }))
            .send()
            .await?
            .error_for_status()
            .map_err(|err| SentinelError::StoreError {
                message: format!("failed to resolve alert {alert_id}: {err}"),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_row_parsing_skips_bad_timestamps() {
        let rows = vec![
            serde_json::json!({
                "tourist_id": "t-1",
                "timestamp": "2026-01-01T12:00:05Z",
                "zone_state": "SAFE",
                "event_type": "MOVE",
                "risk_timer_value": 0,
                "latitude": 12.0,
                "longitude": 77.0
            }),
            serde_json::json!({
                "tourist_id": "t-1",
                "timestamp": "yesterday-ish",
                "zone_state": "SAFE",
                "event_type": "MOVE"
            }),
            serde_json::json!({
                "tourist_id": "t-1",
                "zone_state": "IN_DANGER",
                "event_type": "ZONE_ENTER"
            }),
        ];
        let events = parse_events(rows);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].zone_state, ZoneState::Safe);
        assert_eq!(events[0].risk_timer_value, 0.0);
    }

    #[test]
    fn test_event_rows_sorted_ascending() {
        let rows = vec![
            serde_json::json!({"tourist_id": "t", "timestamp": "2026-01-01T12:02:00Z",
                               "zone_state": "SAFE", "event_type": "MOVE"}),
            serde_json::json!({"tourist_id": "t", "timestamp": "2026-01-01T12:00:00Z",
                               "zone_state": "SAFE", "event_type": "MOVE"}),
        ];
        let events = parse_events(rows);
        assert!(events[0].timestamp < events[1].timestamp);
    }

    #[test]
    fn test_unknown_enum_values_are_captured() {
        let rows = vec![serde_json::json!({
            "tourist_id": "t-1",
            "timestamp": "2026-01-01T12:00:00Z",
            "zone_state": "HYPERSPACE",
            "event_type": "TELEPORT"
        })];
        let events = parse_events(rows);
        assert_eq!(events.len(), 1);
        // The original wire labels ride along instead of being discarded
        assert_eq!(
            events[0].zone_state,
            ZoneState::Unknown("HYPERSPACE".to_string())
        );
        assert_eq!(
            events[0].event_type,
            EventType::Other("TELEPORT".to_string())
        );
    }
}
