//! Feature engineering over the 2-minute event window.
//!
//! Turns raw `tourist_events` rows into the 12-dimensional feature vector
//! consumed by both the rule engine and the isolation-forest scorer. Two
//! paths exist: [`enrich`] completes a pre-aggregated view row for live
//! inference, and [`build_training_matrix`] computes everything from raw
//! events for offline training. Both are pure and deterministic.

use crate::geo::haversine_meters;
use crate::types::{AggregatedWindow, EventType, TouristEvent, ZoneState};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Canonical feature ordering. This is a stable contract: the model bundle
/// records the column list it was trained with and the scorer binds by name.
pub const FEATURE_COLUMNS: [&str; 12] = [
    "event_count",
    "unique_zones",
    "danger_ratio",
    "caution_ratio",
    "panic_count",
    "zone_transitions",
    "max_risk_timer",
    "avg_risk_timer",
    "lat_std",
    "lng_std",
    "distance_traveled",
    "speed_estimate",
];

/// Windows with fewer events than this are discarded during training
pub const MIN_WINDOW_EVENTS: usize = 3;

/// Default window width in seconds
pub const DEFAULT_WINDOW_SECONDS: i64 = 120;

/// Default stride between training windows in seconds
pub const DEFAULT_STRIDE_SECONDS: i64 = 30;

/// The canonical 12-feature vector.
///
/// Field order matches [`FEATURE_COLUMNS`]; representing the vector as a
/// struct makes the "every canonical key is present" invariant structural.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Number of events in the window
    pub event_count: f64,
    /// Distinct zone states observed
    pub unique_zones: f64,
    /// Fraction of events in `{IN_DANGER, NEAR_DANGER}`
    pub danger_ratio: f64,
    /// Fraction of events in `{IN_CAUTION, NEAR_CAUTION}`
    pub caution_ratio: f64,
    /// Panic button presses
    pub panic_count: f64,
    /// `ZONE_ENTER` / `ZONE_EXIT` events
    pub zone_transitions: f64,
    /// Maximum risk timer value (seconds)
    pub max_risk_timer: f64,
    /// Mean risk timer value (seconds)
    pub avg_risk_timer: f64,
    /// Sample standard deviation of latitude
    pub lat_std: f64,
    /// Sample standard deviation of longitude
    pub lng_std: f64,
    /// Sum of consecutive Haversine segments (meters)
    pub distance_traveled: f64,
    /// `distance_traveled / window_seconds` (m/s)
    pub speed_estimate: f64,
}

impl FeatureVector {
    /// Look up a feature by its canonical name
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "event_count" => Some(self.event_count),
            "unique_zones" => Some(self.unique_zones),
            "danger_ratio" => Some(self.danger_ratio),
            "caution_ratio" => Some(self.caution_ratio),
            "panic_count" => Some(self.panic_count),
            "zone_transitions" => Some(self.zone_transitions),
            "max_risk_timer" => Some(self.max_risk_timer),
            "avg_risk_timer" => Some(self.avg_risk_timer),
            "lat_std" => Some(self.lat_std),
            "lng_std" => Some(self.lng_std),
            "distance_traveled" => Some(self.distance_traveled),
            "speed_estimate" => Some(self.speed_estimate),
            _ => None,
        }
    }

    /// Extract values in the order of `columns`, 0.0 for unknown names.
    ///
    /// Used to bind a vector to whatever column list a model bundle was
    /// trained with.
    pub fn to_row(&self, columns: &[String]) -> Vec<f64> {
        columns
            .iter()
            .map(|name| self.get(name).unwrap_or(0.0))
            .collect()
    }

    /// Name → value map in canonical order
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        FEATURE_COLUMNS
            .iter()
            .map(|&name| (name.to_string(), self.get(name).unwrap_or(0.0)))
            .collect()
    }
}

/// Rule-engine input: the feature vector plus the window context that is not
/// part of the model's column contract.
///
/// `latest_zone_state` must come from the aggregation view; when the view
/// does not supply it, rules that depend on it simply cannot trigger.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    /// The canonical 12-feature vector
    pub features: FeatureVector,
    /// Most recent zone state, when known
    pub latest_zone_state: Option<ZoneState>,
}

/// Complete an aggregated view row into a full [`WindowSnapshot`].
///
/// The ten view-supplied features are copied as-is (missing ones already
/// defaulted to 0 at deserialization); `distance_traveled` and
/// `speed_estimate` are computed here from the raw events because ordered
/// pairwise Haversine does not aggregate in SQL.
pub fn enrich(
    agg: &AggregatedWindow,
    events: &[TouristEvent],
    window_seconds: f64,
) -> WindowSnapshot {
    let distance = distance_traveled(events);
    let speed = if window_seconds > 0.0 {
        distance / window_seconds
    } else {
        0.0
    };

    WindowSnapshot {
        features: FeatureVector {
            event_count: agg.event_count,
            unique_zones: agg.unique_zones,
            danger_ratio: agg.danger_ratio,
            caution_ratio: agg.caution_ratio,
            panic_count: agg.panic_count,
            zone_transitions: agg.zone_transitions,
            max_risk_timer: agg.max_risk_timer,
            avg_risk_timer: agg.avg_risk_timer,
            lat_std: agg.lat_std,
            lng_std: agg.lng_std,
            distance_traveled: distance,
            speed_estimate: speed,
        },
        latest_zone_state: agg.latest_zone_state.clone(),
    }
}

/// Sum of Haversine distances over consecutive timestamp-ascending pairs.
///
/// Pairs where either endpoint lacks coordinates are skipped; they
/// contribute nothing and do not abort the walk.
pub fn distance_traveled(events: &[TouristEvent]) -> f64 {
    let mut ordered: Vec<&TouristEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);
    pairwise_distance(&ordered)
}

fn pairwise_distance(ordered: &[&TouristEvent]) -> f64 {
    let mut total = 0.0;
    for pair in ordered.windows(2) {
        if let (Some(lat1), Some(lng1), Some(lat2), Some(lng2)) = (
            pair[0].latitude,
            pair[0].longitude,
            pair[1].latitude,
            pair[1].longitude,
        ) {
            total += haversine_meters(lat1, lng1, lat2, lng2);
        }
    }
    total
}

/// Build the training feature matrix from historical raw events.
///
/// Events are grouped per tourist and sorted ascending; a window of
/// `window_seconds` slides from each group's first timestamp in
/// `stride_seconds` increments until the window start passes the last
/// timestamp. Windows holding at least [`MIN_WINDOW_EVENTS`] events are
/// aggregated into one `(tourist_id, FeatureVector)` row.
pub fn build_training_matrix(
    events: &[TouristEvent],
    window_seconds: i64,
    stride_seconds: i64,
) -> Vec<(String, FeatureVector)> {
    let mut groups: BTreeMap<&str, Vec<&TouristEvent>> = BTreeMap::new();
    for event in events {
        groups.entry(event.tourist_id.as_str()).or_default().push(event);
    }

    let window = Duration::seconds(window_seconds.max(1));
    let stride = Duration::seconds(stride_seconds.max(1));
    let mut rows = Vec::new();

    for (tourist_id, mut group) in groups {
        group.sort_by_key(|e| e.timestamp);
        let first = group[0].timestamp;
        let last = group[group.len() - 1].timestamp;

        let mut current = first;
        while current <= last {
            let window_end = current + window;
            let slice: Vec<&TouristEvent> = group
                .iter()
                .copied()
                .filter(|e| e.timestamp >= current && e.timestamp < window_end)
                .collect();

            if slice.len() >= MIN_WINDOW_EVENTS {
                rows.push((
                    tourist_id.to_string(),
                    aggregate_window(&slice, window_seconds as f64),
                ));
            }
            current += stride;
        }
    }

    rows
}

/// Aggregate one window slice into a full feature vector
fn aggregate_window(slice: &[&TouristEvent], window_seconds: f64) -> FeatureVector {
    let n = slice.len() as f64;

    let unique_zones = slice
        .iter()
        .map(|e| &e.zone_state)
        .collect::<HashSet<&ZoneState>>()
        .len() as f64;
    let danger_count = slice.iter().filter(|e| e.zone_state.is_danger()).count() as f64;
    let caution_count = slice.iter().filter(|e| e.zone_state.is_caution()).count() as f64;
    let panic_count = slice
        .iter()
        .filter(|e| e.event_type == EventType::Panic)
        .count() as f64;
    let zone_transitions = slice.iter().filter(|e| e.event_type.is_transition()).count() as f64;

    let max_risk_timer = slice
        .iter()
        .map(|e| e.risk_timer_value)
        .fold(0.0f64, f64::max);
    let avg_risk_timer = slice.iter().map(|e| e.risk_timer_value).sum::<f64>() / n;

    let lats: Vec<f64> = slice.iter().filter_map(|e| e.latitude).collect();
    let lngs: Vec<f64> = slice.iter().filter_map(|e| e.longitude).collect();

    let mut ordered: Vec<&TouristEvent> = slice.to_vec();
    ordered.sort_by_key(|e| e.timestamp);
    let distance = pairwise_distance(&ordered);
    let speed = if window_seconds > 0.0 {
        distance / window_seconds
    } else {
        0.0
    };

    FeatureVector {
        event_count: n,
        unique_zones,
        danger_ratio: danger_count / n,
        caution_ratio: caution_count / n,
        panic_count,
        zone_transitions,
        max_risk_timer,
        avg_risk_timer,
        lat_std: sample_std(&lats),
        lng_std: sample_std(&lngs),
        distance_traveled: distance,
        speed_estimate: speed,
    }
}

/// Sample standard deviation (ddof = 1), 0 on degenerate inputs
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{parse_event_timestamp, EventType};

    fn event(
        tourist_id: &str,
        ts: &str,
        zone: ZoneState,
        event_type: EventType,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> TouristEvent {
        TouristEvent {
            tourist_id: tourist_id.to_string(),
            timestamp: parse_event_timestamp(ts).unwrap(),
            zone_state: zone,
            event_type,
            risk_timer_value: 0.0,
            latitude: lat,
            longitude: lng,
            simulation_mode: None,
        }
    }

    #[test]
    fn test_enrich_contains_all_canonical_features() {
        let agg = AggregatedWindow {
            tourist_id: "t-1".to_string(),
            event_count: 5.0,
            danger_ratio: 0.2,
            ..Default::default()
        };
        let snapshot = enrich(&agg, &[], 120.0);
        for name in FEATURE_COLUMNS {
            assert!(snapshot.features.get(name).is_some(), "missing {name}");
        }
        assert_eq!(snapshot.features.event_count, 5.0);
        assert_eq!(snapshot.features.danger_ratio, 0.2);
    }

    #[test]
    fn test_enrich_is_deterministic() {
        let agg = AggregatedWindow {
            tourist_id: "t-1".to_string(),
            event_count: 4.0,
            ..Default::default()
        };
        let events = vec![
            event("t-1", "2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move, Some(12.0), Some(77.0)),
            event("t-1", "2026-01-01T12:00:30Z", ZoneState::Safe, EventType::Move, Some(12.001), Some(77.0)),
        ];
        let a = enrich(&agg, &events, 120.0);
        let b = enrich(&agg, &events, 120.0);
        assert_eq!(a.features, b.features);
    }

    #[test]
    fn test_speed_distance_relation() {
        let agg = AggregatedWindow::default();
        let events = vec![
            event("t", "2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move, Some(12.0), Some(77.0)),
            event("t", "2026-01-01T12:01:00Z", ZoneState::Safe, EventType::Move, Some(12.01), Some(77.0)),
        ];
        let snapshot = enrich(&agg, &events, 120.0);
        assert!(snapshot.features.distance_traveled > 0.0);
        assert!(
            (snapshot.features.speed_estimate * 120.0 - snapshot.features.distance_traveled).abs()
                < 1e-9
        );

        let degenerate = enrich(&agg, &events, 0.0);
        assert_eq!(degenerate.features.speed_estimate, 0.0);
    }

    #[test]
    fn test_distance_skips_pairs_with_missing_coordinates() {
        let events = vec![
            event("t", "2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move, Some(12.0), Some(77.0)),
            event("t", "2026-01-01T12:00:10Z", ZoneState::Safe, EventType::Move, None, None),
            event("t", "2026-01-01T12:00:20Z", ZoneState::Safe, EventType::Move, Some(12.001), Some(77.0)),
        ];
        // Both pairs touching the coordinate-less event are skipped
        assert_eq!(distance_traveled(&events), 0.0);
    }

    #[test]
    fn test_distance_sorts_by_timestamp() {
        let shuffled = vec![
            event("t", "2026-01-01T12:01:00Z", ZoneState::Safe, EventType::Move, Some(12.001), Some(77.0)),
            event("t", "2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move, Some(12.0), Some(77.0)),
            event("t", "2026-01-01T12:02:00Z", ZoneState::Safe, EventType::Move, Some(12.0), Some(77.0)),
        ];
        let ordered = vec![
            shuffled[1].clone(),
            shuffled[0].clone(),
            shuffled[2].clone(),
        ];
        assert!((distance_traveled(&shuffled) - distance_traveled(&ordered)).abs() < 1e-9);
    }

    #[test]
    fn test_training_matrix_window_semantics() {
        // 4 events over 90s: one tourist, all inside the first 2-min window
        let mut events = vec![
            event("t-1", "2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move, Some(12.0), Some(77.0)),
            event("t-1", "2026-01-01T12:00:30Z", ZoneState::InCaution, EventType::ZoneEnter, Some(12.0005), Some(77.0)),
            event("t-1", "2026-01-01T12:01:00Z", ZoneState::InCaution, EventType::Move, Some(12.001), Some(77.0)),
            event("t-1", "2026-01-01T12:01:30Z", ZoneState::Safe, EventType::ZoneExit, Some(12.0015), Some(77.0)),
        ];
        // A second tourist with only 2 events never reaches MIN_WINDOW_EVENTS
        events.push(event("t-2", "2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move, None, None));
        events.push(event("t-2", "2026-01-01T12:00:10Z", ZoneState::Safe, EventType::Move, None, None));

        let rows = build_training_matrix(&events, 120, 30);
        assert!(rows.iter().all(|(id, _)| id == "t-1"));
        assert!(!rows.is_empty());

        let (_, first) = &rows[0];
        assert_eq!(first.event_count, 4.0);
        assert_eq!(first.zone_transitions, 2.0);
        assert_eq!(first.caution_ratio, 0.5);
        assert_eq!(first.unique_zones, 2.0);
    }

    #[test]
    fn test_training_matrix_stride_produces_multiple_windows() {
        // Evenly spaced every 20s over 3 minutes; stride 30s yields several windows
        let events: Vec<TouristEvent> = (0..10)
            .map(|i| {
                event(
                    "t-1",
                    &format!("2026-01-01T12:0{}:{:02}Z", i * 20 / 60, (i * 20) % 60),
                    ZoneState::Safe,
                    EventType::Move,
                    Some(12.0),
                    Some(77.0),
                )
            })
            .collect();
        let rows = build_training_matrix(&events, 120, 30);
        assert!(rows.len() > 1, "expected multiple windows, got {}", rows.len());
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[]), 0.0);
        assert_eq!(sample_std(&[1.0]), 0.0);
        assert_eq!(sample_std(&[2.0, 2.0, 2.0]), 0.0);
        // sample std of [1, 2, 3, 4] is sqrt(5/3)
        let std = sample_std(&[1.0, 2.0, 3.0, 4.0]);
        assert!((std - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_risk_timer_aggregation() {
        let mut events: Vec<TouristEvent> = (0..3)
            .map(|i| {
                event(
                    "t-1",
                    &format!("2026-01-01T12:00:{:02}Z", i * 10),
                    ZoneState::InDanger,
                    EventType::Move,
                    None,
                    None,
                )
            })
            .collect();
        events[0].risk_timer_value = 10.0;
        events[1].risk_timer_value = 50.0;
        events[2].risk_timer_value = 30.0;

        let rows = build_training_matrix(&events, 120, 30);
        let (_, features) = &rows[0];
        assert_eq!(features.max_risk_timer, 50.0);
        assert_eq!(features.avg_risk_timer, 30.0);
        assert_eq!(features.danger_ratio, 1.0);
    }
}
