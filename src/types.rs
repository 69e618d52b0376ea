use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Zone classification attached to every tourist event.
///
/// The simulator emits the five known states; anything else on the wire is
/// tolerated and captured verbatim in [`ZoneState::Unknown`] rather than
/// rejected, so an alert can echo exactly what was received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ZoneState {
    /// Inside a safe area
    Safe,
    /// Approaching a caution geofence
    NearCaution,
    /// Inside a caution geofence
    InCaution,
    /// Approaching a danger geofence
    NearDanger,
    /// Inside a danger geofence
    InDanger,
    /// Unrecognized zone label, carried as received
    Unknown(String),
}

impl ZoneState {
    /// Wire representation; unknown labels come back verbatim
    pub fn as_str(&self) -> &str {
        match self {
            ZoneState::Safe => "SAFE",
            ZoneState::NearCaution => "NEAR_CAUTION",
            ZoneState::InCaution => "IN_CAUTION",
            ZoneState::NearDanger => "NEAR_DANGER",
            ZoneState::InDanger => "IN_DANGER",
            ZoneState::Unknown(raw) => raw,
        }
    }

    /// Parse a wire label, capturing anything unrecognized
    pub fn from_wire(raw: &str) -> ZoneState {
        match raw {
            "SAFE" => ZoneState::Safe,
            "NEAR_CAUTION" => ZoneState::NearCaution,
            "IN_CAUTION" => ZoneState::InCaution,
            "NEAR_DANGER" => ZoneState::NearDanger,
            "IN_DANGER" => ZoneState::InDanger,
            _ => ZoneState::Unknown(raw.to_string()),
        }
    }

    /// States counted towards `danger_ratio`
    pub fn is_danger(&self) -> bool {
        matches!(self, ZoneState::InDanger | ZoneState::NearDanger)
    }

    /// States counted towards `caution_ratio`
    pub fn is_caution(&self) -> bool {
        matches!(self, ZoneState::InCaution | ZoneState::NearCaution)
    }
}

impl Serialize for ZoneState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ZoneState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ZoneState::from_wire(&raw))
    }
}

/// Kind of observation carried by a tourist event.
///
/// Same tolerance policy as [`ZoneState`]: unrecognized wire values are
/// captured in [`EventType::Other`], never an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Position update
    Move,
    /// Crossed into a geofenced zone
    ZoneEnter,
    /// Crossed out of a geofenced zone
    ZoneExit,
    /// Panic button pressed
    Panic,
    /// Unrecognized event type, carried as received
    Other(String),
}

impl EventType {
    /// Wire representation; unknown labels come back verbatim
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Move => "MOVE",
            EventType::ZoneEnter => "ZONE_ENTER",
            EventType::ZoneExit => "ZONE_EXIT",
            EventType::Panic => "PANIC",
            EventType::Other(raw) => raw,
        }
    }

    /// Parse a wire label, capturing anything unrecognized
    pub fn from_wire(raw: &str) -> EventType {
        match raw {
            "MOVE" => EventType::Move,
            "ZONE_ENTER" => EventType::ZoneEnter,
            "ZONE_EXIT" => EventType::ZoneExit,
            "PANIC" => EventType::Panic,
            _ => EventType::Other(raw.to_string()),
        }
    }

    /// Event types counted towards `zone_transitions`
    pub fn is_transition(&self) -> bool {
        matches!(self, EventType::ZoneEnter | EventType::ZoneExit)
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EventType::from_wire(&raw))
    }
}

/// Graded alert severity, ordered `LOW < MEDIUM < HIGH < CRITICAL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// No action required
    Low,
    /// Worth surfacing to an operator
    Medium,
    /// Likely incident
    High,
    /// Confirmed danger pattern
    Critical,
}

impl Severity {
    /// Map a `[0, 1]` score to a severity label.
    ///
    /// Band lower bounds are inclusive: `0.8 → CRITICAL`, `0.6 → HIGH`,
    /// `0.3 → MEDIUM`.
    pub fn classify(score: f64) -> Severity {
        if score >= 0.8 {
            Severity::Critical
        } else if score >= 0.6 {
            Severity::High
        } else if score >= 0.3 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Whether this severity ranks at or above `threshold`
    pub fn meets(self, threshold: Severity) -> bool {
        self >= threshold
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity level: {other}")),
        }
    }
}

/// One immutable observation of one tourist.
///
/// Timestamps are canonicalized to UTC instants on ingest; rows whose
/// timestamps cannot be parsed never make it past the store adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouristEvent {
    /// Opaque tourist identifier
    pub tourist_id: String,
    /// Observation instant (UTC)
    pub timestamp: DateTime<Utc>,
    /// Zone classification at the instant of observation
    pub zone_state: ZoneState,
    /// Kind of observation
    pub event_type: EventType,
    /// Seconds accumulated in a risk zone (non-negative)
    #[serde(default)]
    pub risk_timer_value: f64,
    /// WGS84 latitude in degrees
    #[serde(default)]
    pub latitude: Option<f64>,
    /// WGS84 longitude in degrees
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Simulator mode that produced the event (`"safe"` marks training data)
    #[serde(default)]
    pub simulation_mode: Option<String>,
}

/// Parse an ISO-8601 timestamp string into a UTC instant.
///
/// Accepts `Z` and explicit offsets; bare naive timestamps are treated as
/// UTC. Returns `None` on anything unparseable so callers can skip the row.
pub fn parse_event_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Pre-aggregated summary of one tourist's last 2 minutes of events,
/// produced by the external `feature_agg_2min` view.
///
/// Every numeric field defaults to 0 when the view omits it; the core
/// treats the row as a read-only snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedWindow {
    /// Tourist this row summarizes (empty rows are skipped by the driver)
    #[serde(default)]
    pub tourist_id: String,
    /// Number of events in the window
    #[serde(default)]
    pub event_count: f64,
    /// Distinct zone states observed
    #[serde(default)]
    pub unique_zones: f64,
    /// Fraction of events in danger states
    #[serde(default)]
    pub danger_ratio: f64,
    /// Fraction of events in caution states
    #[serde(default)]
    pub caution_ratio: f64,
    /// Panic button presses
    #[serde(default)]
    pub panic_count: f64,
    /// Zone enter/exit events
    #[serde(default)]
    pub zone_transitions: f64,
    /// Maximum risk timer value observed (seconds)
    #[serde(default)]
    pub max_risk_timer: f64,
    /// Mean risk timer value (seconds)
    #[serde(default)]
    pub avg_risk_timer: f64,
    /// Sample standard deviation of latitude
    #[serde(default)]
    pub lat_std: f64,
    /// Sample standard deviation of longitude
    #[serde(default)]
    pub lng_std: f64,
    /// Most recent zone state, when the view supplies it
    #[serde(default)]
    pub latest_zone_state: Option<ZoneState>,
    /// Most recent latitude, when the view supplies it
    #[serde(default)]
    pub latest_latitude: Option<f64>,
    /// Most recent longitude, when the view supplies it
    #[serde(default)]
    pub latest_longitude: Option<f64>,
}

/// Row written to the `incident_alerts` table when a cycle decides to alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentAlert {
    /// Tourist the alert concerns
    pub tourist_id: String,
    /// Generation instant (UTC, ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,
    /// Composite rule score, rounded to 4 decimals
    pub rule_score: f64,
    /// Normalized anomaly score, rounded to 4 decimals
    pub anomaly_score: f64,
    /// Fused score, rounded to 4 decimals
    pub hybrid_score: f64,
    /// Severity the fused score classified to
    pub severity: Severity,
    /// Rule IDs that fired, in rule-definition order
    pub triggered_rules: Vec<String>,
    /// Feature values the decision was based on, each rounded to 6 decimals
    pub feature_vector: BTreeMap<String, f64>,
    /// Last known latitude
    pub latitude: Option<f64>,
    /// Last known longitude
    pub longitude: Option<f64>,
    /// Last known zone state
    pub zone_state: Option<ZoneState>,
    /// Version of the model bundle that scored the window
    pub model_version: String,
}

/// Round `value` to `decimals` decimal places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
