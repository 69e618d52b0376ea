//! Deterministic safety rules over the 2-minute feature window.
//!
//! Rules encode domain knowledge with high confidence; they are the hard
//! floor of the detection system. Each rule is a value carrying its id, the
//! score it contributes when triggered, and a uniform predicate over the
//! window snapshot and the raw event slice. The engine walks a fixed
//! ordered table, so `triggered_rules` ordering is stable by construction.

use crate::features::WindowSnapshot;
use crate::types::{EventType, Severity, TouristEvent, ZoneState};
use chrono::{DateTime, Duration, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Maximum gap for a SAFE → IN_DANGER transition to count as rapid (R3)
const RAPID_TRANSITION_SECONDS: i64 = 10;

/// One safety rule: identity, contribution, and a predicate.
///
/// Predicates share one arity; rules that do not need the raw events simply
/// ignore the slice.
pub struct SafetyRule {
    /// Stable rule identifier (`R1` .. `R6`)
    pub id: &'static str,
    /// Score contributed when the rule triggers
    pub score: f64,
    /// Human-readable description carried into rule results
    pub description: &'static str,
    predicate: fn(&WindowSnapshot, &[TouristEvent]) -> bool,
}

/// The fixed rule table, in evaluation order
pub const RULES: [SafetyRule; 6] = [
    SafetyRule {
        id: "R1",
        score: 0.8,
        description: "Sustained danger zone exposure (>=60s)",
        predicate: sustained_danger,
    },
    SafetyRule {
        id: "R2",
        score: 1.0,
        description: "Panic button activated",
        predicate: panic_pressed,
    },
    SafetyRule {
        id: "R3",
        score: 0.7,
        description: "Rapid safe-to-danger transition (<=10s)",
        predicate: rapid_transition,
    },
    SafetyRule {
        id: "R4",
        score: 0.6,
        description: "Erratic zone transitions (>=3 in 2 min)",
        predicate: erratic_movement,
    },
    SafetyRule {
        id: "R5",
        score: 0.9,
        description: "Extended danger exposure (>=120s cumulative)",
        predicate: extended_danger,
    },
    SafetyRule {
        id: "R6",
        score: 0.75,
        description: "In danger zone >=30s with no exit",
        predicate: danger_no_exit,
    },
];

/// Result of evaluating a single rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    /// Rule identifier
    pub rule_id: String,
    /// Whether the predicate held
    pub triggered: bool,
    /// Contributed score (0 when not triggered)
    pub score: f64,
    /// Rule description
    pub description: String,
}

/// Aggregate output of one rule-engine pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEngineOutput {
    /// Composite score in `[0, 1]`
    pub rule_score: f64,
    /// IDs of triggered rules, in rule-definition order
    pub triggered_rules: Vec<String>,
    /// Per-rule results, one per table entry
    pub details: Vec<RuleResult>,
    /// Severity classification of the composite score
    pub severity: Severity,
}

/// Evaluate every rule against the window.
///
/// Composite scoring: the maximum triggered score, boosted by +0.1 for each
/// additional concurrent trigger, capped at 1.0. A panicking predicate is
/// contained: it is logged, contributes nothing, and the remaining rules
/// still evaluate.
pub fn evaluate_rules(snapshot: &WindowSnapshot, events: &[TouristEvent]) -> RuleEngineOutput {
    let mut details = Vec::with_capacity(RULES.len());

    for rule in &RULES {
        let triggered =
            match catch_unwind(AssertUnwindSafe(|| (rule.predicate)(snapshot, events))) {
                Ok(triggered) => triggered,
                Err(_) => {
                    error!("Rule {} failed during evaluation", rule.id);
                    false
                }
            };

        details.push(RuleResult {
            rule_id: rule.id.to_string(),
            triggered,
            score: if triggered { rule.score } else { 0.0 },
            description: rule.description.to_string(),
        });
    }

    let triggered_rules: Vec<String> = details
        .iter()
        .filter(|r| r.triggered)
        .map(|r| r.rule_id.clone())
        .collect();

    if triggered_rules.is_empty() {
        return RuleEngineOutput {
            rule_score: 0.0,
            triggered_rules,
            details,
            severity: Severity::Low,
        };
    }

    let max_score = details
        .iter()
        .filter(|r| r.triggered)
        .map(|r| r.score)
        .fold(0.0f64, f64::max);
    let rule_score = (max_score + 0.1 * (triggered_rules.len() - 1) as f64).min(1.0);
    let severity = Severity::classify(rule_score);

    info!(
        "Rules triggered: {:?} score={:.2} severity={}",
        triggered_rules, rule_score, severity
    );

    RuleEngineOutput {
        rule_score,
        triggered_rules,
        details,
        severity,
    }
}

/// R1: in a danger zone for >=60s with the window dominated by danger states
fn sustained_danger(snapshot: &WindowSnapshot, _events: &[TouristEvent]) -> bool {
    snapshot.features.max_risk_timer >= 60.0 && snapshot.features.danger_ratio > 0.5
}

/// R2: panic button pressed
fn panic_pressed(snapshot: &WindowSnapshot, _events: &[TouristEvent]) -> bool {
    snapshot.features.panic_count > 0.0
}

/// R3: SAFE → IN_DANGER within 10 seconds.
///
/// Ascending scan remembering the most recent SAFE timestamp; fires when an
/// IN_DANGER event follows within the threshold.
fn rapid_transition(_snapshot: &WindowSnapshot, events: &[TouristEvent]) -> bool {
    let mut ordered: Vec<&TouristEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut last_safe: Option<DateTime<Utc>> = None;
    for event in ordered {
        match &event.zone_state {
            ZoneState::Safe => last_safe = Some(event.timestamp),
            ZoneState::InDanger => {
                if let Some(safe_ts) = last_safe {
                    if event.timestamp.signed_duration_since(safe_ts)
                        <= Duration::seconds(RAPID_TRANSITION_SECONDS)
                    {
                        return true;
                    }
                }
            }
            _ => {}
        }
    }
    false
}

/// R4: >=3 zone transitions in the window
fn erratic_movement(snapshot: &WindowSnapshot, _events: &[TouristEvent]) -> bool {
    snapshot.features.zone_transitions >= 3.0
}

/// R5: cumulative risk timer >=120s
fn extended_danger(snapshot: &WindowSnapshot, _events: &[TouristEvent]) -> bool {
    snapshot.features.max_risk_timer >= 120.0
}

/// R6: currently IN_DANGER with risk timer >=30s and no ZONE_EXIT seen.
///
/// Requires the aggregation view to supply `latest_zone_state`; when it is
/// absent the rule cannot trigger.
fn danger_no_exit(snapshot: &WindowSnapshot, events: &[TouristEvent]) -> bool {
    let in_danger = matches!(snapshot.latest_zone_state, Some(ZoneState::InDanger));
    let has_exit = events.iter().any(|e| e.event_type == EventType::ZoneExit);
    in_danger && snapshot.features.max_risk_timer >= 30.0 && !has_exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;
    use crate::types::parse_event_timestamp;

    fn snapshot(features: FeatureVector) -> WindowSnapshot {
        WindowSnapshot {
            features,
            latest_zone_state: None,
        }
    }

    fn event(ts: &str, zone: ZoneState, event_type: EventType) -> TouristEvent {
        TouristEvent {
            tourist_id: "t-1".to_string(),
            timestamp: parse_event_timestamp(ts).unwrap(),
            zone_state: zone,
            event_type,
            risk_timer_value: 0.0,
            latitude: None,
            longitude: None,
            simulation_mode: None,
        }
    }

    #[test]
    fn test_no_rules_triggered() {
        let snap = snapshot(FeatureVector {
            event_count: 10.0,
            unique_zones: 1.0,
            lat_std: 0.001,
            lng_std: 0.001,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert_eq!(output.rule_score, 0.0);
        assert!(output.triggered_rules.is_empty());
        assert_eq!(output.severity, Severity::Low);
        assert_eq!(output.details.len(), RULES.len());
    }

    #[test]
    fn test_r2_panic() {
        let snap = snapshot(FeatureVector {
            panic_count: 1.0,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert_eq!(output.rule_score, 1.0);
        assert_eq!(output.triggered_rules, vec!["R2"]);
        assert_eq!(output.severity, Severity::Critical);
    }

    #[test]
    fn test_r1_sustained_danger() {
        let snap = snapshot(FeatureVector {
            max_risk_timer: 65.0,
            danger_ratio: 0.7,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert!(output.triggered_rules.contains(&"R1".to_string()));
        assert!(output.rule_score >= 0.8);
    }

    #[test]
    fn test_r1_boundary_requires_strict_ratio() {
        // max_risk_timer == 60 with danger_ratio exactly 0.5 must NOT trigger
        let snap = snapshot(FeatureVector {
            max_risk_timer: 60.0,
            danger_ratio: 0.5,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert!(!output.triggered_rules.contains(&"R1".to_string()));

        let snap = snapshot(FeatureVector {
            max_risk_timer: 60.0,
            danger_ratio: 0.51,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert!(output.triggered_rules.contains(&"R1".to_string()));
    }

    #[test]
    fn test_r3_rapid_transition() {
        let events = vec![
            event("2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move),
            event("2026-01-01T12:00:08Z", ZoneState::InDanger, EventType::ZoneEnter),
        ];
        let output = evaluate_rules(&snapshot(FeatureVector::default()), &events);
        assert!(output.triggered_rules.contains(&"R3".to_string()));
        assert!((output.rule_score - 0.7).abs() < 1e-9);
        assert_eq!(output.severity, Severity::High);
    }

    #[test]
    fn test_r3_gap_boundary() {
        // Exactly 10s triggers
        let events = vec![
            event("2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move),
            event("2026-01-01T12:00:10Z", ZoneState::InDanger, EventType::ZoneEnter),
        ];
        let output = evaluate_rules(&snapshot(FeatureVector::default()), &events);
        assert!(output.triggered_rules.contains(&"R3".to_string()));

        // Just over 10s does not
        let events = vec![
            event("2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move),
            event("2026-01-01T12:00:10.001Z", ZoneState::InDanger, EventType::ZoneEnter),
        ];
        let output = evaluate_rules(&snapshot(FeatureVector::default()), &events);
        assert!(!output.triggered_rules.contains(&"R3".to_string()));
    }

    #[test]
    fn test_r3_uses_most_recent_safe() {
        // SAFE at t=0 is stale, but SAFE at t=60 makes the t=65 danger rapid
        let events = vec![
            event("2026-01-01T12:00:00Z", ZoneState::Safe, EventType::Move),
            event("2026-01-01T12:00:30Z", ZoneState::InCaution, EventType::ZoneEnter),
            event("2026-01-01T12:01:00Z", ZoneState::Safe, EventType::Move),
            event("2026-01-01T12:01:05Z", ZoneState::InDanger, EventType::ZoneEnter),
        ];
        let output = evaluate_rules(&snapshot(FeatureVector::default()), &events);
        assert!(output.triggered_rules.contains(&"R3".to_string()));
    }

    #[test]
    fn test_r4_erratic_movement() {
        let snap = snapshot(FeatureVector {
            zone_transitions: 4.0,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert!(output.triggered_rules.contains(&"R4".to_string()));
        assert!(output.rule_score >= 0.6);
    }

    #[test]
    fn test_r5_extended_danger() {
        let snap = snapshot(FeatureVector {
            max_risk_timer: 130.0,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert!(output.triggered_rules.contains(&"R5".to_string()));
        assert!(output.rule_score >= 0.9);
    }

    #[test]
    fn test_r6_danger_no_exit() {
        let snap = WindowSnapshot {
            features: FeatureVector {
                max_risk_timer: 35.0,
                ..Default::default()
            },
            latest_zone_state: Some(ZoneState::InDanger),
        };
        let events = vec![
            event("2026-01-01T12:00:00Z", ZoneState::InDanger, EventType::Move),
            event("2026-01-01T12:00:30Z", ZoneState::InDanger, EventType::Move),
        ];
        let output = evaluate_rules(&snap, &events);
        assert!(output.triggered_rules.contains(&"R6".to_string()));

        // A ZONE_EXIT event suppresses the rule
        let events = vec![
            event("2026-01-01T12:00:00Z", ZoneState::InDanger, EventType::Move),
            event("2026-01-01T12:00:30Z", ZoneState::Safe, EventType::ZoneExit),
        ];
        let output = evaluate_rules(&snap, &events);
        assert!(!output.triggered_rules.contains(&"R6".to_string()));
    }

    #[test]
    fn test_r6_requires_latest_zone_state() {
        // Without latest_zone_state the rule cannot trigger, whatever the timer
        let snap = snapshot(FeatureVector {
            max_risk_timer: 300.0,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert!(!output.triggered_rules.contains(&"R6".to_string()));
    }

    #[test]
    fn test_multi_rule_boost_caps_at_one() {
        // R1 (0.8) + R2 (1.0) + R4 (0.6) + R5 (0.9): max 1.0 + 0.3, capped
        let snap = snapshot(FeatureVector {
            panic_count: 1.0,
            max_risk_timer: 130.0,
            zone_transitions: 5.0,
            danger_ratio: 0.8,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert_eq!(
            output.triggered_rules,
            vec!["R1", "R2", "R4", "R5"]
        );
        assert_eq!(output.rule_score, 1.0);
        assert_eq!(output.severity, Severity::Critical);
    }

    #[test]
    fn test_triggered_rules_follow_definition_order() {
        // R4 and R5 both fire; order must be table order, not score order
        let snap = snapshot(FeatureVector {
            zone_transitions: 3.0,
            max_risk_timer: 125.0,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert_eq!(output.triggered_rules, vec!["R4", "R5"]);
        // max 0.9 + 0.1 boost
        assert!((output.rule_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rule_score_stays_in_unit_interval() {
        let snap = snapshot(FeatureVector {
            panic_count: 9.0,
            max_risk_timer: 500.0,
            zone_transitions: 50.0,
            danger_ratio: 1.0,
            ..Default::default()
        });
        let output = evaluate_rules(&snap, &[]);
        assert!(output.rule_score >= 0.0 && output.rule_score <= 1.0);
    }
}
