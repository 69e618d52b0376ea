//! Hybrid fusion of the rule score and the ML anomaly score.
//!
//! Rules dominate (weight 0.6) because they encode high-confidence domain
//! knowledge; the model (weight 0.4) catches deviations rules cannot
//! express. Concordance between the two systems adjusts the fused score:
//! agreement on danger earns a bonus, an ML-only signal is dampened to keep
//! model noise from paging operators.

use crate::types::Severity;
use log::info;
use serde::{Deserialize, Serialize};

/// Agreement pattern between the rule engine and the anomaly scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Concordance {
    /// Both systems flag danger
    AgreeHigh,
    /// Both systems consider the window normal
    AgreeLow,
    /// Only the rules fire
    RuleOnly,
    /// Only the model fires
    MlOnly,
    /// Anything in between
    Conflict,
}

/// Output of the hybrid fusion step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    /// Fused score in `[0, 1]`
    pub hybrid_score: f64,
    /// Severity classification of the fused score
    pub severity: Severity,
    /// Input rule score, echoed for auditability
    pub rule_score: f64,
    /// Input anomaly score, echoed for auditability
    pub anomaly_score: f64,
    /// Agreement pattern the adjustment was based on
    pub concordance: Concordance,
    /// Whether the severity meets the configured alert threshold
    pub should_alert: bool,
}

/// Combine rule and ML scores into a hybrid severity assessment.
///
/// Weighted sum, concordance adjustment (`AGREE_HIGH` +0.1 capped at 1,
/// `ML_ONLY` ×0.7), clamp to `[0, 1]`, then classify and decide whether the
/// result meets `alert_threshold`.
pub fn compute_hybrid_score(
    rule_score: f64,
    anomaly_score: f64,
    rule_weight: f64,
    ml_weight: f64,
    alert_threshold: Severity,
) -> FusionResult {
    let mut hybrid = rule_weight * rule_score + ml_weight * anomaly_score;

    let concordance = determine_concordance(rule_score, anomaly_score);
    match concordance {
        Concordance::AgreeHigh => hybrid = (hybrid + 0.1).min(1.0),
        Concordance::MlOnly => hybrid *= 0.7,
        _ => {}
    }

    let hybrid = hybrid.clamp(0.0, 1.0);
    let severity = Severity::classify(hybrid);
    let should_alert = severity.meets(alert_threshold);

    info!(
        "Fusion: rule={rule_score:.2} ml={anomaly_score:.2} hybrid={hybrid:.2} \
         severity={severity} concordance={concordance:?} alert={should_alert}"
    );

    FusionResult {
        hybrid_score: hybrid,
        severity,
        rule_score,
        anomaly_score,
        concordance,
        should_alert,
    }
}

/// Classify the agreement pattern between the two systems.
///
/// First match wins:
///
/// | Rule   | ML     | Label      |
/// |--------|--------|------------|
/// | > 0.5  | > 0.5  | AGREE_HIGH |
/// | < 0.2  | < 0.3  | AGREE_LOW  |
/// | > 0.5  | < 0.3  | RULE_ONLY  |
/// | < 0.2  | > 0.7  | ML_ONLY    |
/// | other  | other  | CONFLICT   |
fn determine_concordance(rule_score: f64, anomaly_score: f64) -> Concordance {
    if rule_score > 0.5 && anomaly_score > 0.5 {
        Concordance::AgreeHigh
    } else if rule_score < 0.2 && anomaly_score < 0.3 {
        Concordance::AgreeLow
    } else if rule_score > 0.5 && anomaly_score < 0.3 {
        Concordance::RuleOnly
    } else if rule_score < 0.2 && anomaly_score > 0.7 {
        Concordance::MlOnly
    } else {
        Concordance::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_quiet() {
        let result = compute_hybrid_score(0.0, 0.0, 0.6, 0.4, Severity::Medium);
        assert_eq!(result.hybrid_score, 0.0);
        assert_eq!(result.concordance, Concordance::AgreeLow);
        assert_eq!(result.severity, Severity::Low);
        assert!(!result.should_alert);
    }

    #[test]
    fn test_rule_only_panic() {
        // rule=1.0, ml=0.0 → 0.6, RULE_ONLY, no adjustment
        let result = compute_hybrid_score(1.0, 0.0, 0.6, 0.4, Severity::Medium);
        assert!((result.hybrid_score - 0.6).abs() < 1e-9);
        assert_eq!(result.concordance, Concordance::RuleOnly);
        assert_eq!(result.severity, Severity::High);
        assert!(result.should_alert);
    }

    #[test]
    fn test_agree_high_bonus() {
        // base 0.7, +0.1 bonus → 0.8 CRITICAL
        let result = compute_hybrid_score(0.7, 0.7, 0.6, 0.4, Severity::Medium);
        assert!((result.hybrid_score - 0.8).abs() < 1e-9);
        assert_eq!(result.concordance, Concordance::AgreeHigh);
        assert_eq!(result.severity, Severity::Critical);
        assert!(result.should_alert);
    }

    #[test]
    fn test_ml_only_dampening() {
        // base 0.42, ×0.7 → 0.294 LOW
        let result = compute_hybrid_score(0.1, 0.9, 0.6, 0.4, Severity::Medium);
        assert!((result.hybrid_score - 0.294).abs() < 1e-9);
        assert_eq!(result.concordance, Concordance::MlOnly);
        assert_eq!(result.severity, Severity::Low);
        assert!(!result.should_alert);
    }

    #[test]
    fn test_conflict_unadjusted() {
        let result = compute_hybrid_score(0.4, 0.4, 0.6, 0.4, Severity::Medium);
        assert_eq!(result.concordance, Concordance::Conflict);
        assert!((result.hybrid_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_agree_high_bonus_caps_at_one() {
        let result = compute_hybrid_score(1.0, 1.0, 0.6, 0.4, Severity::Medium);
        assert_eq!(result.hybrid_score, 1.0);
    }

    #[test]
    fn test_hybrid_score_stays_in_unit_interval() {
        for &(r, m) in &[(0.0, 0.0), (1.0, 1.0), (0.19, 0.71), (0.51, 0.29), (0.5, 0.5)] {
            let result = compute_hybrid_score(r, m, 0.6, 0.4, Severity::Medium);
            assert!(result.hybrid_score >= 0.0 && result.hybrid_score <= 1.0);
        }
    }

    #[test]
    fn test_should_alert_monotone_in_severity() {
        // For a fixed threshold, a higher-severity result never alerts less
        let low = compute_hybrid_score(0.1, 0.0, 0.6, 0.4, Severity::Medium);
        let medium = compute_hybrid_score(0.6, 0.0, 0.6, 0.4, Severity::Medium);
        let critical = compute_hybrid_score(1.0, 1.0, 0.6, 0.4, Severity::Medium);
        assert!(!low.should_alert);
        assert!(medium.should_alert);
        assert!(critical.should_alert);
    }

    #[test]
    fn test_threshold_gates_alerting() {
        let result = compute_hybrid_score(1.0, 0.0, 0.6, 0.4, Severity::Critical);
        assert_eq!(result.severity, Severity::High);
        assert!(!result.should_alert);

        let result = compute_hybrid_score(1.0, 0.0, 0.6, 0.4, Severity::Low);
        assert!(result.should_alert);
    }

    #[test]
    fn test_concordance_ladder_first_match() {
        assert_eq!(determine_concordance(0.6, 0.6), Concordance::AgreeHigh);
        assert_eq!(determine_concordance(0.1, 0.1), Concordance::AgreeLow);
        assert_eq!(determine_concordance(0.6, 0.1), Concordance::RuleOnly);
        assert_eq!(determine_concordance(0.1, 0.8), Concordance::MlOnly);
        assert_eq!(determine_concordance(0.3, 0.5), Concordance::Conflict);
        assert_eq!(determine_concordance(0.1, 0.5), Concordance::Conflict);
    }
}
