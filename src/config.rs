use crate::types::Severity;
use log::warn;
use std::env;
use std::str::FromStr;

/// Service configuration, loaded from environment variables.
///
/// Every key is overridable via an environment variable of the same name in
/// upper case (`ANALYSIS_INTERVAL_SECONDS`, `RULE_WEIGHT`, ...). Supabase
/// credentials have no default: when absent the service starts in degraded
/// mode with no Event Store attached.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Supabase project backing the Event Store
    pub supabase_url: Option<String>,
    /// Service-role key for the Event Store adapter
    pub supabase_service_key: Option<String>,

    /// Seconds between analysis cycles
    pub analysis_interval_seconds: u64,
    /// Minimum events per window (enforced by the aggregation view)
    pub min_events_per_window: usize,
    /// Width of the raw-event lookback when analysing one tourist
    pub feature_window_minutes: i64,

    /// Path of the persisted model bundle
    pub model_path: String,
    /// Weight of the rule score in fusion
    pub rule_weight: f64,
    /// Weight of the ML anomaly score in fusion
    pub ml_weight: f64,
    /// Minimum severity that generates an alert
    pub alert_severity_threshold: Severity,

    /// Bind address of the HTTP surface
    pub host: String,
    /// Bind port of the HTTP surface
    pub port: u16,
    /// Log level filter for the binaries
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            supabase_url: None,
            supabase_service_key: None,
            analysis_interval_seconds: 30,
            min_events_per_window: 3,
            feature_window_minutes: 2,
            model_path: "models/isolation_forest_v1.json".to_string(),
            rule_weight: 0.6,
            ml_weight: 0.4,
            alert_severity_threshold: Severity::Medium,
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            supabase_url: env_opt("SUPABASE_URL"),
            supabase_service_key: env_opt("SUPABASE_SERVICE_KEY"),
            analysis_interval_seconds: env_parse(
                "ANALYSIS_INTERVAL_SECONDS",
                defaults.analysis_interval_seconds,
            ),
            min_events_per_window: env_parse("MIN_EVENTS_PER_WINDOW", defaults.min_events_per_window),
            feature_window_minutes: env_parse(
                "FEATURE_WINDOW_MINUTES",
                defaults.feature_window_minutes,
            ),
            model_path: env_parse("MODEL_PATH", defaults.model_path),
            rule_weight: env_parse("RULE_WEIGHT", defaults.rule_weight),
            ml_weight: env_parse("ML_WEIGHT", defaults.ml_weight),
            alert_severity_threshold: env_parse(
                "ALERT_SEVERITY_THRESHOLD",
                defaults.alert_severity_threshold,
            ),
            host: env_parse("HOST", defaults.host),
            port: env_parse("PORT", defaults.port),
            log_level: env_parse("LOG_LEVEL", defaults.log_level),
        }
    }

    /// True when both Supabase credentials are present
    pub fn has_store_credentials(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_service_key.is_some()
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {key}={raw:?}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.analysis_interval_seconds, 30);
        assert_eq!(config.min_events_per_window, 3);
        assert_eq!(config.feature_window_minutes, 2);
        assert_eq!(config.rule_weight, 0.6);
        assert_eq!(config.ml_weight, 0.4);
        assert_eq!(config.alert_severity_threshold, Severity::Medium);
        assert_eq!(config.port, 8000);
        assert!(!config.has_store_credentials());
    }

    #[test]
    fn test_env_override() {
        env::set_var("ANALYSIS_INTERVAL_SECONDS", "15");
        env::set_var("ALERT_SEVERITY_THRESHOLD", "HIGH");
        let config = Config::from_env();
        assert_eq!(config.analysis_interval_seconds, 15);
        assert_eq!(config.alert_severity_threshold, Severity::High);
        env::remove_var("ANALYSIS_INTERVAL_SECONDS");
        env::remove_var("ALERT_SEVERITY_THRESHOLD");
    }
}
