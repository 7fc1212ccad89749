//! Engine configuration
//!
//! Every heuristic constant the engine uses lives here. None of the defaults
//! are clinically validated; they are tuning values that hosts may override
//! from JSON. Missing fields fall back to the defaults.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Longest accepted quiet period (one hour)
pub const MAX_QUIET_PERIOD_SECS: u64 = 3600;

/// Thresholds for the ordered classification rules.
///
/// Each rule fires when a counter is strictly greater than its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub emergency_rapid_clicks: u32,
    pub emergency_reversals: u32,
    pub severe_rapid_clicks: u32,
    pub severe_reversals: u32,
    pub severe_errors: u32,
    pub moderate_rapid_clicks: u32,
    pub moderate_reversals: u32,
    pub moderate_errors: u32,
    pub mild_rapid_clicks: u32,
    pub mild_errors: u32,
    pub mild_session_seconds: u64,
    /// Self-report at or above this forces at least `emergency`
    pub self_report_emergency: u8,
    /// Self-report at or above this forces at least `severe`
    pub self_report_severe: u8,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            emergency_rapid_clicks: 10,
            emergency_reversals: 8,
            severe_rapid_clicks: 7,
            severe_reversals: 5,
            severe_errors: 5,
            moderate_rapid_clicks: 4,
            moderate_reversals: 3,
            moderate_errors: 3,
            mild_rapid_clicks: 2,
            mild_errors: 1,
            mild_session_seconds: 300,
            self_report_emergency: 8,
            self_report_severe: 6,
        }
    }
}

/// Weights for the cognitive fog estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FogWeights {
    pub error_weight: f64,
    pub rapid_click_weight: f64,
    /// Divisor applied to the weighted sum before saturation
    pub normalizer: f64,
    /// Scores at or above this are `foggy`
    pub foggy_threshold: f64,
    /// Scores at or above this are `severe`
    pub severe_threshold: f64,
}

impl Default for FogWeights {
    fn default() -> Self {
        Self {
            error_weight: 0.2,
            rapid_click_weight: 0.1,
            normalizer: 1.0,
            foggy_threshold: 0.3,
            severe_threshold: 0.7,
        }
    }
}

/// Fog-driven adjustments applied on top of the per-level base profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileTuning {
    /// Touch multiplier grows by `base * gain * fog`
    pub touch_fog_gain: f64,
    pub max_touch_multiplier: f64,
}

impl Default for ProfileTuning {
    fn default() -> Self {
        Self {
            touch_fog_gain: 0.5,
            max_touch_multiplier: 2.0,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub classifier: ClassifierThresholds,
    pub fog: FogWeights,
    pub profile: ProfileTuning,
    /// Rapid clicks removed per tick
    pub click_decay_per_tick: u32,
    /// Host tick cadence in milliseconds
    pub tick_interval_ms: u64,
    /// Seconds the raw level must hold at none before the visible level drops
    pub quiet_period_secs: u64,
    /// Seconds between stress samples recorded into the active session;
    /// converted to ticks with `tick_interval_ms`
    pub reevaluation_interval_secs: u64,
    /// Closed sessions kept in memory by the recorder
    pub session_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierThresholds::default(),
            fog: FogWeights::default(),
            profile: ProfileTuning::default(),
            click_decay_per_tick: 1,
            tick_interval_ms: 1000,
            quiet_period_secs: 5,
            reevaluation_interval_secs: 10,
            session_history_limit: 50,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Ticks between stress samples at the configured cadence (at least one)
    pub fn reevaluation_ticks(&self) -> u64 {
        let interval_ms = self.reevaluation_interval_secs.saturating_mul(1000);
        (interval_ms / self.tick_interval_ms.max(1)).max(1)
    }

    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations that would break monotonicity or timing
    pub fn validate(&self) -> Result<(), EngineError> {
        let c = &self.classifier;
        if !(c.emergency_rapid_clicks >= c.severe_rapid_clicks
            && c.severe_rapid_clicks >= c.moderate_rapid_clicks
            && c.moderate_rapid_clicks >= c.mild_rapid_clicks)
        {
            return Err(EngineError::InvalidConfig(
                "rapid click thresholds must not increase as severity decreases".to_string(),
            ));
        }
        if !(c.emergency_reversals >= c.severe_reversals
            && c.severe_reversals >= c.moderate_reversals)
        {
            return Err(EngineError::InvalidConfig(
                "reversal thresholds must not increase as severity decreases".to_string(),
            ));
        }
        if !(c.severe_errors >= c.moderate_errors && c.moderate_errors >= c.mild_errors) {
            return Err(EngineError::InvalidConfig(
                "error thresholds must not increase as severity decreases".to_string(),
            ));
        }
        for (name, value) in [
            ("self_report_emergency", c.self_report_emergency),
            ("self_report_severe", c.self_report_severe),
        ] {
            if !(1..=10).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be within 1..=10, got {}",
                    name, value
                )));
            }
        }

        let f = &self.fog;
        if f.error_weight < 0.0 || f.rapid_click_weight < 0.0 {
            return Err(EngineError::InvalidConfig(
                "fog weights must be non-negative".to_string(),
            ));
        }
        if !(f.normalizer.is_finite() && f.normalizer > 0.0) {
            return Err(EngineError::InvalidConfig(
                "fog normalizer must be positive".to_string(),
            ));
        }
        if !(0.0 < f.foggy_threshold
            && f.foggy_threshold <= f.severe_threshold
            && f.severe_threshold <= 1.0)
        {
            return Err(EngineError::InvalidConfig(
                "fog band thresholds must satisfy 0 < foggy <= severe <= 1".to_string(),
            ));
        }

        let p = &self.profile;
        if p.touch_fog_gain < 0.0 || p.max_touch_multiplier < 1.0 {
            return Err(EngineError::InvalidConfig(
                "touch_fog_gain must be >= 0 and max_touch_multiplier >= 1".to_string(),
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.quiet_period_secs > MAX_QUIET_PERIOD_SECS {
            return Err(EngineError::InvalidConfig(format!(
                "quiet_period_secs must be at most {}",
                MAX_QUIET_PERIOD_SECS
            )));
        }
        if self.reevaluation_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "reevaluation_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"quiet_period_secs": 8, "fog": {"error_weight": 0.3}}"#)
            .unwrap();
        assert_eq!(config.quiet_period_secs, 8);
        assert_eq!(config.fog.error_weight, 0.3);
        assert_eq!(config.fog.rapid_click_weight, 0.1);
        assert_eq!(config.classifier, ClassifierThresholds::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let json = r#"{"classifier": {"severe_rapid_clicks": 12}}"#;
        let err = EngineConfig::from_json(json).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_bad_fog_settings() {
        assert!(EngineConfig::from_json(r#"{"fog": {"normalizer": 0.0}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"fog": {"error_weight": -1.0}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"fog": {"foggy_threshold": 0.8}}"#).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_self_report_threshold() {
        let json = r#"{"classifier": {"self_report_severe": 11}}"#;
        assert!(EngineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_reevaluation_ticks_follow_tick_cadence() {
        assert_eq!(EngineConfig::default().reevaluation_ticks(), 10);

        let fast = EngineConfig {
            tick_interval_ms: 500,
            ..EngineConfig::default()
        };
        assert_eq!(fast.reevaluation_ticks(), 20);

        let slow = EngineConfig {
            tick_interval_ms: 60_000,
            ..EngineConfig::default()
        };
        assert_eq!(slow.reevaluation_ticks(), 1);
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = EngineConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, EngineError::JsonError(_)));
    }
}
