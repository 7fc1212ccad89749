//! Cognitive fog estimation
//!
//! Derives a continuous load score from the behavior record. The score is a
//! weighted, saturating sum of error count and rapid-click count:
//!
//! ```text
//! fog = min(1, (error_weight * errors + rapid_click_weight * rapid_clicks) / normalizer)
//! ```
//!
//! With non-negative weights the score never decreases when either input
//! grows, and it saturates at 1 instead of diverging.

use crate::config::FogWeights;
use crate::types::{BehaviorRecord, FogBand};

/// Stateless fog estimator
#[derive(Debug, Clone)]
pub struct FogEstimator {
    weights: FogWeights,
}

impl Default for FogEstimator {
    fn default() -> Self {
        Self::new(FogWeights::default())
    }
}

impl FogEstimator {
    pub fn new(weights: FogWeights) -> Self {
        Self { weights }
    }

    /// Fog score in [0, 1] for the current record
    pub fn estimate(&self, record: &BehaviorRecord) -> f64 {
        let w = &self.weights;
        let raw = w.error_weight.max(0.0) * record.error_event_count as f64
            + w.rapid_click_weight.max(0.0) * record.rapid_click_count as f64;
        let normalizer = if w.normalizer > 0.0 { w.normalizer } else { 1.0 };
        let score = raw / normalizer;
        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, 1.0)
    }

    /// Band for a score
    pub fn band(&self, score: f64) -> FogBand {
        if score >= self.weights.severe_threshold {
            FogBand::Severe
        } else if score >= self.weights.foggy_threshold {
            FogBand::Foggy
        } else {
            FogBand::Clear
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(errors: u32, clicks: u32) -> BehaviorRecord {
        BehaviorRecord {
            error_event_count: errors,
            rapid_click_count: clicks,
            ..BehaviorRecord::empty(Utc::now())
        }
    }

    #[test]
    fn test_empty_record_is_clear() {
        let estimator = FogEstimator::default();
        let score = estimator.estimate(&record(0, 0));
        assert_eq!(score, 0.0);
        assert_eq!(estimator.band(score), FogBand::Clear);
    }

    #[test]
    fn test_weighted_sum() {
        let estimator = FogEstimator::default();
        // 0.2 * 1 + 0.1 * 2
        assert!((estimator.estimate(&record(1, 2)) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_saturates() {
        let estimator = FogEstimator::default();
        assert_eq!(estimator.estimate(&record(50, 200)), 1.0);
        assert_eq!(estimator.estimate(&record(u32::MAX, u32::MAX)), 1.0);
    }

    #[test]
    fn test_monotonic_in_each_input() {
        let estimator = FogEstimator::default();
        for base in 0..12 {
            for other in 0..12 {
                let e0 = estimator.estimate(&record(base, other));
                let e1 = estimator.estimate(&record(base + 1, other));
                assert!(e1 >= e0, "errors {} -> {} decreased fog", base, base + 1);

                let c0 = estimator.estimate(&record(other, base));
                let c1 = estimator.estimate(&record(other, base + 1));
                assert!(c1 >= c0, "clicks {} -> {} decreased fog", base, base + 1);
            }
        }
    }

    #[test]
    fn test_bands() {
        let estimator = FogEstimator::default();
        assert_eq!(estimator.band(0.29), FogBand::Clear);
        assert_eq!(estimator.band(0.3), FogBand::Foggy);
        assert_eq!(estimator.band(0.69), FogBand::Foggy);
        assert_eq!(estimator.band(0.7), FogBand::Severe);
        assert_eq!(estimator.band(1.0), FogBand::Severe);
    }

    #[test]
    fn test_hostile_weights_are_clamped() {
        let estimator = FogEstimator::new(FogWeights {
            error_weight: -5.0,
            rapid_click_weight: 0.1,
            normalizer: 0.0,
            ..FogWeights::default()
        });
        let score = estimator.estimate(&record(10, 3));
        assert!((0.0..=1.0).contains(&score));
    }
}
