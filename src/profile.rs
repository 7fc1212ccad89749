//! Adaptation profile selection
//!
//! Maps a stabilized crisis level and a fog score to the profile the views
//! render with. The mapping is a pure function of its inputs.
//!
//! - Level decides the base profile: simplification, motion, contrast and
//!   which safety features are visible. Emergency contacts and breathing
//!   prompts are gated by level only, never by fog.
//! - Fog scales touch targets and relaxes confirmation dialogs, independent
//!   of level: a user can be foggy without being in crisis, and vice versa.

use crate::config::{FogWeights, ProfileTuning};
use crate::fog::FogEstimator;
use crate::types::{
    AdaptationProfile, ConfirmationPolicy, ContrastAdjustment, CrisisLevel, FeatureVisibility,
    FogBand,
};

/// Level-dependent part of a profile
struct LevelBase {
    simplification_intensity: f64,
    touch_target_multiplier: f64,
    reduce_motion: bool,
    contrast: ContrastAdjustment,
    features: FeatureVisibility,
    max_primary_actions: u8,
}

fn level_base(level: CrisisLevel) -> LevelBase {
    match level {
        CrisisLevel::None => LevelBase {
            simplification_intensity: 0.0,
            touch_target_multiplier: 1.0,
            reduce_motion: false,
            contrast: ContrastAdjustment::Standard,
            features: FeatureVisibility {
                emergency_contacts: false,
                breathing_prompt: false,
                progress_indicator: true,
                non_essential_content: true,
            },
            max_primary_actions: 6,
        },
        CrisisLevel::Mild => LevelBase {
            simplification_intensity: 0.2,
            touch_target_multiplier: 1.1,
            reduce_motion: false,
            contrast: ContrastAdjustment::Standard,
            features: FeatureVisibility {
                emergency_contacts: false,
                breathing_prompt: false,
                progress_indicator: true,
                non_essential_content: true,
            },
            max_primary_actions: 5,
        },
        CrisisLevel::Moderate => LevelBase {
            simplification_intensity: 0.45,
            touch_target_multiplier: 1.25,
            reduce_motion: true,
            contrast: ContrastAdjustment::Softened,
            features: FeatureVisibility {
                emergency_contacts: false,
                breathing_prompt: true,
                progress_indicator: true,
                non_essential_content: false,
            },
            max_primary_actions: 4,
        },
        CrisisLevel::Severe => LevelBase {
            simplification_intensity: 0.65,
            touch_target_multiplier: 1.4,
            reduce_motion: true,
            contrast: ContrastAdjustment::Softened,
            features: FeatureVisibility {
                emergency_contacts: true,
                breathing_prompt: true,
                progress_indicator: false,
                non_essential_content: false,
            },
            max_primary_actions: 3,
        },
        CrisisLevel::Emergency => LevelBase {
            simplification_intensity: 0.9,
            touch_target_multiplier: 1.6,
            reduce_motion: true,
            contrast: ContrastAdjustment::High,
            features: FeatureVisibility {
                emergency_contacts: true,
                breathing_prompt: true,
                progress_indicator: false,
                non_essential_content: false,
            },
            max_primary_actions: 2,
        },
    }
}

/// Pure (level, fog) → profile mapping
#[derive(Debug, Clone)]
pub struct ProfileSelector {
    tuning: ProfileTuning,
    bands: FogEstimator,
}

impl Default for ProfileSelector {
    fn default() -> Self {
        Self::new(ProfileTuning::default(), FogWeights::default())
    }
}

impl ProfileSelector {
    pub fn new(tuning: ProfileTuning, fog_weights: FogWeights) -> Self {
        Self {
            tuning,
            bands: FogEstimator::new(fog_weights),
        }
    }

    /// Profile for a stabilized level and fog score
    pub fn select(&self, level: CrisisLevel, fog_score: f64) -> AdaptationProfile {
        let fog = if fog_score.is_nan() {
            0.0
        } else {
            fog_score.clamp(0.0, 1.0)
        };
        let base = level_base(level);

        AdaptationProfile {
            level,
            simplification_intensity: base.simplification_intensity,
            touch_target_multiplier: self.touch_target_multiplier(base.touch_target_multiplier, fog),
            reduce_motion: base.reduce_motion,
            contrast: base.contrast,
            features: base.features,
            confirmation_policy: confirmation_policy(self.bands.band(fog)),
            max_primary_actions: base.max_primary_actions,
        }
    }

    /// Profile shown before any signal has been classified
    pub fn neutral(&self) -> AdaptationProfile {
        self.select(CrisisLevel::None, 0.0)
    }

    fn touch_target_multiplier(&self, base: f64, fog: f64) -> f64 {
        let gain = self.tuning.touch_fog_gain.max(0.0);
        let cap = self.tuning.max_touch_multiplier.max(base);
        let scaled = (base * (1.0 + gain * fog)).min(cap);
        // Two decimals keep equal inputs producing byte-identical output
        (scaled * 100.0).round() / 100.0
    }
}

fn confirmation_policy(band: FogBand) -> ConfirmationPolicy {
    match band {
        FogBand::Clear => ConfirmationPolicy::Always,
        FogBand::Foggy => ConfirmationPolicy::DestructiveOnly,
        FogBand::Severe => ConfirmationPolicy::Suppressed,
    }
}
