//! Core data types
//!
//! This module defines the records, levels and profiles that flow through the
//! crisis pipeline: raw events → behavior record → {fog, crisis level} →
//! stabilized level → adaptation profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete severity classification of inferred user distress.
///
/// Variants are declared in severity order, so the derived `Ord` is the
/// severity order (`None < Mild < ... < Emergency`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CrisisLevel {
    #[default]
    None,
    Mild,
    Moderate,
    Severe,
    Emergency,
}

impl CrisisLevel {
    /// All levels, least severe first
    pub const ALL: [CrisisLevel; 5] = [
        CrisisLevel::None,
        CrisisLevel::Mild,
        CrisisLevel::Moderate,
        CrisisLevel::Severe,
        CrisisLevel::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrisisLevel::None => "none",
            CrisisLevel::Mild => "mild",
            CrisisLevel::Moderate => "moderate",
            CrisisLevel::Severe => "severe",
            CrisisLevel::Emergency => "emergency",
        }
    }

    /// Whether crisis mode is active at this level
    pub fn is_crisis(&self) -> bool {
        *self != CrisisLevel::None
    }
}

impl fmt::Display for CrisisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CrisisLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrisisLevel::ALL
            .iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown crisis level '{}'", s))
    }
}

/// Three-state read of the fog score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FogBand {
    Clear,
    Foggy,
    Severe,
}

/// Behavioral events delivered by view collaborators.
///
/// Ratings are carried as received so the aggregator can drop out-of-range
/// values instead of the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BehaviorEvent {
    Click,
    NavigationBack,
    RuntimeError,
    ManualRating(i64),
}

/// Rolling behavioral record, owned by the signal aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorRecord {
    /// Clicks in the current burst; decays once per tick
    pub rapid_click_count: u32,
    /// Back-navigations since reset
    pub navigation_reversal_count: u32,
    /// Runtime errors observed since reset
    pub error_event_count: u32,
    /// Seconds elapsed in this epoch (one per tick)
    pub session_duration_seconds: u64,
    /// Last explicit self-report, always within 1..=10
    pub manual_self_report: Option<u8>,
    /// Timestamp of the most recent event
    pub last_activity: DateTime<Utc>,
    /// Clicks since reset, never decayed
    #[serde(default)]
    pub total_clicks: u32,
    /// Incremented on every reset
    #[serde(default)]
    pub epoch: u32,
}

impl BehaviorRecord {
    /// Empty record anchored at `now`
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            rapid_click_count: 0,
            navigation_reversal_count: 0,
            error_event_count: 0,
            session_duration_seconds: 0,
            manual_self_report: None,
            last_activity: now,
            total_clicks: 0,
            epoch: 0,
        }
    }
}

/// Color and contrast treatment requested from the views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContrastAdjustment {
    Standard,
    /// Muted palette, fewer saturated accents
    Softened,
    High,
}

/// How aggressively confirmation dialogs are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    Always,
    DestructiveOnly,
    Suppressed,
}

/// Which optional interface features are visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVisibility {
    pub emergency_contacts: bool,
    pub breathing_prompt: bool,
    pub progress_indicator: bool,
    pub non_essential_content: bool,
}

/// Declarative bundle of interface simplification parameters.
///
/// Never mutated after creation; every stabilized change produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationProfile {
    /// Level this profile was selected for
    pub level: CrisisLevel,
    /// How much to strip the interface down (0-1)
    pub simplification_intensity: f64,
    /// Scale factor for touch targets (>= 1)
    pub touch_target_multiplier: f64,
    pub reduce_motion: bool,
    pub contrast: ContrastAdjustment,
    pub features: FeatureVisibility,
    pub confirmation_policy: ConfirmationPolicy,
    /// Upper bound on primary actions offered at once
    pub max_primary_actions: u8,
}

/// Why a stabilized change happened
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Classified signals moved the level (escalation or step-down)
    Signals {
        raw_level: CrisisLevel,
        fog_score: f64,
    },
    /// Raw level held at none for the full quiet period
    QuietPeriodElapsed,
    /// Explicit "exit crisis mode" from the user
    ManualOverride,
    Reset,
    Shutdown,
}

/// Terminal tag of a crisis session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Resolved,
    Escalated,
    Transferred,
    Ongoing,
}

impl std::str::FromStr for SessionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resolved" => Ok(SessionOutcome::Resolved),
            "escalated" => Ok(SessionOutcome::Escalated),
            "transferred" => Ok(SessionOutcome::Transferred),
            "ongoing" => Ok(SessionOutcome::Ongoing),
            other => Err(format!("unknown session outcome '{}'", other)),
        }
    }
}

/// One stabilized change inside a crisis session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub at: DateTime<Utc>,
    pub trigger: Trigger,
    pub level: CrisisLevel,
    pub profile: AdaptationProfile,
}

/// Periodic re-evaluation sample taken while a session is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressSample {
    pub at: DateTime<Utc>,
    pub raw_level: CrisisLevel,
    pub fog_score: f64,
}

/// User-reported effectiveness of the adaptations (1 = no help, 5 = very helpful)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessReport {
    pub at: DateTime<Utc>,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Audit record of one excursion out of `none`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub entries: Vec<SessionEntry>,
    pub outcome: SessionOutcome,
    /// Most severe stabilized level reached
    pub peak_level: CrisisLevel,
    #[serde(default)]
    pub effectiveness: Vec<EffectivenessReport>,
    #[serde(default)]
    pub samples: Vec<StressSample>,
}

impl CrisisSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Payload delivered to subscribers on every stabilized change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationUpdate {
    pub level: CrisisLevel,
    pub fog_score: f64,
    pub fog_band: FogBand,
    pub profile: AdaptationProfile,
    pub trigger: Trigger,
    pub at: DateTime<Utc>,
}
