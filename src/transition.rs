//! Transition control (hysteresis)
//!
//! Governs when a classified level becomes visible:
//!
//! ```text
//!            raw > stabilized: immediate
//!   None ─────────────────────────────> Mild/Moderate/Severe/Emergency
//!    ^                                         │  raw lower but not none:
//!    │   raw == none held for quiet period     │  immediate step-down
//!    └──────────── (or manual override) ───────┘
//! ```
//!
//! Escalations are never delayed. Only the return to `none` waits for the
//! quiet period; the wait is a pending deadline that any non-`none`
//! observation or manual override cancels. The controller never produces a
//! level it was not given.

use crate::config::MAX_QUIET_PERIOD_SECS;
use crate::types::CrisisLevel;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What an observation did to the stabilized level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionKind {
    Unchanged,
    Escalated,
    /// Lowered to a less severe crisis level (not none)
    SteppedDown,
    /// Raw level held at none long enough; crisis mode ended
    QuietPeriodElapsed,
    /// Raw level is none but the quiet period is still running
    Holding { until: DateTime<Utc> },
    /// Manual override forced none
    Overridden,
}

/// Result of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: CrisisLevel,
    /// Stabilized level after the observation
    pub to: CrisisLevel,
    pub kind: TransitionKind,
}

impl Transition {
    /// Whether the visible level changed
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Debounces raw classifier output into a stabilized level
#[derive(Debug, Clone)]
pub struct TransitionController {
    stabilized: CrisisLevel,
    pending_deadline: Option<DateTime<Utc>>,
    quiet_period: Duration,
}

impl TransitionController {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            stabilized: CrisisLevel::None,
            pending_deadline: None,
            quiet_period: quiet_period.max(Duration::zero()),
        }
    }

    /// Quiet period in whole seconds, capped at [`MAX_QUIET_PERIOD_SECS`]
    pub fn from_secs(quiet_period_secs: u64) -> Self {
        Self::new(Duration::seconds(
            quiet_period_secs.min(MAX_QUIET_PERIOD_SECS) as i64,
        ))
    }

    pub fn stabilized(&self) -> CrisisLevel {
        self.stabilized
    }

    /// When a pending return to none will take effect, if one is scheduled
    pub fn pending_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending_deadline
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Feed one raw classification
    pub fn observe(&mut self, raw: CrisisLevel, now: DateTime<Utc>) -> Transition {
        let from = self.stabilized;

        let kind = if raw > from {
            self.pending_deadline = None;
            self.stabilized = raw;
            TransitionKind::Escalated
        } else if raw == CrisisLevel::None && from != CrisisLevel::None {
            let quiet_period = self.quiet_period;
            let deadline = *self.pending_deadline.get_or_insert_with(|| {
                now.checked_add_signed(quiet_period)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            });
            if now >= deadline {
                self.pending_deadline = None;
                self.stabilized = CrisisLevel::None;
                TransitionKind::QuietPeriodElapsed
            } else {
                TransitionKind::Holding { until: deadline }
            }
        } else {
            self.pending_deadline = None;
            if raw < from {
                self.stabilized = raw;
                TransitionKind::SteppedDown
            } else {
                TransitionKind::Unchanged
            }
        };

        Transition {
            from,
            to: self.stabilized,
            kind,
        }
    }

    /// Force none immediately and cancel any pending deadline
    pub fn override_to_none(&mut self) -> Transition {
        let from = self.stabilized;
        self.stabilized = CrisisLevel::None;
        self.pending_deadline = None;
        Transition {
            from,
            to: CrisisLevel::None,
            kind: TransitionKind::Overridden,
        }
    }

    /// Back to the initial state
    pub fn reset(&mut self) {
        self.stabilized = CrisisLevel::None;
        self.pending_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn controller() -> TransitionController {
        TransitionController::from_secs(5)
    }

    #[test]
    fn test_initial_state_is_none() {
        let c = controller();
        assert_eq!(c.stabilized(), CrisisLevel::None);
        assert_eq!(c.pending_deadline(), None);
    }

    #[test]
    fn test_escalation_is_immediate() {
        let mut c = controller();
        let tr = c.observe(CrisisLevel::Severe, t(0));
        assert_eq!(tr.kind, TransitionKind::Escalated);
        assert_eq!(tr.to, CrisisLevel::Severe);

        let tr = c.observe(CrisisLevel::Emergency, t(1));
        assert_eq!(tr.kind, TransitionKind::Escalated);
        assert_eq!(c.stabilized(), CrisisLevel::Emergency);
    }

    #[test]
    fn test_return_to_none_waits_for_quiet_period() {
        let mut c = controller();
        c.observe(CrisisLevel::Moderate, t(0));

        for s in 1..6 {
            let tr = c.observe(CrisisLevel::None, t(s));
            assert_eq!(tr.to, CrisisLevel::Moderate, "dropped early at t={}", s);
            assert_eq!(tr.kind, TransitionKind::Holding { until: t(6) });
        }

        let tr = c.observe(CrisisLevel::None, t(6));
        assert_eq!(tr.kind, TransitionKind::QuietPeriodElapsed);
        assert_eq!(tr.to, CrisisLevel::None);
        assert_eq!(c.pending_deadline(), None);
    }

    #[test]
    fn test_dip_then_spike_never_touches_none() {
        let mut c = controller();
        c.observe(CrisisLevel::Severe, t(0));

        for s in 1..=4 {
            assert_eq!(c.observe(CrisisLevel::None, t(s)).to, CrisisLevel::Severe);
        }

        let tr = c.observe(CrisisLevel::Moderate, t(5));
        assert_eq!(tr.to, CrisisLevel::Moderate);
        assert_eq!(c.pending_deadline(), None);

        // A fresh dip starts a full new quiet period
        assert_eq!(c.observe(CrisisLevel::None, t(6)).to, CrisisLevel::Moderate);
        assert_eq!(c.pending_deadline(), Some(t(11)));
        assert_eq!(c.observe(CrisisLevel::None, t(10)).to, CrisisLevel::Moderate);
        assert_eq!(c.observe(CrisisLevel::None, t(11)).to, CrisisLevel::None);
    }

    #[test]
    fn test_escalation_cancels_pending_deadline() {
        let mut c = controller();
        c.observe(CrisisLevel::Mild, t(0));
        c.observe(CrisisLevel::None, t(1));
        assert!(c.pending_deadline().is_some());

        let tr = c.observe(CrisisLevel::Emergency, t(2));
        assert_eq!(tr.kind, TransitionKind::Escalated);
        assert_eq!(c.pending_deadline(), None);
    }

    #[test]
    fn test_step_down_between_crisis_levels_is_immediate() {
        let mut c = controller();
        c.observe(CrisisLevel::Emergency, t(0));
        let tr = c.observe(CrisisLevel::Mild, t(1));
        assert_eq!(tr.kind, TransitionKind::SteppedDown);
        assert_eq!(tr.to, CrisisLevel::Mild);
    }

    #[test]
    fn test_manual_override() {
        let mut c = controller();
        c.observe(CrisisLevel::Emergency, t(0));
        c.observe(CrisisLevel::None, t(1));

        let tr = c.override_to_none();
        assert_eq!(tr.kind, TransitionKind::Overridden);
        assert_eq!(tr.from, CrisisLevel::Emergency);
        assert_eq!(c.stabilized(), CrisisLevel::None);
        assert_eq!(c.pending_deadline(), None);

        // Signals that still warrant a crisis re-escalate on the next observation
        let tr = c.observe(CrisisLevel::Emergency, t(2));
        assert_eq!(tr.kind, TransitionKind::Escalated);
    }

    #[test]
    fn test_zero_quiet_period_drops_immediately() {
        let mut c = TransitionController::from_secs(0);
        c.observe(CrisisLevel::Severe, t(0));
        assert_eq!(c.observe(CrisisLevel::None, t(1)).to, CrisisLevel::None);
    }

    #[test]
    fn test_unchanged_at_none() {
        let mut c = controller();
        let tr = c.observe(CrisisLevel::None, t(0));
        assert_eq!(tr.kind, TransitionKind::Unchanged);
        assert!(!tr.changed());
    }
}
