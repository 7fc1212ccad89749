//! Crisis level classification
//!
//! Rules are evaluated from most to least severe and the first match wins;
//! there is no cumulative scoring across rules. A manual self-report can
//! only raise the result: explicit reports of distress are trusted over
//! calm-looking signals, but a report of feeling fine never hides dangerous
//! signals.

use crate::config::ClassifierThresholds;
use crate::types::{BehaviorRecord, CrisisLevel};

/// Stateless rule-based classifier
#[derive(Debug, Clone)]
pub struct CrisisClassifier {
    thresholds: ClassifierThresholds,
}

impl Default for CrisisClassifier {
    fn default() -> Self {
        Self::new(ClassifierThresholds::default())
    }
}

impl CrisisClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    /// Classify the current record
    pub fn classify(&self, record: &BehaviorRecord) -> CrisisLevel {
        let signal_level = self.classify_signals(record);
        match record.manual_self_report {
            Some(report) => signal_level.max(self.self_report_floor(report)),
            None => signal_level,
        }
    }

    /// Level from objective signals only
    pub fn classify_signals(&self, record: &BehaviorRecord) -> CrisisLevel {
        let t = &self.thresholds;
        let clicks = record.rapid_click_count;
        let reversals = record.navigation_reversal_count;
        let errors = record.error_event_count;

        if clicks > t.emergency_rapid_clicks || reversals > t.emergency_reversals {
            CrisisLevel::Emergency
        } else if clicks > t.severe_rapid_clicks
            || reversals > t.severe_reversals
            || errors > t.severe_errors
        {
            CrisisLevel::Severe
        } else if clicks > t.moderate_rapid_clicks
            || reversals > t.moderate_reversals
            || errors > t.moderate_errors
        {
            CrisisLevel::Moderate
        } else if clicks > t.mild_rapid_clicks
            || errors > t.mild_errors
            || record.session_duration_seconds > t.mild_session_seconds
        {
            CrisisLevel::Mild
        } else {
            CrisisLevel::None
        }
    }

    /// Minimum level implied by a self-report
    fn self_report_floor(&self, report: u8) -> CrisisLevel {
        let report = report.clamp(1, 10);
        if report >= self.thresholds.self_report_emergency {
            CrisisLevel::Emergency
        } else if report >= self.thresholds.self_report_severe {
            CrisisLevel::Severe
        } else {
            CrisisLevel::None
        }
    }
}
