//! Signal aggregation
//!
//! Folds raw behavioral events into the rolling [`BehaviorRecord`]. Input is
//! best-effort telemetry: anything malformed is dropped, never returned as
//! an error.

use crate::schema::parse_event;
use crate::types::{BehaviorEvent, BehaviorRecord};
use chrono::{DateTime, Utc};

/// Valid range for manual self-reports
const SELF_REPORT_RANGE: std::ops::RangeInclusive<i64> = 1..=10;

/// Sole owner of the behavior record
#[derive(Debug, Clone)]
pub struct SignalAggregator {
    record: BehaviorRecord,
    click_decay_per_tick: u32,
}

impl SignalAggregator {
    pub fn new(click_decay_per_tick: u32, now: DateTime<Utc>) -> Self {
        Self {
            record: BehaviorRecord::empty(now),
            click_decay_per_tick,
        }
    }

    /// Current record
    pub fn record(&self) -> &BehaviorRecord {
        &self.record
    }

    /// Apply one event to the running counters
    pub fn record_event(&mut self, event: BehaviorEvent, at: DateTime<Utc>) {
        let record = &mut self.record;
        if at > record.last_activity {
            record.last_activity = at;
        }
        match event {
            BehaviorEvent::Click => {
                record.rapid_click_count = record.rapid_click_count.saturating_add(1);
                record.total_clicks = record.total_clicks.saturating_add(1);
            }
            BehaviorEvent::NavigationBack => {
                record.navigation_reversal_count =
                    record.navigation_reversal_count.saturating_add(1);
            }
            BehaviorEvent::RuntimeError => {
                record.error_event_count = record.error_event_count.saturating_add(1);
            }
            BehaviorEvent::ManualRating(value) => {
                if !SELF_REPORT_RANGE.contains(&value) {
                    tracing::debug!(value, "ignoring out-of-range self-report");
                    return;
                }
                record.manual_self_report = Some(value as u8);
            }
        }
    }

    /// Parse a JSON event and apply it; returns whether it was accepted.
    ///
    /// An event timestamp, when present, replaces `at`.
    pub fn record_json(&mut self, json: &str, at: DateTime<Utc>) -> bool {
        match parse_event(json) {
            Some(envelope) => match envelope.behavior_event() {
                Some(event) => {
                    self.record_event(event, envelope.timestamp.unwrap_or(at));
                    true
                }
                None => {
                    tracing::debug!(kind = ?envelope.kind, "event kind is not a behavior signal");
                    false
                }
            },
            None => false,
        }
    }

    /// Time-based effects: one second of session time and click cool-off
    pub fn tick(&mut self) {
        self.advance_session();
        self.decay_clicks();
    }

    /// Count one second of session time
    pub fn advance_session(&mut self) {
        let record = &mut self.record;
        record.session_duration_seconds = record.session_duration_seconds.saturating_add(1);
    }

    /// Cool off the current click burst.
    ///
    /// The engine applies this after classifying, so a burst is judged at
    /// its full size before it starts to decay.
    pub fn decay_clicks(&mut self) {
        self.record.rapid_click_count = self
            .record
            .rapid_click_count
            .saturating_sub(self.click_decay_per_tick);
    }

    /// Zero every counter and start a new epoch
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let epoch = self.record.epoch.wrapping_add(1);
        self.record = BehaviorRecord::empty(now);
        self.record.epoch = epoch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_events_update_counters() {
        let mut agg = SignalAggregator::new(1, t0());
        agg.record_event(BehaviorEvent::Click, t0());
        agg.record_event(BehaviorEvent::Click, t0());
        agg.record_event(BehaviorEvent::NavigationBack, t0());
        agg.record_event(BehaviorEvent::RuntimeError, t0() + Duration::seconds(2));

        let record = agg.record();
        assert_eq!(record.rapid_click_count, 2);
        assert_eq!(record.total_clicks, 2);
        assert_eq!(record.navigation_reversal_count, 1);
        assert_eq!(record.error_event_count, 1);
        assert_eq!(record.last_activity, t0() + Duration::seconds(2));
    }

    #[test]
    fn test_tick_decays_clicks_and_counts_time() {
        let mut agg = SignalAggregator::new(1, t0());
        for _ in 0..3 {
            agg.record_event(BehaviorEvent::Click, t0());
        }
        agg.record_event(BehaviorEvent::RuntimeError, t0());

        for _ in 0..5 {
            agg.tick();
        }

        let record = agg.record();
        assert_eq!(record.rapid_click_count, 0);
        assert_eq!(record.total_clicks, 3);
        assert_eq!(record.error_event_count, 1);
        assert_eq!(record.session_duration_seconds, 5);
    }

    #[test]
    fn test_self_report_range() {
        let mut agg = SignalAggregator::new(1, t0());
        agg.record_event(BehaviorEvent::ManualRating(7), t0());
        assert_eq!(agg.record().manual_self_report, Some(7));

        agg.record_event(BehaviorEvent::ManualRating(0), t0());
        agg.record_event(BehaviorEvent::ManualRating(11), t0());
        agg.record_event(BehaviorEvent::ManualRating(-4), t0());
        assert_eq!(agg.record().manual_self_report, Some(7));

        agg.record_event(BehaviorEvent::ManualRating(2), t0());
        assert_eq!(agg.record().manual_self_report, Some(2));
    }

    #[test]
    fn test_ignored_rating_still_counts_as_activity() {
        let mut agg = SignalAggregator::new(1, t0());
        let later = t0() + Duration::seconds(12);
        agg.record_event(BehaviorEvent::ManualRating(42), later);

        assert_eq!(agg.record().manual_self_report, None);
        assert_eq!(agg.record().last_activity, later);
    }

    #[test]
    fn test_split_tick_matches_full_tick() {
        let mut split = SignalAggregator::new(2, t0());
        let mut full = SignalAggregator::new(2, t0());
        for _ in 0..5 {
            split.record_event(BehaviorEvent::Click, t0());
            full.record_event(BehaviorEvent::Click, t0());
        }

        split.advance_session();
        assert_eq!(split.record().rapid_click_count, 5);
        assert_eq!(split.record().session_duration_seconds, 1);
        split.decay_clicks();
        full.tick();

        assert_eq!(split.record(), full.record());
        assert_eq!(full.record().rapid_click_count, 3);
    }

    #[test]
    fn test_malformed_json_is_ignored() {
        let mut agg = SignalAggregator::new(1, t0());
        assert!(!agg.record_json("not json", t0()));
        assert!(!agg.record_json(r#"{"kind": "teleport"}"#, t0()));
        assert!(!agg.record_json(r#"{"kind": "manual_rating"}"#, t0()));
        assert!(agg.record_json(r#"{"kind": "runtime_error"}"#, t0()));
        assert_eq!(agg.record().error_event_count, 1);
    }

    #[test]
    fn test_json_timestamp_is_used() {
        let mut agg = SignalAggregator::new(1, t0());
        assert!(agg.record_json(
            r#"{"kind": "click", "timestamp": "2024-01-15T14:00:30Z"}"#,
            t0()
        ));
        assert_eq!(agg.record().last_activity, t0() + Duration::seconds(30));
    }

    #[test]
    fn test_reset_starts_new_epoch() {
        let mut agg = SignalAggregator::new(1, t0());
        agg.record_event(BehaviorEvent::Click, t0());
        agg.record_event(BehaviorEvent::ManualRating(9), t0());
        agg.tick();

        let later = t0() + Duration::seconds(60);
        agg.reset(later);

        let record = agg.record();
        assert_eq!(record, &BehaviorRecord {
            epoch: 1,
            ..BehaviorRecord::empty(later)
        });
    }
}
