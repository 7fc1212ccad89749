//! Crisis session audit recording
//!
//! Records every stabilized change while the user is out of `none`, along
//! with periodic stress samples, the terminal outcome and any reported
//! effectiveness. Recording is strictly a side effect: nothing here feeds
//! back into classification, and storage failures are logged and dropped.

use crate::error::EngineError;
use crate::types::{
    AdaptationProfile, CrisisLevel, CrisisSession, EffectivenessReport, SessionEntry,
    SessionOutcome, StressSample, Trigger,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Default number of closed sessions kept in memory
pub const DEFAULT_SESSION_HISTORY: usize = 50;

/// Valid effectiveness ratings
const EFFECTIVENESS_RANGE: std::ops::RangeInclusive<i64> = 1..=5;

/// Destination for closed (or amended) sessions.
///
/// Implementations may fail; the recorder logs the failure and carries on.
pub trait AuditSink: Send {
    fn persist(&mut self, session: &CrisisSession) -> Result<(), EngineError>;
}

/// Keeps persisted sessions in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sessions: Arc<Mutex<Vec<CrisisSession>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything persisted so far, in order
    pub fn sessions(&self) -> Vec<CrisisSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemorySink {
    fn persist(&mut self, session: &CrisisSession) -> Result<(), EngineError> {
        self.sessions
            .lock()
            .map_err(|_| EngineError::Storage("memory sink lock poisoned".to_string()))?
            .push(session.clone());
        Ok(())
    }
}

/// Appends one JSON line per persisted session
#[derive(Debug, Clone)]
pub struct JsonlFileSink {
    path: PathBuf,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSink for JsonlFileSink {
    fn persist(&mut self, session: &CrisisSession) -> Result<(), EngineError> {
        let line = serde_json::to_string(session)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::Storage(format!("{}: {}", self.path.display(), e)))?;
        writeln!(file, "{}", line)
            .map_err(|e| EngineError::Storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

/// Owner of the active crisis session and the closed-session history
pub struct SessionRecorder {
    active: Option<CrisisSession>,
    /// Close deadline scheduled by a manual override
    pending_close: Option<DateTime<Utc>>,
    close_delay: Duration,
    history: VecDeque<CrisisSession>,
    history_limit: usize,
    sink: Option<Box<dyn AuditSink>>,
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(Duration::seconds(5), DEFAULT_SESSION_HISTORY)
    }
}

impl std::fmt::Debug for SessionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecorder")
            .field("active", &self.active.as_ref().map(|s| &s.id))
            .field("pending_close", &self.pending_close)
            .field("history", &self.history.len())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl SessionRecorder {
    /// `close_delay` is how long none must last after a manual override
    /// before the session is closed
    pub fn new(close_delay: Duration, history_limit: usize) -> Self {
        Self {
            active: None,
            pending_close: None,
            close_delay,
            history: VecDeque::with_capacity(history_limit.min(DEFAULT_SESSION_HISTORY)),
            history_limit,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.sink = Some(sink);
    }

    pub fn active(&self) -> Option<&CrisisSession> {
        self.active.as_ref()
    }

    /// Closed sessions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &CrisisSession> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn pending_close(&self) -> Option<DateTime<Utc>> {
        self.pending_close
    }

    /// Record a stabilized change, opening a session when leaving none
    pub fn on_level_change(
        &mut self,
        level: CrisisLevel,
        profile: &AdaptationProfile,
        trigger: Trigger,
        at: DateTime<Utc>,
    ) {
        let entry = SessionEntry {
            at,
            trigger,
            level,
            profile: profile.clone(),
        };

        if self.active.is_none() {
            if !level.is_crisis() {
                return;
            }
            let session = CrisisSession {
                id: Uuid::new_v4().to_string(),
                started_at: at,
                ended_at: None,
                entries: Vec::new(),
                outcome: SessionOutcome::Ongoing,
                peak_level: level,
                effectiveness: Vec::new(),
                samples: Vec::new(),
            };
            tracing::info!(session_id = %session.id, %level, "crisis session opened");
            self.active = Some(session);
        }
        let Some(session) = self.active.as_mut() else {
            return;
        };

        session.entries.push(entry);
        session.peak_level = session.peak_level.max(level);

        if level.is_crisis() {
            self.pending_close = None;
            return;
        }

        match trigger {
            Trigger::ManualOverride => {
                self.pending_close = Some(
                    at.checked_add_signed(self.close_delay)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                );
            }
            Trigger::QuietPeriodElapsed | Trigger::Signals { .. } => {
                self.close(SessionOutcome::Resolved, at);
            }
            Trigger::Reset | Trigger::Shutdown => {
                self.close(SessionOutcome::Ongoing, at);
            }
        }
    }

    /// Close the active session with an explicit outcome
    pub fn on_manual_outcome(&mut self, outcome: SessionOutcome, at: DateTime<Utc>) -> bool {
        if self.active.is_none() {
            tracing::debug!(?outcome, "no active crisis session to close");
            return false;
        }
        self.close(outcome, at);
        true
    }

    /// Attach a periodic stress sample to the active session
    pub fn on_sample(&mut self, raw_level: CrisisLevel, fog_score: f64, at: DateTime<Utc>) {
        if let Some(session) = self.active.as_mut() {
            session.samples.push(StressSample {
                at,
                raw_level,
                fog_score,
            });
        }
    }

    /// Attach a user effectiveness rating (1-5) to the active session, or
    /// to the most recently closed one
    pub fn record_effectiveness(
        &mut self,
        rating: i64,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if !EFFECTIVENESS_RANGE.contains(&rating) {
            tracing::debug!(rating, "ignoring out-of-range effectiveness rating");
            return false;
        }
        let report = EffectivenessReport {
            at,
            rating: rating as u8,
            note,
        };

        if let Some(session) = self.active.as_mut() {
            session.effectiveness.push(report);
            return true;
        }

        let Some(session) = self.history.back_mut() else {
            tracing::debug!("no crisis session to attach effectiveness to");
            return false;
        };
        session.effectiveness.push(report);
        let amended = session.clone();
        self.persist(&amended);
        true
    }

    /// Close a session whose manual-override delay has run out
    pub fn poll(&mut self, at: DateTime<Utc>) {
        if let Some(deadline) = self.pending_close {
            if at >= deadline {
                self.close(SessionOutcome::Resolved, at);
            }
        }
    }

    /// Serialize the closed-session history
    pub fn save_history(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(&self.history)?)
    }

    /// Replace the closed-session history, keeping the newest entries
    pub fn load_history(&mut self, json: &str) -> Result<(), EngineError> {
        let mut sessions: VecDeque<CrisisSession> = serde_json::from_str(json)?;
        while sessions.len() > self.history_limit {
            sessions.pop_front();
        }
        self.history = sessions;
        Ok(())
    }

    fn close(&mut self, outcome: SessionOutcome, at: DateTime<Utc>) {
        self.pending_close = None;
        let Some(mut session) = self.active.take() else {
            return;
        };
        session.ended_at = Some(at);
        session.outcome = outcome;
        tracing::info!(
            session_id = %session.id,
            ?outcome,
            peak = %session.peak_level,
            entries = session.entries.len(),
            "crisis session closed"
        );

        self.persist(&session);
        self.history.push_back(session);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn persist(&mut self, session: &CrisisSession) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.persist(session) {
                tracing::warn!(session_id = %session.id, error = %e, "failed to persist crisis session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileSelector;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn signals(level: CrisisLevel) -> Trigger {
        Trigger::Signals {
            raw_level: level,
            fog_score: 0.4,
        }
    }

    fn change(rec: &mut SessionRecorder, level: CrisisLevel, trigger: Trigger, at: DateTime<Utc>) {
        let profile = ProfileSelector::default().select(level, 0.4);
        rec.on_level_change(level, &profile, trigger, at);
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn persist(&mut self, _session: &CrisisSession) -> Result<(), EngineError> {
            Err(EngineError::Storage("disk unavailable".to_string()))
        }
    }

    #[test]
    fn test_none_without_session_is_not_recorded() {
        let mut rec = SessionRecorder::default();
        change(&mut rec, CrisisLevel::None, signals(CrisisLevel::None), t(0));
        assert!(rec.active().is_none());
        assert_eq!(rec.history_len(), 0);
    }

    #[test]
    fn test_session_lifecycle_resolved() {
        let sink = MemorySink::new();
        let mut rec = SessionRecorder::default().with_sink(Box::new(sink.clone()));

        change(&mut rec, CrisisLevel::Moderate, signals(CrisisLevel::Moderate), t(0));
        change(&mut rec, CrisisLevel::Emergency, signals(CrisisLevel::Emergency), t(3));
        change(&mut rec, CrisisLevel::Mild, signals(CrisisLevel::Mild), t(20));

        let active = rec.active().unwrap();
        assert_eq!(active.entries.len(), 3);
        assert_eq!(active.peak_level, CrisisLevel::Emergency);
        assert_eq!(active.started_at, t(0));

        change(&mut rec, CrisisLevel::None, Trigger::QuietPeriodElapsed, t(30));
        assert!(rec.active().is_none());

        let closed: Vec<_> = rec.history().collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].outcome, SessionOutcome::Resolved);
        assert_eq!(closed[0].ended_at, Some(t(30)));
        assert_eq!(closed[0].entries.len(), 4);
        assert_eq!(sink.sessions().len(), 1);
    }

    #[test]
    fn test_manual_outcome_closes_session() {
        let mut rec = SessionRecorder::default();
        assert!(!rec.on_manual_outcome(SessionOutcome::Escalated, t(0)));

        change(&mut rec, CrisisLevel::Severe, signals(CrisisLevel::Severe), t(0));
        assert!(rec.on_manual_outcome(SessionOutcome::Transferred, t(10)));

        let closed = rec.history().next().unwrap();
        assert_eq!(closed.outcome, SessionOutcome::Transferred);
        assert!(!closed.is_open());
    }

    #[test]
    fn test_override_closes_after_delay() {
        let mut rec = SessionRecorder::new(Duration::seconds(5), 10);
        change(&mut rec, CrisisLevel::Severe, signals(CrisisLevel::Severe), t(0));
        change(&mut rec, CrisisLevel::None, Trigger::ManualOverride, t(2));

        assert_eq!(rec.pending_close(), Some(t(7)));
        rec.poll(t(6));
        assert!(rec.active().is_some());

        rec.poll(t(7));
        assert!(rec.active().is_none());
        assert_eq!(rec.history().next().unwrap().outcome, SessionOutcome::Resolved);
    }

    #[test]
    fn test_reescalation_after_override_continues_session() {
        let mut rec = SessionRecorder::new(Duration::seconds(5), 10);
        change(&mut rec, CrisisLevel::Emergency, signals(CrisisLevel::Emergency), t(0));
        let id = rec.active().unwrap().id.clone();

        change(&mut rec, CrisisLevel::None, Trigger::ManualOverride, t(1));
        change(&mut rec, CrisisLevel::Emergency, signals(CrisisLevel::Emergency), t(2));
        assert_eq!(rec.pending_close(), None);

        rec.poll(t(20));
        let active = rec.active().unwrap();
        assert_eq!(active.id, id);
        assert_eq!(active.entries.len(), 3);
    }

    #[test]
    fn test_samples_and_effectiveness() {
        let mut rec = SessionRecorder::default();
        rec.on_sample(CrisisLevel::Mild, 0.1, t(0));
        assert!(!rec.record_effectiveness(4, None, t(0)));

        change(&mut rec, CrisisLevel::Mild, signals(CrisisLevel::Mild), t(0));
        rec.on_sample(CrisisLevel::Mild, 0.3, t(10));
        assert!(rec.record_effectiveness(4, Some("breathing helped".to_string()), t(11)));
        assert!(!rec.record_effectiveness(9, None, t(12)));
        rec.on_manual_outcome(SessionOutcome::Resolved, t(15));

        // Late rating lands on the most recent closed session
        assert!(rec.record_effectiveness(5, None, t(40)));

        let closed = rec.history().next().unwrap();
        assert_eq!(closed.samples.len(), 1);
        assert_eq!(closed.effectiveness.len(), 2);
        assert_eq!(closed.effectiveness[0].note.as_deref(), Some("breathing helped"));
    }

    #[test]
    fn test_sink_failure_does_not_interrupt_recording() {
        let mut rec = SessionRecorder::default().with_sink(Box::new(FailingSink));
        change(&mut rec, CrisisLevel::Severe, signals(CrisisLevel::Severe), t(0));
        change(&mut rec, CrisisLevel::None, Trigger::QuietPeriodElapsed, t(10));
        change(&mut rec, CrisisLevel::Mild, signals(CrisisLevel::Mild), t(20));

        assert_eq!(rec.history_len(), 1);
        assert!(rec.active().is_some());
    }

    #[test]
    fn test_history_is_bounded_and_serializable() {
        let mut rec = SessionRecorder::new(Duration::seconds(5), 3);
        for i in 0..5 {
            change(&mut rec, CrisisLevel::Mild, signals(CrisisLevel::Mild), t(i * 100));
            rec.on_manual_outcome(SessionOutcome::Resolved, t(i * 100 + 10));
        }
        assert_eq!(rec.history_len(), 3);

        let saved = rec.save_history().unwrap();
        let mut restored = SessionRecorder::new(Duration::seconds(5), 2);
        restored.load_history(&saved).unwrap();
        assert_eq!(restored.history_len(), 2);
        assert_eq!(restored.history().next().unwrap().started_at, t(300));
    }

    #[test]
    fn test_jsonl_sink_reports_unwritable_path() {
        let mut sink = JsonlFileSink::new("/nonexistent-dir/crisis/sessions.jsonl");
        let mut rec = SessionRecorder::default();
        change(&mut rec, CrisisLevel::Mild, signals(CrisisLevel::Mild), t(0));
        rec.on_manual_outcome(SessionOutcome::Resolved, t(1));

        let session = rec.history().next().unwrap();
        assert!(matches!(sink.persist(session), Err(EngineError::Storage(_))));
    }
}
