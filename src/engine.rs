//! Crisis engine orchestration
//!
//! This module provides the public API collaborators talk to. It owns every
//! pipeline stage and runs them in order on each tick:
//!
//! session time → fog estimate → classify → transition control →
//! profile selection → subscribers + audit recorder → click decay
//!
//! Everything runs synchronously on the caller's thread. Hosts with more
//! than one thread wrap the engine in a mutex (see [`crate::driver`]).

use crate::aggregator::SignalAggregator;
use crate::classifier::CrisisClassifier;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fog::FogEstimator;
use crate::profile::ProfileSelector;
use crate::recorder::{AuditSink, SessionRecorder};
use crate::transition::{TransitionController, TransitionKind};
use crate::types::{
    AdaptationProfile, AdaptationUpdate, BehaviorEvent, BehaviorRecord, CrisisLevel, FogBand,
    SessionOutcome, Trigger,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle returned by [`CrisisEngine::subscribe`]
pub type SubscriptionId = u64;

type Callback = Box<dyn FnMut(&AdaptationUpdate) + Send>;

/// Point-in-time view of the engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub instance_id: String,
    pub running: bool,
    /// Ticks since the last reset
    pub ticks: u64,
    pub record: BehaviorRecord,
    pub raw_level: CrisisLevel,
    pub level: CrisisLevel,
    pub fog_score: f64,
    pub fog_band: FogBand,
    pub profile: AdaptationProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_session_id: Option<String>,
}

/// Behavioral crisis-detection and adaptive-interface engine
pub struct CrisisEngine {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    instance_id: String,
    aggregator: SignalAggregator,
    fog: FogEstimator,
    classifier: CrisisClassifier,
    controller: TransitionController,
    selector: ProfileSelector,
    recorder: SessionRecorder,
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_subscription: SubscriptionId,
    raw_level: CrisisLevel,
    fog_score: f64,
    current: AdaptationUpdate,
    ticks: u64,
    running: bool,
}

impl std::fmt::Debug for CrisisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrisisEngine")
            .field("instance_id", &self.instance_id)
            .field("running", &self.running)
            .field("ticks", &self.ticks)
            .field("raw_level", &self.raw_level)
            .field("level", &self.current.level)
            .field("fog_score", &self.fog_score)
            .field("subscribers", &self.subscribers.len())
            .field("recorder", &self.recorder)
            .finish()
    }
}

impl CrisisEngine {
    /// Create an engine on the wall clock
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_clock(config, SystemClock)
    }

    /// Create an engine reading time from `clock`
    pub fn with_clock(config: EngineConfig, clock: impl Clock + 'static) -> Result<Self, EngineError> {
        config.validate()?;
        let now = clock.now();

        let fog = FogEstimator::new(config.fog.clone());
        let selector = ProfileSelector::new(config.profile.clone(), config.fog.clone());
        let neutral = selector.neutral();
        let quiet_period = Duration::seconds(config.quiet_period_secs as i64);

        Ok(Self {
            aggregator: SignalAggregator::new(config.click_decay_per_tick, now),
            classifier: CrisisClassifier::new(config.classifier.clone()),
            controller: TransitionController::from_secs(config.quiet_period_secs),
            recorder: SessionRecorder::new(quiet_period, config.session_history_limit),
            current: AdaptationUpdate {
                level: CrisisLevel::None,
                fog_score: 0.0,
                fog_band: FogBand::Clear,
                profile: neutral,
                trigger: Trigger::Reset,
                at: now,
            },
            fog,
            selector,
            clock: Box::new(clock),
            instance_id: Uuid::new_v4().to_string(),
            subscribers: Vec::new(),
            next_subscription: 1,
            raw_level: CrisisLevel::None,
            fog_score: 0.0,
            ticks: 0,
            running: true,
            config,
        })
    }

    /// Route closed crisis sessions to `sink`
    pub fn with_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.recorder.set_sink(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Last published state
    pub fn current(&self) -> &AdaptationUpdate {
        &self.current
    }

    pub fn level(&self) -> CrisisLevel {
        self.current.level
    }

    pub fn raw_level(&self) -> CrisisLevel {
        self.raw_level
    }

    pub fn fog_score(&self) -> f64 {
        self.fog_score
    }

    pub fn record(&self) -> &BehaviorRecord {
        self.aggregator.record()
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut SessionRecorder {
        &mut self.recorder
    }

    /// Register a callback for stabilized changes.
    ///
    /// Callbacks run synchronously inside the call that caused the change.
    /// When the engine sits behind a [`crate::driver::SharedEngine`] mutex
    /// that lock is held, so a callback must not lock the engine again; use
    /// [`crate::driver::TickDriver::on_update`] for listeners that need to.
    pub fn subscribe<F>(&mut self, callback: F) -> Result<SubscriptionId, EngineError>
    where
        F: FnMut(&AdaptationUpdate) + Send + 'static,
    {
        if !self.running {
            return Err(EngineError::Stopped);
        }
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Feed one behavioral event
    pub fn record_event(&mut self, event: BehaviorEvent) {
        let now = self.clock.now();
        self.record_event_at(event, now);
    }

    /// Feed one behavioral event that happened at `at`
    pub fn record_event_at(&mut self, event: BehaviorEvent, at: DateTime<Utc>) {
        if !self.running {
            tracing::debug!(?event, "engine stopped; dropping event");
            return;
        }
        self.aggregator.record_event(event, at);
    }

    /// Feed one JSON-encoded event; malformed payloads are dropped
    pub fn record_event_json(&mut self, json: &str) -> bool {
        if !self.running {
            return false;
        }
        let now = self.clock.now();
        self.aggregator.record_json(json, now)
    }

    /// Advance one tick and re-evaluate.
    ///
    /// Returns the update delivered to subscribers, if the visible state
    /// changed.
    pub fn tick(&mut self) -> Option<AdaptationUpdate> {
        if !self.running {
            return None;
        }
        let now = self.clock.now();
        self.aggregator.advance_session();
        self.ticks += 1;

        // Judge the burst at full size; clicks cool off after classification
        let record = self.aggregator.record();
        self.fog_score = self.fog.estimate(record);
        self.raw_level = self.classifier.classify(record);

        let transition = self.controller.observe(self.raw_level, now);
        let trigger = match transition.kind {
            TransitionKind::QuietPeriodElapsed => Trigger::QuietPeriodElapsed,
            _ => Trigger::Signals {
                raw_level: self.raw_level,
                fog_score: self.fog_score,
            },
        };
        if transition.changed() {
            tracing::debug!(
                from = %transition.from,
                to = %transition.to,
                raw = %self.raw_level,
                fog = self.fog_score,
                "stabilized level changed"
            );
        }
        let update = self.publish_if_changed(trigger, now);

        if self.ticks % self.config.reevaluation_ticks() == 0 {
            self.recorder.on_sample(self.raw_level, self.fog_score, now);
        }
        self.recorder.poll(now);
        self.aggregator.decay_clicks();

        update
    }

    /// Manual "exit crisis mode".
    ///
    /// Forces `none` immediately; if the signals still warrant a crisis the
    /// next tick escalates again.
    pub fn deactivate(&mut self) -> Option<AdaptationUpdate> {
        if !self.running {
            return None;
        }
        let now = self.clock.now();
        let transition = self.controller.override_to_none();
        if transition.changed() {
            tracing::info!(from = %transition.from, "crisis mode deactivated by user");
        }
        self.publish_if_changed(Trigger::ManualOverride, now)
    }

    /// Close the active crisis session with an explicit outcome
    pub fn report_outcome(&mut self, outcome: SessionOutcome) -> bool {
        let now = self.clock.now();
        self.recorder.on_manual_outcome(outcome, now)
    }

    /// Record how helpful the adaptations were (1-5)
    pub fn report_effectiveness(&mut self, rating: i64, note: Option<String>) -> bool {
        let now = self.clock.now();
        self.recorder.record_effectiveness(rating, note, now)
    }

    /// Start a new epoch: zero the record and drop back to `none`
    pub fn reset(&mut self) -> Option<AdaptationUpdate> {
        let now = self.clock.now();
        self.aggregator.reset(now);
        self.controller.reset();
        self.ticks = 0;
        self.raw_level = CrisisLevel::None;
        self.fog_score = 0.0;
        tracing::debug!(epoch = self.aggregator.record().epoch, "engine reset");
        let update = self.publish_if_changed(Trigger::Reset, now);
        // A session can outlive the visible level while an override close is pending
        if self.recorder.active().is_some() {
            self.recorder.on_manual_outcome(SessionOutcome::Ongoing, now);
        }
        update
    }

    /// Stop monitoring: drop to `none`, close the session, deregister every
    /// subscriber and ignore all further input
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        let now = self.clock.now();
        self.controller.reset();
        self.publish_if_changed(Trigger::Shutdown, now);
        if self.recorder.active().is_some() {
            self.recorder.on_manual_outcome(SessionOutcome::Ongoing, now);
        }
        self.subscribers.clear();
        self.running = false;
        tracing::info!(instance_id = %self.instance_id, "crisis engine shut down");
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            instance_id: self.instance_id.clone(),
            running: self.running,
            ticks: self.ticks,
            record: self.aggregator.record().clone(),
            raw_level: self.raw_level,
            level: self.current.level,
            fog_score: self.fog_score,
            fog_band: self.fog.band(self.fog_score),
            profile: self.current.profile.clone(),
            pending_deadline: self.controller.pending_deadline(),
            active_session_id: self.recorder.active().map(|s| s.id.clone()),
        }
    }

    fn publish_if_changed(&mut self, trigger: Trigger, now: DateTime<Utc>) -> Option<AdaptationUpdate> {
        let level = self.controller.stabilized();
        let profile = self.selector.select(level, self.fog_score);
        let level_changed = level != self.current.level;
        if !level_changed && profile == self.current.profile {
            return None;
        }

        if level_changed {
            self.recorder.on_level_change(level, &profile, trigger, now);
        }

        let update = AdaptationUpdate {
            level,
            fog_score: self.fog_score,
            fog_band: self.fog.band(self.fog_score),
            profile,
            trigger,
            at: now,
        };
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&update);
        }
        self.current = update.clone();
        Some(update)
    }
}
