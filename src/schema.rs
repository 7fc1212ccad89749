//! Event wire schema
//!
//! View collaborators deliver events as small JSON objects:
//!
//! ```text
//! {"kind": "click"}
//! {"kind": "navigation_back", "timestamp": "2024-01-15T14:00:03Z"}
//! {"kind": "manual_rating", "value": 7}
//! ```
//!
//! Replay scripts (NDJSON, one envelope per line) may additionally contain
//! control entries: `tick` (with optional `count`), `deactivate`, `outcome`,
//! `effectiveness` and `reset`.

use crate::error::EngineError;
use crate::types::{BehaviorEvent, SessionOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current event schema version
pub const SCHEMA_VERSION: &str = "crisis.event.v1";

/// Kind of envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Click,
    #[serde(alias = "navigation-back")]
    NavigationBack,
    #[serde(alias = "runtime-error")]
    RuntimeError,
    #[serde(alias = "manual-rating")]
    ManualRating,
    Tick,
    Deactivate,
    Outcome,
    Effectiveness,
    Reset,
}

/// One event as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Rating for `manual_rating`; numbers or numeric strings are accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Number of ticks for `tick` (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
    /// Effectiveness rating (1-5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl EventEnvelope {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: None,
            value: None,
            count: None,
            outcome: None,
            rating: None,
            note: None,
        }
    }

    /// The behavior signal carried by this envelope, if it is one
    pub fn behavior_event(&self) -> Option<BehaviorEvent> {
        match self.kind {
            EventKind::Click => Some(BehaviorEvent::Click),
            EventKind::NavigationBack => Some(BehaviorEvent::NavigationBack),
            EventKind::RuntimeError => Some(BehaviorEvent::RuntimeError),
            EventKind::ManualRating => self
                .value
                .as_ref()
                .and_then(rating_value)
                .map(BehaviorEvent::ManualRating),
            _ => None,
        }
    }
}

fn rating_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse one envelope, dropping anything malformed
pub fn parse_event(json: &str) -> Option<EventEnvelope> {
    match serde_json::from_str::<EventEnvelope>(json.trim()) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed event payload");
            None
        }
    }
}

/// Parse an NDJSON replay script, failing on the first bad line
pub fn parse_script(ndjson: &str) -> Result<Vec<EventEnvelope>, EngineError> {
    let mut envelopes = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<EventEnvelope>(trimmed) {
            Ok(envelope) => envelopes.push(envelope),
            Err(e) => {
                return Err(EngineError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(envelopes)
}
