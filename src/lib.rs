//! Crisis Flux - On-device crisis detection and adaptive-interface engine
//!
//! Flux watches how a user interacts with the app (click cadence, navigation
//! reversals, runtime errors, explicit self-reports) and turns it into a
//! stabilized crisis level plus a rendering profile for the views:
//! signal aggregation → fog estimate → classification → transition control
//! (hysteresis) → profile selection.
//!
//! ## Modules
//!
//! - **Engine**: [`CrisisEngine`] owns the pipeline and publishes updates to subscribers
//! - **Recorder**: crisis sessions for audit, routed to a pluggable [`recorder::AuditSink`]
//! - **Driver**: optional background thread that ticks a shared engine

pub mod aggregator;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fog;
pub mod profile;
pub mod recorder;
pub mod schema;
pub mod transition;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{CrisisEngine, EngineSnapshot, SubscriptionId};
pub use error::EngineError;
pub use schema::{EventEnvelope, SCHEMA_VERSION};
pub use types::{AdaptationProfile, AdaptationUpdate, BehaviorEvent, CrisisLevel, FogBand};

/// Flux version reported by the CLI and FFI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "crisis-flux";
