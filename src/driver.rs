//! Periodic tick driver
//!
//! Runs the engine's tick on a dedicated thread for hosts without their own
//! event loop. The wait between ticks is a channel receive with a timeout,
//! so [`TickDriver::stop`] cancels the timer immediately instead of waiting
//! out the interval. Stopping (or dropping) the driver also shuts the engine
//! down, which deregisters every subscriber.
//!
//! Engine subscribers run while the driver holds the engine lock and must
//! not lock [`SharedEngine`] themselves. Listeners added with
//! [`TickDriver::on_update`] run after the lock is released and may.

use crate::engine::CrisisEngine;
use crate::types::AdaptationUpdate;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Engine shared between the driver thread and the host
pub type SharedEngine = Arc<Mutex<CrisisEngine>>;

type Listener = Box<dyn FnMut(&AdaptationUpdate) + Send>;

/// Owns the timer thread
pub struct TickDriver {
    engine: SharedEngine,
    listeners: Arc<Mutex<Vec<Listener>>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickDriver")
            .field(
                "listeners",
                &self
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl TickDriver {
    /// Start ticking at the engine's configured cadence
    pub fn spawn(engine: SharedEngine) -> std::io::Result<Self> {
        let interval_ms = engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .config()
            .tick_interval_ms;
        Self::spawn_with_interval(engine, Duration::from_millis(interval_ms))
    }

    pub fn spawn_with_interval(engine: SharedEngine, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker_engine = Arc::clone(&engine);
        let listeners: Arc<Mutex<Vec<Listener>>> = Arc::default();
        let worker_listeners = Arc::clone(&listeners);

        let handle = thread::Builder::new()
            .name("crisis-tick".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let update = {
                            let Ok(mut engine) = worker_engine.lock() else {
                                tracing::warn!("engine lock poisoned; stopping tick driver");
                                break;
                            };
                            if !engine.is_running() {
                                break;
                            }
                            engine.tick()
                        };
                        if let Some(update) = update {
                            let mut listeners = worker_listeners
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner);
                            for listener in listeners.iter_mut() {
                                listener(&update);
                            }
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            engine,
            listeners,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Call `listener` with every change produced by a driver tick, after
    /// the engine lock has been released
    pub fn on_update<F>(&self, listener: F)
    where
        F: FnMut(&AdaptationUpdate) + Send + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    /// Cancel the timer, join the thread and shut the engine down
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The worker may already have exited; a failed send is fine
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("tick driver thread panicked");
            }
        }
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::types::BehaviorEvent;
    use chrono::Utc;
    use std::time::Instant;

    fn shared_engine() -> SharedEngine {
        let engine =
            CrisisEngine::with_clock(EngineConfig::default(), ManualClock::new(Utc::now())).unwrap();
        Arc::new(Mutex::new(engine))
    }

    #[test]
    fn test_driver_ticks_engine() {
        let engine = shared_engine();
        engine.lock().unwrap().record_event(BehaviorEvent::ManualRating(9));

        let driver = TickDriver::spawn_with_interval(Arc::clone(&engine), Duration::from_millis(5))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.lock().unwrap().snapshot().ticks == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(engine.lock().unwrap().snapshot().ticks > 0);
        assert_eq!(
            engine.lock().unwrap().level(),
            crate::types::CrisisLevel::Emergency
        );

        driver.stop();
        assert!(!engine.lock().unwrap().is_running());
    }

    #[test]
    fn test_stop_cancels_long_interval_promptly() {
        let engine = shared_engine();
        let driver =
            TickDriver::spawn_with_interval(Arc::clone(&engine), Duration::from_secs(3600)).unwrap();

        let started = Instant::now();
        driver.stop();
        assert!(started.elapsed() < Duration::from_secs(5));

        let engine = engine.lock().unwrap();
        assert_eq!(engine.snapshot().ticks, 0);
        assert_eq!(engine.subscriber_count(), 0);
    }

    #[test]
    fn test_listener_can_lock_engine() {
        let engine = shared_engine();
        let driver = TickDriver::spawn_with_interval(Arc::clone(&engine), Duration::from_millis(5))
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let listener_engine = Arc::clone(&engine);
        driver.on_update(move |update| {
            let mut engine = listener_engine.lock().unwrap();
            let level = engine.snapshot().level;
            engine.deactivate();
            let _ = tx.send((update.level, level));
        });
        engine.lock().unwrap().record_event(BehaviorEvent::ManualRating(9));

        let (published, seen) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(published, crate::types::CrisisLevel::Emergency);
        assert_eq!(seen, crate::types::CrisisLevel::Emergency);
        driver.stop();
    }

    #[test]
    fn test_drop_shuts_engine_down() {
        let engine = shared_engine();
        {
            let _driver =
                TickDriver::spawn_with_interval(Arc::clone(&engine), Duration::from_millis(10))
                    .unwrap();
        }
        assert!(!engine.lock().unwrap().is_running());
    }
}
