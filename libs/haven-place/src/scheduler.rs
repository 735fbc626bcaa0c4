//! Keyed Timeout Scheduler
//!
//! Timeouts are keyed by (place, alarm, purpose) so re-arming a pending
//! timeout replaces it instead of stacking a second fire. Due keys are
//! delivered as events through the owning place's mailbox; a fire for a place
//! whose actor no longer exists is a no-op.
//!
//! The loop is tick-based with 100 ms granularity: a `tokio::select!` over
//! the tick interval and a shutdown `Notify`.

use crate::executor::{PlaceExecutorRegistry, PlaceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, Instant};
use tracing::{debug, info, trace, warn};

/// Default scheduler tick interval (100ms)
pub const DEFAULT_TICK_MS: u64 = 100;

/// Identity of one pending timeout
///
/// Scheduling an already-pending key replaces its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutKey {
    /// Owning place; the fire is delivered through this place's mailbox
    pub place: PlaceId,
    /// Alarm type or subsystem the timeout belongs to
    pub alarm: String,
    /// What the timeout is for (e.g. "prealert-expiry")
    pub purpose: String,
}

impl TimeoutKey {
    /// Build a timeout key
    pub fn new(place: PlaceId, alarm: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            place,
            alarm: alarm.into(),
            purpose: purpose.into(),
        }
    }
}

impl fmt::Display for TimeoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.place, self.alarm, self.purpose)
    }
}

/// Keyed timeout scheduler over a place executor registry
pub struct KeyedScheduler<E> {
    registry: Arc<PlaceExecutorRegistry<E>>,
    pending: Mutex<HashMap<TimeoutKey, Instant>>,
    shutdown: Notify,
    running: AtomicBool,
    tick: Duration,
}

impl<E> KeyedScheduler<E>
where
    E: From<TimeoutKey> + Send + 'static,
{
    /// Create a scheduler delivering through the given registry
    pub fn new(registry: Arc<PlaceExecutorRegistry<E>>, tick_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            registry,
            pending: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
            tick: Duration::from_millis(tick_ms.max(1)),
        })
    }

    /// Schedule (or replace) a timeout at an absolute deadline
    pub fn schedule_at(&self, when: Instant, key: TimeoutKey) {
        let replaced = self.pending.lock().insert(key.clone(), when);
        if replaced.is_some() {
            debug!(%key, "timeout rescheduled");
        } else {
            trace!(%key, "timeout scheduled");
        }
    }

    /// Schedule (or replace) a timeout relative to now
    pub fn schedule_after(&self, after: Duration, key: TimeoutKey) {
        self.schedule_at(Instant::now() + after, key);
    }

    /// Cancel a pending timeout; returns whether one was pending
    pub fn cancel(&self, key: &TimeoutKey) -> bool {
        let cancelled = self.pending.lock().remove(key).is_some();
        if cancelled {
            trace!(%key, "timeout cancelled");
        }
        cancelled
    }

    /// True while the key has a pending deadline
    pub fn is_pending(&self, key: &TimeoutKey) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Number of pending timeouts
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Spawn the tick loop onto the runtime
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await });
    }

    /// Run the tick loop until shutdown
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("scheduler already running");
            return;
        }
        info!(tick_ms = self.tick.as_millis() as u64, "timeout scheduler started");

        let mut tick = interval(self.tick);
        loop {
            tokio::select! {
                _ = tick.tick() => self.fire_due(),
                _ = self.shutdown.notified() => break,
            }
        }

        self.running.store(false, Ordering::Release);
        info!("timeout scheduler stopped");
    }

    /// Stop the tick loop; pending timeouts are retained
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// True while the tick loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fire every key whose deadline has passed, oldest first
    fn fire_due(&self) {
        let now = Instant::now();
        let mut due: Vec<(TimeoutKey, Instant)> = {
            let mut pending = self.pending.lock();
            let keys: Vec<TimeoutKey> = pending
                .iter()
                .filter(|(_, when)| **when <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key).map(|when| (key, when)))
                .collect()
        };
        due.sort_by_key(|(_, when)| *when);

        for (key, _) in due {
            let place = key.place;
            if !self.registry.dispatch_existing(place, E::from(key.clone())) {
                debug!(%key, "timeout fired for removed place, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PlaceHandler;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Recorder {
        fired: Mutex<Vec<TimeoutKey>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fired: Mutex::new(Vec::new()),
            })
        }

        fn fired(&self) -> Vec<TimeoutKey> {
            self.fired.lock().clone()
        }
    }

    #[async_trait]
    impl PlaceHandler<TimeoutKey> for Recorder {
        async fn handle(&self, _place: PlaceId, event: TimeoutKey) {
            self.fired.lock().push(event);
        }
    }

    fn setup() -> (
        Arc<Recorder>,
        Arc<PlaceExecutorRegistry<TimeoutKey>>,
        Arc<KeyedScheduler<TimeoutKey>>,
    ) {
        let recorder = Recorder::new();
        let registry =
            PlaceExecutorRegistry::new(recorder.clone() as Arc<dyn PlaceHandler<TimeoutKey>>);
        let scheduler = KeyedScheduler::new(registry.clone(), DEFAULT_TICK_MS);
        (recorder, registry, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_timeout_fires_into_place_mailbox() {
        let (recorder, registry, scheduler) = setup();
        let place = PlaceId::random();
        registry.dispatch(place, TimeoutKey::new(place, "warm", "up"));
        scheduler.start();

        scheduler.schedule_after(
            Duration::from_secs(5),
            TimeoutKey::new(place, "security", "prealert-expiry"),
        );
        tokio::time::sleep(Duration::from_secs(6)).await;

        let fired = recorder.fired();
        assert!(fired
            .iter()
            .any(|k| k.alarm == "security" && k.purpose == "prealert-expiry"));
        assert!(!scheduler.is_pending(&TimeoutKey::new(place, "security", "prealert-expiry")));
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_pending_deadline() {
        let (recorder, registry, scheduler) = setup();
        let place = PlaceId::random();
        registry.dispatch(place, TimeoutKey::new(place, "warm", "up"));
        scheduler.start();

        let key = TimeoutKey::new(place, "security", "prealert-expiry");
        scheduler.schedule_after(Duration::from_secs(2), key.clone());
        scheduler.schedule_after(Duration::from_secs(10), key.clone());
        assert_eq!(scheduler.pending_len(), 1);

        // Old deadline passes without a fire
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            recorder
                .fired()
                .iter()
                .filter(|k| k.purpose == "prealert-expiry")
                .count(),
            0
        );

        // New deadline fires exactly once
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(
            recorder
                .fired()
                .iter()
                .filter(|k| k.purpose == "prealert-expiry")
                .count(),
            1
        );
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timeout_never_fires() {
        let (recorder, registry, scheduler) = setup();
        let place = PlaceId::random();
        registry.dispatch(place, TimeoutKey::new(place, "warm", "up"));
        scheduler.start();

        let key = TimeoutKey::new(place, "security", "prealert-expiry");
        scheduler.schedule_after(Duration::from_secs(3), key.clone());
        assert!(scheduler.cancel(&key));
        assert!(!scheduler.cancel(&key));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            recorder
                .fired()
                .iter()
                .filter(|k| k.purpose == "prealert-expiry")
                .count(),
            0
        );
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_for_removed_place_is_noop() {
        let (recorder, _registry, scheduler) = setup();
        let place = PlaceId::random();
        scheduler.start();

        // Place actor never created; the fire must drop silently
        scheduler.schedule_after(
            Duration::from_secs(1),
            TimeoutKey::new(place, "security", "prealert-expiry"),
        );
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(recorder.fired().is_empty());
        assert_eq!(scheduler.pending_len(), 0);
        scheduler.stop();
    }
}
