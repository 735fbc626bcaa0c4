//! Per-place Serialized Executors
//!
//! A registry maps place id -> lazily-created logical actor. Enqueuing an
//! event for an inactive place schedules its mailbox onto the shared tokio
//! worker pool; the mailbox drains its queue strictly in arrival order, then
//! deactivates. A later event re-activates it. No two events for the same
//! place ever run concurrently; different places run in parallel, bounded
//! only by the runtime's worker capacity.

use crate::error::PlaceError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Identifier of a managed premise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceId(Uuid);

impl PlaceId {
    /// Generate a fresh place id
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying uuid
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PlaceId {
    type Err = PlaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| PlaceError::InvalidPlaceId(s.to_string()))
    }
}

/// Handler invoked for every event a place's actor drains
///
/// One handler instance is shared by every place; per-place exclusivity is
/// provided by the mailbox, so the handler may keep per-place state without
/// further locking as long as it is keyed by place.
#[async_trait]
pub trait PlaceHandler<E>: Send + Sync {
    /// Process one event. Runs to completion before the next event for the
    /// same place is dequeued.
    async fn handle(&self, place: PlaceId, event: E);
}

/// Mailbox backing one place's logical actor
struct PlaceMailbox<E> {
    queue: Mutex<VecDeque<E>>,
    /// True while a drain task owns the mailbox
    active: AtomicBool,
}

impl<E> PlaceMailbox<E> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(false),
        }
    }
}

/// Registry of per-place logical actors over the shared worker pool
pub struct PlaceExecutorRegistry<E> {
    mailboxes: DashMap<PlaceId, Arc<PlaceMailbox<E>>>,
    handler: Arc<dyn PlaceHandler<E>>,
}

impl<E: Send + 'static> PlaceExecutorRegistry<E> {
    /// Create a registry dispatching to the given handler
    pub fn new(handler: Arc<dyn PlaceHandler<E>>) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            handler,
        })
    }

    /// Enqueue an event for a place, creating its actor on first use
    pub fn dispatch(&self, place: PlaceId, event: E) {
        let mailbox = self
            .mailboxes
            .entry(place)
            .or_insert_with(|| Arc::new(PlaceMailbox::new()))
            .clone();
        self.enqueue(place, mailbox, event);
    }

    /// Enqueue an event only if the place's actor already exists
    ///
    /// Used for timeout delivery: a timeout firing for a place whose context
    /// has been removed is a no-op.
    pub fn dispatch_existing(&self, place: PlaceId, event: E) -> bool {
        match self.mailboxes.get(&place).map(|m| m.clone()) {
            Some(mailbox) => {
                self.enqueue(place, mailbox, event);
                true
            },
            None => {
                debug!(%place, "dropping event for unknown place");
                false
            },
        }
    }

    /// Drop a place's actor; queued events are discarded
    pub fn remove(&self, place: PlaceId) -> bool {
        self.mailboxes.remove(&place).is_some()
    }

    /// Number of known places
    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    /// True when no place actors exist
    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    /// True while the place's mailbox has an active drain task
    pub fn is_active(&self, place: PlaceId) -> bool {
        self.mailboxes
            .get(&place)
            .map(|m| m.active.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn enqueue(&self, place: PlaceId, mailbox: Arc<PlaceMailbox<E>>, event: E) {
        mailbox.queue.lock().push_back(event);
        if !mailbox.active.swap(true, Ordering::AcqRel) {
            trace!(%place, "activating place actor");
            let handler = self.handler.clone();
            tokio::spawn(drain(place, mailbox, handler));
        }
    }
}

/// Drain one place's mailbox in arrival order, then deactivate
async fn drain<E: Send + 'static>(
    place: PlaceId,
    mailbox: Arc<PlaceMailbox<E>>,
    handler: Arc<dyn PlaceHandler<E>>,
) {
    loop {
        let next = mailbox.queue.lock().pop_front();
        match next {
            Some(event) => handler.handle(place, event).await,
            None => {
                mailbox.active.store(false, Ordering::Release);
                // An enqueue may have raced the deactivation; if so, try to
                // re-claim the turn, unless the racer already spawned one.
                if mailbox.queue.lock().is_empty() {
                    trace!(%place, "place actor deactivated");
                    return;
                }
                if mailbox.active.swap(true, Ordering::AcqRel) {
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Probe handler that records ordering and detects concurrent entry
    struct Probe {
        in_flight: DashMap<PlaceId, AtomicUsize>,
        overlaps: AtomicUsize,
        seen: Mutex<Vec<(PlaceId, u64)>>,
        handled: AtomicUsize,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                in_flight: DashMap::new(),
                overlaps: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                handled: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PlaceHandler<u64> for Probe {
        async fn handle(&self, place: PlaceId, event: u64) {
            let entered = self
                .in_flight
                .entry(place)
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::SeqCst);
            if entered != 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.seen.lock().push((place, event));
            self.in_flight
                .get(&place)
                .unwrap()
                .fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(probe: &Probe, count: usize) {
        for _ in 0..500 {
            if probe.handled.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "timed out waiting for {} events, got {}",
            count,
            probe.handled.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_place_events_run_in_arrival_order() {
        let probe = Probe::new();
        let registry = PlaceExecutorRegistry::new(probe.clone() as Arc<dyn PlaceHandler<u64>>);
        let place = PlaceId::random();

        for i in 0..50u64 {
            registry.dispatch(place, i);
        }
        wait_for(&probe, 50).await;

        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
        let seen = probe.seen.lock();
        let order: Vec<u64> = seen.iter().map(|(_, e)| *e).collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_places_never_block_each_other() {
        let probe = Probe::new();
        let registry = PlaceExecutorRegistry::new(probe.clone() as Arc<dyn PlaceHandler<u64>>);
        let places: Vec<PlaceId> = (0..8).map(|_| PlaceId::random()).collect();

        for i in 0..20u64 {
            for place in &places {
                registry.dispatch(*place, i);
            }
        }
        wait_for(&probe, 160).await;

        // Serialization holds per place even under cross-place parallelism
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
        for place in &places {
            let seen = probe.seen.lock();
            let order: Vec<u64> = seen
                .iter()
                .filter(|(p, _)| p == place)
                .map(|(_, e)| *e)
                .collect();
            assert_eq!(order, (0..20).collect::<Vec<_>>());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_actor_deactivates_and_reactivates() {
        let probe = Probe::new();
        let registry = PlaceExecutorRegistry::new(probe.clone() as Arc<dyn PlaceHandler<u64>>);
        let place = PlaceId::random();

        registry.dispatch(place, 1);
        wait_for(&probe, 1).await;
        // Give the drain task a moment to park
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!registry.is_active(place));

        registry.dispatch(place, 2);
        wait_for(&probe, 2).await;
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_existing_is_noop_for_unknown_place() {
        let probe = Probe::new();
        let registry = PlaceExecutorRegistry::new(probe.clone() as Arc<dyn PlaceHandler<u64>>);
        let place = PlaceId::random();

        assert!(!registry.dispatch_existing(place, 1));
        assert!(registry.is_empty());

        registry.dispatch(place, 1);
        assert!(registry.dispatch_existing(place, 2));
        wait_for(&probe, 2).await;

        registry.remove(place);
        assert!(!registry.dispatch_existing(place, 3));
    }
}
