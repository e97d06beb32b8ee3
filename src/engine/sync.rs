use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::domain::models::booking::Booking;
use crate::domain::ports::{BookingFeed, BookingStore, SubscriptionHandle};
use crate::engine::cache::{BookingCache, WeekKey};
use crate::error::EngineError;

/// Locally-derived classification of one remote snapshot: which bookings
/// were just booked and which were just freed since the previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct SyncDelta {
    pub added: Vec<Booking>,
    pub removed: Vec<Booking>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub type DeltaFn = Arc<dyn Fn(SyncDelta) + Send + Sync>;

#[derive(Default)]
struct SyncState {
    key: Option<WeekKey>,
    /// Previous full snapshot for diffing. `None` means "first load": the
    /// next snapshot is baseline only and reports no delta, so switching
    /// machine or week never floods the caller with phantom additions.
    baseline: Option<Vec<Booking>>,
    handle: Option<SubscriptionHandle>,
    last_error: Option<String>,
    listener: Option<DeltaFn>,
}

/// Live mirror of the active bookings for one `(machine_id, week_id)`
/// partition. Both operating modes write into the same shared cache, so
/// downstream readers never know which one is active.
pub struct WeekSync {
    store: Arc<dyn BookingStore>,
    feed: Arc<dyn BookingFeed>,
    cache: Arc<BookingCache>,
    inner: Arc<Mutex<SyncState>>,
}

impl WeekSync {
    pub fn new(
        store: Arc<dyn BookingStore>,
        feed: Arc<dyn BookingFeed>,
        cache: Arc<BookingCache>,
    ) -> Self {
        Self {
            store,
            feed,
            cache,
            inner: Arc::new(Mutex::new(SyncState::default())),
        }
    }

    /// Register the caller's delta listener. Invoked outside internal locks.
    pub fn on_delta(&self, listener: DeltaFn) {
        self.inner.lock().unwrap().listener = Some(listener);
    }

    /// Point-in-time mode: one bounded read written into the shared cache,
    /// no further updates.
    pub async fn refresh(
        &self,
        machine_id: &str,
        week_id: &str,
    ) -> Result<Vec<Booking>, EngineError> {
        let bookings = self
            .store
            .fetch_active_bookings(machine_id, week_id)
            .await?;
        let key = (machine_id.to_string(), week_id.to_string());
        self.cache.replace_week(&key, bookings.clone());
        Ok(bookings)
    }

    /// Live mode: open a standing subscription for the key. Re-watching the
    /// same key is a no-op; a different key drops the old subscription and
    /// resets the diffing baseline.
    pub fn watch(&self, machine_id: &str, week_id: &str) {
        let key: WeekKey = (machine_id.to_string(), week_id.to_string());

        let old_handle = {
            let mut state = self.inner.lock().unwrap();
            if state.key.as_ref() == Some(&key) {
                return;
            }
            info!(machine = machine_id, week = week_id, "switching live booking watch");
            state.key = Some(key.clone());
            state.baseline = None;
            state.last_error = None;
            state.handle.take()
        };
        drop(old_handle);

        let on_change = {
            let inner = Arc::clone(&self.inner);
            let cache = Arc::clone(&self.cache);
            let key = key.clone();
            Arc::new(move |snapshot: Vec<Booking>| {
                Self::ingest(&inner, &cache, &key, snapshot);
            })
        };

        let on_error = {
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            Arc::new(move |err: EngineError| {
                // Keep serving the last-known-good snapshot; reconnection is
                // the transport's job.
                warn!(machine = %key.0, week = %key.1, %err, "booking feed error");
                inner.lock().unwrap().last_error = Some(err.to_string());
            })
        };

        let handle = self
            .feed
            .subscribe_active_bookings(&key.0, &key.1, on_change, on_error);

        let mut state = self.inner.lock().unwrap();
        // The key may have moved on while we were subscribing.
        if state.key.as_ref() == Some(&key) {
            state.handle = Some(handle);
        }
    }

    /// Drop the standing subscription, keeping whatever the cache holds.
    pub fn stop(&self) {
        let mut state = self.inner.lock().unwrap();
        state.key = None;
        state.baseline = None;
        let handle = state.handle.take();
        drop(state);
        drop(handle);
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    fn ingest(
        inner: &Arc<Mutex<SyncState>>,
        cache: &BookingCache,
        key: &WeekKey,
        snapshot: Vec<Booking>,
    ) {
        let (delta, listener) = {
            let mut state = inner.lock().unwrap();
            if state.key.as_ref() != Some(key) {
                // Stale push from a subscription we already left behind.
                return;
            }

            let delta = state.baseline.as_ref().map(|prev| diff(prev, &snapshot));

            // Whole-snapshot replacement: never merge partial updates.
            cache.replace_week(key, snapshot.clone());
            state.baseline = Some(snapshot);
            state.last_error = None;

            (delta, state.listener.clone())
        };

        if let Some(delta) = delta {
            if !delta.is_empty() {
                debug!(
                    machine = %key.0,
                    week = %key.1,
                    added = delta.added.len(),
                    removed = delta.removed.len(),
                    "remote booking change"
                );
                if let Some(listener) = listener {
                    listener(delta);
                }
            }
        }
    }
}

fn diff(prev: &[Booking], next: &[Booking]) -> SyncDelta {
    let added = next
        .iter()
        .filter(|n| !prev.iter().any(|p| p.id == n.id))
        .cloned()
        .collect();
    let removed = prev
        .iter()
        .filter(|p| !next.iter().any(|n| n.id == p.id))
        .cloned()
        .collect();
    SyncDelta { added, removed }
}
