use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::models::booking::{Booking, CancelPatch};
use crate::domain::ports::{
    BookingFeed, BookingStore, FeedErrorFn, SnapshotFn, SubscriptionHandle,
};
use crate::error::EngineError;

struct Listener {
    id: u64,
    machine_id: String,
    week_id: String,
    on_change: SnapshotFn,
}

#[derive(Default)]
struct StoreInner {
    /// Booking documents by id, stored as raw JSON the way a hosted
    /// document database would hold them.
    docs: Mutex<HashMap<String, Value>>,
    listeners: Mutex<Vec<Listener>>,
    next_listener_id: AtomicU64,
}

/// In-memory document store implementing both ports. It also plays the
/// authoritative server role: `atomic_create` refuses a batch that would
/// double-book a slot, which is exactly the conflict the engine must detect
/// and roll back from.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(value: &Value) -> Option<Booking> {
        serde_json::from_value(value.clone()).ok()
    }

    fn active_for(&self, machine_id: &str, week_id: &str) -> Vec<Booking> {
        let docs = self.inner.docs.lock().unwrap();
        let mut bookings: Vec<Booking> = docs
            .values()
            .filter_map(Self::decode)
            .filter(|b| b.is_active() && b.machine_id == machine_id && b.week_id == week_id)
            .collect();
        bookings.sort_by_key(|b| b.start_time);
        bookings
    }

    /// Push the full current result set to every listener on a touched key.
    fn notify(&self, keys: &[(String, String)]) {
        let callbacks: Vec<(SnapshotFn, String, String)> = {
            let listeners = self.inner.listeners.lock().unwrap();
            listeners
                .iter()
                .filter(|l| keys.iter().any(|(m, w)| *m == l.machine_id && *w == l.week_id))
                .map(|l| (Arc::clone(&l.on_change), l.machine_id.clone(), l.week_id.clone()))
                .collect()
        };

        for (on_change, machine_id, week_id) in callbacks {
            on_change(self.active_for(&machine_id, &week_id));
        }
    }

    fn encode(booking: &Booking) -> Result<Value, EngineError> {
        serde_json::to_value(booking).map_err(|e| EngineError::Store(e.to_string()))
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn fetch_active_bookings(
        &self,
        machine_id: &str,
        week_id: &str,
    ) -> Result<Vec<Booking>, EngineError> {
        Ok(self.active_for(machine_id, week_id))
    }

    async fn fetch_user_bookings(&self, user_id: &str) -> Result<Vec<Booking>, EngineError> {
        let docs = self.inner.docs.lock().unwrap();
        let mut bookings: Vec<Booking> = docs
            .values()
            .filter_map(Self::decode)
            .filter(|b| b.is_active() && b.user_id == user_id)
            .collect();
        drop(docs);
        bookings.sort_by_key(|b| b.start_time);
        Ok(bookings)
    }

    async fn atomic_create(&self, bookings: &[Booking]) -> Result<(), EngineError> {
        let encoded: Vec<(String, Value)> = bookings
            .iter()
            .map(|b| Self::encode(b).map(|v| (b.id.clone(), v)))
            .collect::<Result<_, _>>()?;

        {
            let mut docs = self.inner.docs.lock().unwrap();

            // All-or-nothing: every slot is checked before anything lands.
            for (i, booking) in bookings.iter().enumerate() {
                let clash_existing = docs.values().filter_map(Self::decode).any(|e| {
                    e.is_active()
                        && e.machine_id == booking.machine_id
                        && e.overlaps(booking.start_time, booking.end_time)
                });
                let clash_batch = bookings[..i].iter().any(|e| {
                    e.machine_id == booking.machine_id
                        && e.overlaps(booking.start_time, booking.end_time)
                });
                if clash_existing || clash_batch {
                    return Err(EngineError::Conflict(format!(
                        "slot {} on {} is already booked",
                        booking.start_time, booking.machine_id
                    )));
                }
            }

            for (id, value) in encoded {
                docs.insert(id, value);
            }
        }

        let mut keys: Vec<(String, String)> = bookings
            .iter()
            .map(|b| (b.machine_id.clone(), b.week_id.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        self.notify(&keys);
        Ok(())
    }

    async fn update_status(
        &self,
        booking_id: &str,
        patch: &CancelPatch,
    ) -> Result<(), EngineError> {
        let key = {
            let mut docs = self.inner.docs.lock().unwrap();
            let doc = docs
                .get_mut(booking_id)
                .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;

            // Merge only the patched fields, document-store style.
            let fields = serde_json::to_value(patch)
                .map_err(|e| EngineError::Store(e.to_string()))?;
            if let (Value::Object(doc), Value::Object(fields)) = (&mut *doc, fields) {
                for (k, v) in fields {
                    doc.insert(k, v);
                }
            }

            Self::decode(doc).map(|b| (b.machine_id, b.week_id))
        };

        if let Some(key) = key {
            self.notify(&[key]);
        }
        Ok(())
    }
}

impl BookingFeed for MemoryStore {
    fn subscribe_active_bookings(
        &self,
        machine_id: &str,
        week_id: &str,
        on_change: SnapshotFn,
        _on_error: FeedErrorFn,
    ) -> SubscriptionHandle {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().unwrap().push(Listener {
            id,
            machine_id: machine_id.to_string(),
            week_id: week_id.to_string(),
            on_change: Arc::clone(&on_change),
        });

        // Initial snapshot, same as a hosted store's first push.
        on_change(self.active_for(machine_id, week_id));

        let inner = Arc::clone(&self.inner);
        SubscriptionHandle::new(move || {
            inner.listeners.lock().unwrap().retain(|l| l.id != id);
        })
    }
}
