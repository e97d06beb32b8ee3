use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::models::booking::Booking;

/// Cache partition key: `(machine_id, week_id)`.
pub type WeekKey = (String, String);

/// A booking as the cache sees it. Provisional records are optimistic local
/// writes not yet confirmed by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBooking {
    pub booking: Booking,
    pub provisional: bool,
}

impl CachedBooking {
    pub fn authoritative(booking: Booking) -> Self {
        Self {
            booking,
            provisional: false,
        }
    }

    pub fn provisional(booking: Booking) -> Self {
        Self {
            booking,
            provisional: true,
        }
    }
}

/// The single shared mutable resource of the engine: per-week snapshots of
/// active bookings plus per-user booking lists. Written both by the sync
/// layer (whole-snapshot replacement) and by the transaction manager
/// (optimistic inserts/removals guarded by pre-image capture).
#[derive(Default)]
pub struct BookingCache {
    weeks: Mutex<HashMap<WeekKey, Vec<CachedBooking>>>,
    user_lists: Mutex<HashMap<String, Vec<Booking>>>,
}

impl BookingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authoritative whole-snapshot replacement for one partition. Live
    /// updates always come through here so a remote change can never merge
    /// into a half-applied local state.
    pub fn replace_week(&self, key: &WeekKey, bookings: Vec<Booking>) {
        let snapshot = bookings
            .into_iter()
            .map(CachedBooking::authoritative)
            .collect();
        self.weeks.lock().unwrap().insert(key.clone(), snapshot);
    }

    pub fn week(&self, key: &WeekKey) -> Option<Vec<CachedBooking>> {
        self.weeks.lock().unwrap().get(key).cloned()
    }

    pub fn contains_week(&self, key: &WeekKey) -> bool {
        self.weeks.lock().unwrap().contains_key(key)
    }

    /// Flattened active view for the rule engine, provisional records
    /// included so a pending commit already blocks re-selection.
    pub fn active_bookings(&self, key: &WeekKey) -> Vec<Booking> {
        self.weeks
            .lock()
            .unwrap()
            .get(key)
            .map(|snapshot| {
                snapshot
                    .iter()
                    .filter(|c| c.booking.is_active())
                    .map(|c| c.booking.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn insert_provisional(&self, key: &WeekKey, booking: Booking) {
        self.weeks
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(CachedBooking::provisional(booking));
    }

    /// Marks every provisional record in the partition authoritative. Used
    /// when the write succeeded but the confirming re-read did not.
    pub fn promote_provisional(&self, key: &WeekKey) {
        if let Some(snapshot) = self.weeks.lock().unwrap().get_mut(key) {
            for cached in snapshot.iter_mut() {
                cached.provisional = false;
            }
        }
    }

    pub fn remove_booking(&self, key: &WeekKey, booking_id: &str) {
        if let Some(snapshot) = self.weeks.lock().unwrap().get_mut(key) {
            snapshot.retain(|c| c.booking.id != booking_id);
        }
    }

    pub fn find_booking(&self, booking_id: &str) -> Option<Booking> {
        self.weeks
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|c| c.booking.id == booking_id)
            .map(|c| c.booking.clone())
    }

    pub fn replace_user_list(&self, user_id: &str, bookings: Vec<Booking>) {
        self.user_lists
            .lock()
            .unwrap()
            .insert(user_id.to_string(), bookings);
    }

    pub fn user_list(&self, user_id: &str) -> Option<Vec<Booking>> {
        self.user_lists.lock().unwrap().get(user_id).cloned()
    }

    pub fn remove_from_user_list(&self, user_id: &str, booking_id: &str) {
        if let Some(list) = self.user_lists.lock().unwrap().get_mut(user_id) {
            list.retain(|b| b.id != booking_id);
        }
    }

    /// Capture pre-images of the partitions (and optionally one user list)
    /// an optimistic update is about to touch. `rollback` on the returned
    /// record restores them exactly; dropping it commits nothing either way.
    pub fn begin_optimistic<'a>(
        &'a self,
        keys: &[WeekKey],
        user_id: Option<&str>,
    ) -> OptimisticUpdate<'a> {
        let weeks = self.weeks.lock().unwrap();
        let pre_weeks = keys
            .iter()
            .map(|key| (key.clone(), weeks.get(key).cloned()))
            .collect();
        drop(weeks);

        let pre_user = user_id.map(|id| {
            (
                id.to_string(),
                self.user_lists.lock().unwrap().get(id).cloned(),
            )
        });

        OptimisticUpdate {
            cache: self,
            pre_weeks,
            pre_user,
        }
    }
}

/// First-class rollback record for one optimistic update.
pub struct OptimisticUpdate<'a> {
    cache: &'a BookingCache,
    pre_weeks: Vec<(WeekKey, Option<Vec<CachedBooking>>)>,
    pre_user: Option<(String, Option<Vec<Booking>>)>,
}

impl OptimisticUpdate<'_> {
    /// Restore every touched entry to its captured pre-image. Entries that
    /// did not exist before the update are removed again.
    pub fn rollback(self) {
        let mut weeks = self.cache.weeks.lock().unwrap();
        for (key, pre) in self.pre_weeks {
            match pre {
                Some(snapshot) => {
                    weeks.insert(key, snapshot);
                }
                None => {
                    weeks.remove(&key);
                }
            }
        }
        drop(weeks);

        if let Some((user_id, pre)) = self.pre_user {
            let mut lists = self.cache.user_lists.lock().unwrap();
            match pre {
                Some(list) => {
                    lists.insert(user_id, list);
                }
                None => {
                    lists.remove(&user_id);
                }
            }
        }
    }
}
