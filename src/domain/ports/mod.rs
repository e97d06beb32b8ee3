use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::models::booking::{Booking, CancelPatch};
use crate::domain::models::slot::TimeSlot;
use crate::domain::services::validator::DenyReason;
use crate::error::EngineError;

/// Logical read/write operations against the backing document store.
/// Wire formats and the storage engine itself live behind this trait.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// All active bookings for one `(machine_id, week_id)` partition.
    async fn fetch_active_bookings(
        &self,
        machine_id: &str,
        week_id: &str,
    ) -> Result<Vec<Booking>, EngineError>;

    /// The user's own active bookings, ordered by start time.
    async fn fetch_user_bookings(&self, user_id: &str) -> Result<Vec<Booking>, EngineError>;

    /// All-or-nothing multi-record create. A partial batch must never land.
    async fn atomic_create(&self, bookings: &[Booking]) -> Result<(), EngineError>;

    /// Partial field update of one record; the domain model owns what a
    /// valid patch is.
    async fn update_status(
        &self,
        booking_id: &str,
        patch: &CancelPatch,
    ) -> Result<(), EngineError>;
}

pub type SnapshotFn = Arc<dyn Fn(Vec<Booking>) + Send + Sync>;
pub type FeedErrorFn = Arc<dyn Fn(EngineError) + Send + Sync>;

/// Standing-subscription capability. On every remote change the store pushes
/// the full current result set for the key, never a diff.
pub trait BookingFeed: Send + Sync {
    fn subscribe_active_bookings(
        &self,
        machine_id: &str,
        week_id: &str,
        on_change: SnapshotFn,
        on_error: FeedErrorFn,
    ) -> SubscriptionHandle;
}

/// Detaches the underlying listener when dropped or explicitly unsubscribed.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Outbound notifications for the UI/notification layers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SlotSelected(TimeSlot),
    SlotDeselected(TimeSlot),
    SelectionRejected {
        slot: TimeSlot,
        reason: DenyReason,
    },
    BookingCommitted(Vec<Booking>),
    BookingFailed {
        message: String,
        /// Conflicts are worded distinctly to discourage blind retry.
        conflict: bool,
    },
    BookingCancelled(Booking),
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Default sink for embeddings that do not care about events.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}
