use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::models::booking::{Booking, BookingContext, CancelPatch, NewBookingParams};
use crate::domain::models::rules::SelectionRules;
use crate::domain::models::slot::TimeSlot;
use crate::domain::ports::{BookingStore, EngineEvent, EventSink};
use crate::domain::services::validator::{can_cancel, validate_booking, CancelDecision, CancelDeny};
use crate::engine::cache::{BookingCache, WeekKey};
use crate::error::EngineError;

/// Fixed pause before the single automatic retry. Backoff beyond that is
/// the transport's job.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Commits a selection as reservation records and retracts single bookings,
/// with optimistic local updates rolled back on failure. The selection
/// itself is owned by the caller and survives every failure path.
pub struct TransactionManager {
    store: Arc<dyn BookingStore>,
    cache: Arc<BookingCache>,
    events: Arc<dyn EventSink>,
}

impl TransactionManager {
    pub fn new(
        store: Arc<dyn BookingStore>,
        cache: Arc<BookingCache>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            cache,
            events,
        }
    }

    /// Create one booking per selected slot as a single all-or-nothing
    /// write. Validation runs against the latest known snapshots before any
    /// mutation; the optimistic insert is rolled back to its captured
    /// pre-image if the write fails.
    pub async fn commit(
        &self,
        slots: &[TimeSlot],
        ctx: &BookingContext,
        category_id: &str,
        rules: &SelectionRules,
    ) -> Result<Vec<Booking>, EngineError> {
        if ctx.user_id.is_empty() {
            return Err(EngineError::MissingContext("user id".into()));
        }
        if category_id.is_empty() {
            return Err(EngineError::MissingContext("category id".into()));
        }
        if slots.is_empty() {
            return Err(EngineError::Validation("no slots selected".into()));
        }
        if slots.iter().any(|s| s.machine_id.is_empty()) {
            return Err(EngineError::MissingContext("machine id".into()));
        }

        let tz = rules.tz();
        let mut keys: Vec<WeekKey> = slots
            .iter()
            .map(|s| (s.machine_id.clone(), s.week_id(&tz)))
            .collect();
        keys.sort();
        keys.dedup();

        // Weeks never viewed this session have no snapshot yet; pull one so
        // the final gate does not validate against thin air.
        for key in &keys {
            if !self.cache.contains_week(key) {
                let fresh = self.store.fetch_active_bookings(&key.0, &key.1).await?;
                self.cache.replace_week(key, fresh);
            }
        }

        let existing: Vec<Booking> = keys
            .iter()
            .flat_map(|key| self.cache.active_bookings(key))
            .collect();

        let report = validate_booking(slots, rules, &existing, Utc::now(), ctx.is_admin);
        if !report.valid {
            let conflict = report.errors.iter().any(|e| e.is_conflict());
            let message = report
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(user = %ctx.user_id, %message, "commit rejected by final validation");
            return Err(if conflict {
                EngineError::Conflict(message)
            } else {
                EngineError::Validation(message)
            });
        }

        let bookings: Vec<Booking> = slots
            .iter()
            .map(|slot| {
                Booking::new(NewBookingParams {
                    user_id: ctx.user_id.clone(),
                    username: ctx.username.clone(),
                    machine_id: slot.machine_id.clone(),
                    category_id: category_id.to_string(),
                    start: slot.start_time,
                    end: slot.end_time,
                    tz,
                })
            })
            .collect();

        let txn = self.cache.begin_optimistic(&keys, None);
        for booking in &bookings {
            let key = (booking.machine_id.clone(), booking.week_id.clone());
            self.cache.insert_provisional(&key, booking.clone());
        }

        info!(user = %ctx.user_id, count = bookings.len(), "committing booking batch");
        match self
            .write_with_retry(|| self.store.atomic_create(&bookings))
            .await
        {
            Ok(()) => {
                for key in &keys {
                    match self.store.fetch_active_bookings(&key.0, &key.1).await {
                        Ok(fresh) => self.cache.replace_week(key, fresh),
                        Err(err) => {
                            // The write went through; the provisional records
                            // are what the store now holds.
                            warn!(%err, "post-commit refresh failed, keeping local records");
                            self.cache.promote_provisional(key);
                        }
                    }
                }
                self.refresh_user_list(&ctx.user_id).await;

                info!(user = %ctx.user_id, count = bookings.len(), "booking batch committed");
                self.events
                    .emit(EngineEvent::BookingCommitted(bookings.clone()));
                Ok(bookings)
            }
            Err(err) => {
                txn.rollback();
                warn!(user = %ctx.user_id, %err, "booking batch failed, optimistic update rolled back");
                self.events.emit(EngineEvent::BookingFailed {
                    message: err.to_string(),
                    conflict: matches!(err, EngineError::Conflict(_)),
                });
                Err(err)
            }
        }
    }

    /// Transition one booking `active -> cancelled`. The record is patched,
    /// never deleted; both the week cache and the owner's booking list are
    /// optimistically updated and restored on failure.
    pub async fn cancel(
        &self,
        booking_id: &str,
        ctx: &BookingContext,
        rules: &SelectionRules,
    ) -> Result<Booking, EngineError> {
        if ctx.user_id.is_empty() {
            return Err(EngineError::MissingContext("user id".into()));
        }

        let booking = self.locate(booking_id, ctx).await?;

        if let CancelDecision::Denied(reason) = can_cancel(&booking, ctx, rules, Utc::now()) {
            warn!(booking = booking_id, %reason, "cancellation rejected");
            return Err(match reason {
                CancelDeny::AlreadyCancelled => EngineError::Conflict(reason.to_string()),
                _ => EngineError::Validation(reason.to_string()),
            });
        }

        let key = (booking.machine_id.clone(), booking.week_id.clone());
        let txn = self.cache.begin_optimistic(&[key.clone()], Some(&booking.user_id));
        self.cache.remove_booking(&key, booking_id);
        self.cache.remove_from_user_list(&booking.user_id, booking_id);

        let patch = CancelPatch::by(&ctx.user_id);
        match self
            .write_with_retry(|| self.store.update_status(booking_id, &patch))
            .await
        {
            Ok(()) => {
                match self.store.fetch_active_bookings(&key.0, &key.1).await {
                    Ok(fresh) => self.cache.replace_week(&key, fresh),
                    Err(err) => warn!(%err, "post-cancel refresh failed"),
                }
                self.refresh_user_list(&booking.user_id).await;

                let mut cancelled = booking;
                cancelled.status = patch.status;
                cancelled.cancelled_at = Some(patch.cancelled_at);
                cancelled.cancelled_by = Some(patch.cancelled_by.clone());

                info!(booking = booking_id, by = %ctx.user_id, "booking cancelled");
                self.events
                    .emit(EngineEvent::BookingCancelled(cancelled.clone()));
                Ok(cancelled)
            }
            Err(err) => {
                txn.rollback();
                warn!(booking = booking_id, %err, "cancellation failed, caches restored");
                self.events.emit(EngineEvent::BookingFailed {
                    message: err.to_string(),
                    conflict: false,
                });
                Err(err)
            }
        }
    }

    async fn locate(&self, booking_id: &str, ctx: &BookingContext) -> Result<Booking, EngineError> {
        if let Some(list) = self.cache.user_list(&ctx.user_id) {
            if let Some(found) = list.into_iter().find(|b| b.id == booking_id) {
                return Ok(found);
            }
        }
        if let Some(found) = self.cache.find_booking(booking_id) {
            return Ok(found);
        }
        let fetched = self.store.fetch_user_bookings(&ctx.user_id).await?;
        fetched
            .into_iter()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))
    }

    async fn refresh_user_list(&self, user_id: &str) {
        match self.store.fetch_user_bookings(user_id).await {
            Ok(list) => self.cache.replace_user_list(user_id, list),
            Err(err) => warn!(%err, "user booking list refresh failed"),
        }
    }

    /// One automatic retry on transient store failures. Business-rule
    /// rejections come back unchanged on the first attempt.
    async fn write_with_retry<F, Fut>(&self, op: F) -> Result<(), EngineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        match op().await {
            Err(err) if err.is_transient() => {
                warn!(%err, "transient store failure, retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                op().await
            }
            other => other,
        }
    }
}
