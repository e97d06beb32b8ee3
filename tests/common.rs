use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use booking_engine::config::EngineConfig;
use booking_engine::domain::models::booking::{
    Booking, BookingContext, CancelPatch, NewBookingParams,
};
use booking_engine::domain::models::rules::SelectionRules;
use booking_engine::domain::models::slot::{week_start, TimeSlot};
use booking_engine::domain::ports::{BookingStore, EngineEvent, EventSink};
use booking_engine::engine::BookingSession;
use booking_engine::error::EngineError;
use booking_engine::infra::memory::MemoryStore;
use booking_engine::state::EngineState;

/// Records every outbound engine event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Store wrapper with injectable outages and call counting, so retry and
/// rollback paths can be driven deterministically.
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_creates: AtomicUsize,
    fail_updates: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_creates: AtomicUsize::new(0),
            fail_updates: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.fail_updates.store(n, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BookingStore for FlakyStore {
    async fn fetch_active_bookings(
        &self,
        machine_id: &str,
        week_id: &str,
    ) -> Result<Vec<Booking>, EngineError> {
        self.inner.fetch_active_bookings(machine_id, week_id).await
    }

    async fn fetch_user_bookings(&self, user_id: &str) -> Result<Vec<Booking>, EngineError> {
        self.inner.fetch_user_bookings(user_id).await
    }

    async fn atomic_create(&self, bookings: &[Booking]) -> Result<(), EngineError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_creates) {
            return Err(EngineError::Store("injected outage".into()));
        }
        self.inner.atomic_create(bookings).await
    }

    async fn update_status(
        &self,
        booking_id: &str,
        patch: &CancelPatch,
    ) -> Result<(), EngineError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_updates) {
            return Err(EngineError::Store("injected outage".into()));
        }
        self.inner.update_status(booking_id, patch).await
    }
}

#[allow(dead_code)]
pub struct TestEnv {
    pub store: MemoryStore,
    pub flaky: Arc<FlakyStore>,
    pub events: Arc<RecordingSink>,
    pub state: EngineState,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        Self::with_rules(SelectionRules::default())
    }

    pub fn with_rules(rules: SelectionRules) -> Self {
        let store = MemoryStore::new();
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let events = Arc::new(RecordingSink::default());
        let state = EngineState::new(
            EngineConfig::with_rules(rules),
            flaky.clone(),
            Arc::new(store.clone()),
            events.clone(),
        );
        Self {
            store,
            flaky,
            events,
            state,
        }
    }

    pub fn session(&self, machine_id: &str, user_id: &str) -> BookingSession {
        BookingSession::new(
            &self.state,
            machine_id,
            "arcade",
            BookingContext::user(user_id, user_id),
        )
    }

    pub fn admin_session(&self, machine_id: &str, user_id: &str) -> BookingSession {
        BookingSession::new(
            &self.state,
            machine_id,
            "arcade",
            BookingContext::admin(user_id, user_id),
        )
    }
}

/// Monday of next week: always in the future, always a full open week.
#[allow(dead_code)]
pub fn next_week_monday() -> NaiveDate {
    week_start(Utc::now().date_naive()) + Duration::days(7)
}

#[allow(dead_code)]
pub fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap())
}

#[allow(dead_code)]
pub fn slot(machine_id: &str, start: DateTime<Utc>, rules: &SelectionRules) -> TimeSlot {
    TimeSlot::new(start, machine_id, rules)
}

/// Insert a booking straight into the store, bypassing the engine — the
/// "another user booked it" side of every concurrency scenario.
#[allow(dead_code)]
pub async fn seed_booking(
    store: &MemoryStore,
    machine_id: &str,
    user_id: &str,
    start: DateTime<Utc>,
) -> Booking {
    let booking = Booking::new(NewBookingParams {
        user_id: user_id.into(),
        username: user_id.into(),
        machine_id: machine_id.into(),
        category_id: "arcade".into(),
        start,
        end: start + Duration::hours(1),
        tz: chrono_tz::UTC,
    });
    store.atomic_create(std::slice::from_ref(&booking)).await.unwrap();
    booking
}
