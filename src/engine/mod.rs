pub mod cache;
pub mod selection;
pub mod sync;
pub mod txn;

use std::sync::Arc;

use crate::domain::models::booking::{Booking, BookingContext};
use crate::domain::models::rules::SelectionRules;
use crate::domain::models::slot::{week_id_of_date, TimeSlot};
use crate::domain::services::validator::SelectDecision;
use crate::domain::services::warnings::SelectionWarning;
use crate::engine::selection::{SelectionController, WeekDirection};
use crate::engine::sync::{DeltaFn, WeekSync};
use crate::engine::txn::TransactionManager;
use crate::error::EngineError;
use crate::state::EngineState;

/// One user's booking session on one machine: wires the selection
/// controller, the live week mirror, and the transaction manager together,
/// and owns the orchestration rules — clear the selection only after a
/// successful commit, keep it intact on every failure so a retry needs no
/// re-selection.
pub struct BookingSession {
    ctx: BookingContext,
    category_id: String,
    rules: SelectionRules,
    controller: SelectionController,
    sync: WeekSync,
    txn: TransactionManager,
}

impl BookingSession {
    pub fn new(
        state: &EngineState,
        machine_id: impl Into<String>,
        category_id: impl Into<String>,
        ctx: BookingContext,
    ) -> Self {
        let rules = state.config.rules.clone();
        let machine_id = machine_id.into();
        Self {
            controller: SelectionController::new(
                machine_id,
                rules.clone(),
                ctx.clone(),
                Arc::clone(&state.events),
            ),
            sync: WeekSync::new(
                Arc::clone(&state.store),
                Arc::clone(&state.feed),
                Arc::clone(&state.cache),
            ),
            txn: TransactionManager::new(
                Arc::clone(&state.store),
                Arc::clone(&state.cache),
                Arc::clone(&state.events),
            ),
            ctx,
            category_id: category_id.into(),
            rules,
        }
    }

    fn cursor_week_id(&self) -> String {
        week_id_of_date(self.controller.week_cursor())
    }

    /// Point-in-time load of the week in view.
    pub async fn load_week(&self) -> Result<Vec<Booking>, EngineError> {
        self.sync
            .refresh(self.controller.machine_id(), &self.cursor_week_id())
            .await
    }

    /// Start (or re-point) the live mirror at the week in view.
    pub fn watch_week(&self) {
        self.sync
            .watch(self.controller.machine_id(), &self.cursor_week_id());
    }

    pub fn on_delta(&self, listener: DeltaFn) {
        self.sync.on_delta(listener);
    }

    pub fn toggle_slot(&mut self, slot: TimeSlot) -> SelectDecision {
        self.controller.toggle_slot(slot)
    }

    /// Week navigation re-points the live mirror, which resets the diffing
    /// baseline for the newly-viewed week.
    pub fn navigate_week(&mut self, direction: WeekDirection) -> bool {
        let moved = self.controller.navigate_week(direction);
        if moved {
            self.watch_week();
        }
        moved
    }

    pub fn go_to_today(&mut self) {
        self.controller.go_to_today();
        self.watch_week();
    }

    pub fn clear_selection(&mut self) {
        self.controller.clear_selection();
    }

    pub fn selected_slots(&self) -> &[TimeSlot] {
        self.controller.selected_slots()
    }

    pub fn warnings(&self) -> &[SelectionWarning] {
        self.controller.warnings()
    }

    pub fn visible_slots(&self) -> Vec<TimeSlot> {
        self.controller.visible_slots()
    }

    pub fn week_cursor(&self) -> chrono::NaiveDate {
        self.controller.week_cursor()
    }

    /// Commit the current selection as one atomic batch.
    pub async fn commit(&mut self) -> Result<Vec<Booking>, EngineError> {
        let slots = self.controller.selected_slots().to_vec();
        let booked = self
            .txn
            .commit(&slots, &self.ctx, &self.category_id, &self.rules)
            .await?;
        self.controller.clear_selection();
        Ok(booked)
    }

    pub async fn cancel(&self, booking_id: &str) -> Result<Booking, EngineError> {
        self.txn.cancel(booking_id, &self.ctx, &self.rules).await
    }

    pub fn sync(&self) -> &WeekSync {
        &self.sync
    }

    /// Drop the live subscription, e.g. when the booking view goes away.
    /// Cached snapshots stay behind for the next session.
    pub fn close(&self) {
        self.sync.stop();
    }
}
