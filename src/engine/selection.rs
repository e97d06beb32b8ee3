use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::domain::models::booking::BookingContext;
use crate::domain::models::rules::SelectionRules;
use crate::domain::models::slot::{slots_for_week, week_start, TimeSlot};
use crate::domain::ports::{EngineEvent, EventSink};
use crate::domain::services::validator::{can_select, SelectDecision};
use crate::domain::services::warnings::{derive_warnings, SelectionWarning};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekDirection {
    Previous,
    Next,
}

/// Client-side state machine for the in-progress, not-yet-committed
/// selection and the week being viewed. All mutation is synchronous, so
/// within one session toggles are naturally serialized.
pub struct SelectionController {
    machine_id: String,
    rules: SelectionRules,
    ctx: BookingContext,
    events: Arc<dyn EventSink>,
    selected: Vec<TimeSlot>,
    cursor: NaiveDate,
    warnings: Vec<SelectionWarning>,
}

impl SelectionController {
    pub fn new(
        machine_id: impl Into<String>,
        rules: SelectionRules,
        ctx: BookingContext,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let cursor = week_start(Self::today(&rules));
        Self {
            machine_id: machine_id.into(),
            rules,
            ctx,
            events,
            selected: Vec::new(),
            cursor,
            warnings: Vec::new(),
        }
    }

    fn today(rules: &SelectionRules) -> NaiveDate {
        Utc::now().with_timezone(&rules.tz()).date_naive()
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn selected_slots(&self) -> &[TimeSlot] {
        &self.selected
    }

    pub fn warnings(&self) -> &[SelectionWarning] {
        &self.warnings
    }

    /// Monday of the week currently in view.
    pub fn week_cursor(&self) -> NaiveDate {
        self.cursor
    }

    /// The bookable grid for the week in view.
    pub fn visible_slots(&self) -> Vec<TimeSlot> {
        slots_for_week(&self.machine_id, self.cursor, &self.rules)
    }

    /// Select or deselect one slot. Deselection is never blocked; selection
    /// runs the incremental rule check and leaves state untouched on denial.
    pub fn toggle_slot(&mut self, slot: TimeSlot) -> SelectDecision {
        self.toggle_slot_at(slot, Utc::now())
    }

    pub fn toggle_slot_at(&mut self, slot: TimeSlot, now: DateTime<Utc>) -> SelectDecision {
        let decision = can_select(&slot, &self.selected, &self.rules, now, self.ctx.is_admin);

        match &decision {
            SelectDecision::AlreadySelected => {
                self.selected.retain(|s| !s.same_slot(&slot));
                self.refresh_warnings();
                self.events.emit(EngineEvent::SlotDeselected(slot));
            }
            SelectDecision::Allowed => {
                self.selected.push(slot.clone());
                self.refresh_warnings();
                self.events.emit(EngineEvent::SlotSelected(slot));
            }
            SelectDecision::Denied(reason) => {
                debug!(machine = %self.machine_id, start = %slot.start_time, %reason, "slot rejected");
                self.events.emit(EngineEvent::SelectionRejected {
                    slot,
                    reason: reason.clone(),
                });
            }
        }

        decision
    }

    /// Move the cursor one week. Bounded below by the current week and above
    /// by `max_weeks_in_advance`; the selection survives navigation so a
    /// multi-week batch can be built before a single commit.
    pub fn navigate_week(&mut self, direction: WeekDirection) -> bool {
        let today = Self::today(&self.rules);
        let candidate = match direction {
            WeekDirection::Previous => self.cursor - Duration::days(7),
            WeekDirection::Next => self.cursor + Duration::days(7),
        };

        if candidate < week_start(today) {
            return false;
        }
        if let Some(weeks) = self.rules.max_weeks_in_advance {
            let latest = week_start(today + Duration::weeks(weeks as i64));
            if candidate > latest {
                return false;
            }
        }

        self.cursor = candidate;
        true
    }

    pub fn go_to_today(&mut self) {
        self.cursor = week_start(Self::today(&self.rules));
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
        self.refresh_warnings();
    }

    fn refresh_warnings(&mut self) {
        self.warnings = derive_warnings(&self.selected, &self.rules);
    }
}
