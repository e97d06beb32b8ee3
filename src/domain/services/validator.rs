use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::models::booking::{Booking, BookingContext};
use crate::domain::models::rules::SelectionRules;
use crate::domain::models::slot::TimeSlot;

/// Why a slot may not join the in-progress selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("slot start is in the past")]
    PastSlot,
    #[error("no more than {0} slots per day")]
    DayCapReached(u32),
    #[error("no more than {0} slots per week")]
    WeekCapReached(u32),
    #[error("back-to-back slots are not allowed")]
    BackToBack,
}

/// Outcome of an interactive selection attempt. `AlreadySelected` is a
/// toggle-off signal for the caller, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectDecision {
    Allowed,
    AlreadySelected,
    Denied(DenyReason),
}

impl SelectDecision {
    pub fn can(&self) -> bool {
        !matches!(self, SelectDecision::Denied(_))
    }
}

/// Incremental admission check for one slot against the in-progress
/// selection. Admin contexts bypass the day/week caps but never the
/// past-time check.
///
/// Caps are inclusive ceilings evaluated before admission: the slot that
/// would become number `cap + 1` is denied, so at most `cap` slots pass.
pub fn can_select(
    slot: &TimeSlot,
    selection: &[TimeSlot],
    rules: &SelectionRules,
    now: DateTime<Utc>,
    admin: bool,
) -> SelectDecision {
    if selection.iter().any(|s| s.same_slot(slot)) {
        return SelectDecision::AlreadySelected;
    }

    if slot.start_time < now {
        return SelectDecision::Denied(DenyReason::PastSlot);
    }

    let tz = rules.tz();

    if !admin {
        if let Some(cap) = rules.max_slots_per_day {
            let day = slot.local_day(&tz);
            let on_day = selection.iter().filter(|s| s.local_day(&tz) == day).count();
            if on_day as u32 >= cap {
                return SelectDecision::Denied(DenyReason::DayCapReached(cap));
            }
        }

        if let Some(cap) = rules.max_slots_per_week {
            let week = slot.week_id(&tz);
            let in_week = selection.iter().filter(|s| s.week_id(&tz) == week).count();
            if in_week as u32 >= cap {
                return SelectDecision::Denied(DenyReason::WeekCapReached(cap));
            }
        }
    }

    if !rules.allow_back_to_back && abuts_any(slot, selection) {
        return SelectDecision::Denied(DenyReason::BackToBack);
    }

    SelectDecision::Allowed
}

fn abuts_any(slot: &TimeSlot, selection: &[TimeSlot]) -> bool {
    selection.iter().any(|s| {
        s.machine_id == slot.machine_id
            && (s.end_time == slot.start_time || s.start_time == slot.end_time)
    })
}

/// True iff no active booking on the same machine overlaps
/// `[start_time, end_time)`.
pub fn is_available(slot: &TimeSlot, existing: &[Booking]) -> bool {
    !existing.iter().any(|b| {
        b.is_active()
            && b.machine_id == slot.machine_id
            && b.overlaps(slot.start_time, slot.end_time)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelDeny {
    #[error("booking is already cancelled")]
    AlreadyCancelled,
    #[error("booking belongs to another user")]
    NotOwner,
    #[error("booking has already started")]
    InPast,
    #[error("bookings must be cancelled at least {0} hours in advance")]
    TooLate(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelDecision {
    Allowed,
    Denied(CancelDeny),
}

impl CancelDecision {
    pub fn can(&self) -> bool {
        matches!(self, CancelDecision::Allowed)
    }
}

/// Whether `ctx` may cancel `booking`. Admins may cancel on behalf of other
/// users and inside the notice window, but nobody cancels the past.
pub fn can_cancel(
    booking: &Booking,
    ctx: &BookingContext,
    rules: &SelectionRules,
    now: DateTime<Utc>,
) -> CancelDecision {
    if !booking.is_active() {
        return CancelDecision::Denied(CancelDeny::AlreadyCancelled);
    }

    if booking.start_time <= now {
        return CancelDecision::Denied(CancelDeny::InPast);
    }

    if !ctx.is_admin {
        if booking.user_id != ctx.user_id {
            return CancelDecision::Denied(CancelDeny::NotOwner);
        }

        if let Some(hours) = rules.min_hours_to_cancel {
            if booking.start_time - now < Duration::hours(hours) {
                return CancelDecision::Denied(CancelDeny::TooLate(hours));
            }
        }
    }

    CancelDecision::Allowed
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchIssue {
    #[error("slot {start} is no longer available")]
    Unavailable { start: DateTime<Utc> },
    #[error("slot {start} is in the past")]
    PastSlot { start: DateTime<Utc> },
    #[error("slot {start} appears twice in the batch")]
    Duplicate { start: DateTime<Utc> },
    #[error("daily limit of {cap} slots exceeded on {day}")]
    DayCapExceeded { day: NaiveDate, cap: u32 },
    #[error("weekly limit of {cap} slots exceeded in week {week}")]
    WeekCapExceeded { week: String, cap: u32 },
    #[error("slots {first} and {second} are back-to-back")]
    BackToBack {
        first: DateTime<Utc>,
        second: DateTime<Utc>,
    },
}

impl BatchIssue {
    pub fn is_conflict(&self) -> bool {
        matches!(self, BatchIssue::Unavailable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchValidation {
    pub valid: bool,
    pub errors: Vec<BatchIssue>,
}

/// Final pre-commit gate over the whole batch. The incremental checks in
/// `can_select` only saw the world as it was at selection time; this re-runs
/// every rule from scratch against the latest known bookings so conflicts
/// introduced by other users between selection and commit are caught here.
pub fn validate_booking(
    slots: &[TimeSlot],
    rules: &SelectionRules,
    existing: &[Booking],
    now: DateTime<Utc>,
    admin: bool,
) -> BatchValidation {
    let tz = rules.tz();
    let mut errors = Vec::new();

    for (i, slot) in slots.iter().enumerate() {
        if slot.start_time < now {
            errors.push(BatchIssue::PastSlot {
                start: slot.start_time,
            });
        }

        if !is_available(slot, existing) {
            errors.push(BatchIssue::Unavailable {
                start: slot.start_time,
            });
        }

        if slots[..i].iter().any(|s| s.same_slot(slot)) {
            errors.push(BatchIssue::Duplicate {
                start: slot.start_time,
            });
        }
    }

    if !admin {
        if let Some(cap) = rules.max_slots_per_day {
            let mut per_day: HashMap<NaiveDate, u32> = HashMap::new();
            for slot in slots {
                *per_day.entry(slot.local_day(&tz)).or_default() += 1;
            }
            for (day, count) in per_day {
                if count > cap {
                    errors.push(BatchIssue::DayCapExceeded { day, cap });
                }
            }
        }

        if let Some(cap) = rules.max_slots_per_week {
            let mut per_week: HashMap<String, u32> = HashMap::new();
            for slot in slots {
                *per_week.entry(slot.week_id(&tz)).or_default() += 1;
            }
            for (week, count) in per_week {
                if count > cap {
                    errors.push(BatchIssue::WeekCapExceeded { week, cap });
                }
            }
        }
    }

    if !rules.allow_back_to_back {
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                if a.machine_id == b.machine_id
                    && (a.end_time == b.start_time || b.end_time == a.start_time)
                {
                    errors.push(BatchIssue::BackToBack {
                        first: a.start_time.min(b.start_time),
                        second: a.start_time.max(b.start_time),
                    });
                }
            }
        }
    }

    BatchValidation {
        valid: errors.is_empty(),
        errors,
    }
}
