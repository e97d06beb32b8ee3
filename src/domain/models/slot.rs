use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::domain::models::rules::SelectionRules;

/// A fixed-duration, grid-aligned interval on one machine. Generated on
/// demand from the opening grid, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub machine_id: String,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, machine_id: impl Into<String>, rules: &SelectionRules) -> Self {
        Self {
            start_time: start,
            end_time: start + Duration::minutes(rules.slot_duration_min as i64),
            machine_id: machine_id.into(),
        }
    }

    /// Set membership identity: `(start_time, machine_id)`.
    pub fn same_slot(&self, other: &TimeSlot) -> bool {
        self.start_time == other.start_time && self.machine_id == other.machine_id
    }

    /// Calendar day of the slot start in the venue's local timezone.
    pub fn local_day(&self, tz: &Tz) -> NaiveDate {
        self.start_time.with_timezone(tz).date_naive()
    }

    pub fn week_id(&self, tz: &Tz) -> String {
        week_id_for(self.start_time, tz)
    }
}

/// Partition key for bounded availability queries, derived once from the
/// slot's local calendar date.
pub fn week_id_for(instant: DateTime<Utc>, tz: &Tz) -> String {
    week_id_of_date(instant.with_timezone(tz).date_naive())
}

pub fn week_id_of_date(date: NaiveDate) -> String {
    let iso = date.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Generate the bookable grid for one machine over the week starting at
/// `week_monday`. Days outside `days_of_week` produce nothing; local times
/// skipped or doubled by a DST transition are dropped rather than guessed.
pub fn slots_for_week(
    machine_id: &str,
    week_monday: NaiveDate,
    rules: &SelectionRules,
) -> Vec<TimeSlot> {
    let tz = rules.tz();
    let mut slots = Vec::new();

    let duration_min = rules.slot_duration_min;
    if duration_min == 0 {
        return slots;
    }

    let open_idx = rules.opening_time.hour() * 60 + rules.opening_time.minute();
    let close_idx = rules.closing_time.hour() * 60 + rules.closing_time.minute();

    for offset in 0..7 {
        let date = week_monday + Duration::days(offset);
        if !rules.days_of_week.contains(&date.weekday()) {
            continue;
        }

        let mut cursor = open_idx;
        while cursor + duration_min <= close_idx {
            if let Some(nt) = NaiveTime::from_hms_opt(cursor / 60, cursor % 60, 0) {
                if let Some(local) = tz.from_local_datetime(&date.and_time(nt)).single() {
                    slots.push(TimeSlot::new(local.with_timezone(&Utc), machine_id, rules));
                }
            }
            cursor += duration_min;
        }
    }

    slots
}
