use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Booking policy for one machine category. Supplied by an external
/// configuration loader and read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRules {
    pub slot_duration_min: u32,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub days_of_week: Vec<Weekday>,
    pub max_slots_per_day: Option<u32>,
    pub max_slots_per_week: Option<u32>,
    pub max_weeks_in_advance: Option<u32>,
    pub min_hours_to_cancel: Option<i64>,
    pub allow_back_to_back: bool,
    /// IANA name of the venue's local timezone. Calendar-day grouping and
    /// week partitioning happen in this zone, never in UTC.
    pub timezone: String,
}

impl SelectionRules {
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

impl Default for SelectionRules {
    fn default() -> Self {
        Self {
            slot_duration_min: 60,
            opening_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            closing_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            days_of_week: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
            max_slots_per_day: None,
            max_slots_per_week: None,
            max_weeks_in_advance: None,
            min_hours_to_cancel: None,
            allow_back_to_back: true,
            timezone: "UTC".to_string(),
        }
    }
}
