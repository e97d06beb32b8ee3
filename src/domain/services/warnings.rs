use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::domain::models::rules::SelectionRules;
use crate::domain::models::slot::TimeSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningLevel {
    /// One slot below a cap.
    Warning,
    /// Cap reached or exceeded.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionWarning {
    pub level: WarningLevel,
    pub message: String,
}

/// Advisory projection of the in-progress selection against the caps.
/// Pure: recomputed after every mutation, never persisted or sent anywhere.
pub fn derive_warnings(selected: &[TimeSlot], rules: &SelectionRules) -> Vec<SelectionWarning> {
    let tz = rules.tz();
    let mut warnings = Vec::new();

    if let Some(cap) = rules.max_slots_per_day {
        let mut per_day: BTreeMap<NaiveDate, u32> = BTreeMap::new();
        for slot in selected {
            *per_day.entry(slot.local_day(&tz)).or_default() += 1;
        }
        for (day, count) in per_day {
            if count >= cap {
                warnings.push(SelectionWarning {
                    level: WarningLevel::Error,
                    message: format!("daily limit of {cap} slots reached on {day}"),
                });
            } else if cap > 1 && count == cap - 1 {
                warnings.push(SelectionWarning {
                    level: WarningLevel::Warning,
                    message: format!("one slot left on {day} before the daily limit of {cap}"),
                });
            }
        }
    }

    if let Some(cap) = rules.max_slots_per_week {
        let mut per_week: BTreeMap<String, u32> = BTreeMap::new();
        for slot in selected {
            *per_week.entry(slot.week_id(&tz)).or_default() += 1;
        }
        for (week, count) in per_week {
            if count >= cap {
                warnings.push(SelectionWarning {
                    level: WarningLevel::Error,
                    message: format!("weekly limit of {cap} slots reached in week {week}"),
                });
            } else if cap > 1 && count == cap - 1 {
                warnings.push(SelectionWarning {
                    level: WarningLevel::Warning,
                    message: format!("one slot left in week {week} before the weekly limit of {cap}"),
                });
            }
        }
    }

    warnings
}
