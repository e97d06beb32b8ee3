use std::env;

use chrono::{NaiveTime, Weekday};

use crate::domain::models::rules::SelectionRules;

#[derive(Clone)]
pub struct EngineConfig {
    pub rules: SelectionRules,
}

impl EngineConfig {
    /// Default rules, overridable per variable. Values come from the same
    /// external configuration source that supplies machine categories.
    pub fn from_env() -> Self {
        let defaults = SelectionRules::default();

        let rules = SelectionRules {
            slot_duration_min: env::var("SLOT_DURATION_MIN")
                .unwrap_or_else(|_| defaults.slot_duration_min.to_string())
                .parse()
                .expect("SLOT_DURATION_MIN must be a number of minutes"),
            opening_time: parse_time("OPENING_TIME", defaults.opening_time),
            closing_time: parse_time("CLOSING_TIME", defaults.closing_time),
            days_of_week: parse_days("OPEN_DAYS", defaults.days_of_week),
            max_slots_per_day: parse_opt("MAX_SLOTS_PER_DAY"),
            max_slots_per_week: parse_opt("MAX_SLOTS_PER_WEEK"),
            max_weeks_in_advance: parse_opt("MAX_WEEKS_IN_ADVANCE"),
            min_hours_to_cancel: parse_opt("MIN_HOURS_TO_CANCEL"),
            allow_back_to_back: env::var("ALLOW_BACK_TO_BACK")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.allow_back_to_back),
            timezone: env::var("BOOKING_TIMEZONE").unwrap_or(defaults.timezone),
        };

        Self { rules }
    }

    pub fn with_rules(rules: SelectionRules) -> Self {
        Self { rules }
    }
}

fn parse_time(key: &str, default: NaiveTime) -> NaiveTime {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(&raw, "%H:%M")
            .unwrap_or_else(|_| panic!("{key} must be HH:MM")),
        Err(_) => default,
    }
}

fn parse_days(key: &str, default: Vec<Weekday>) -> Vec<Weekday> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|day| {
                day.trim()
                    .parse()
                    .unwrap_or_else(|_| panic!("{key} must be a comma-separated list of weekdays"))
            })
            .collect(),
        Err(_) => default,
    }
}

fn parse_opt<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.parse().ok())
}
