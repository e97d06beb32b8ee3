use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::slot::week_id_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Active,
    Cancelled,
}

/// A persisted reservation of exactly one slot by one user. Mutated only by
/// the `active -> cancelled` status transition, never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub machine_id: String,
    pub category_id: String,
    pub week_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
}

pub struct NewBookingParams {
    pub user_id: String,
    pub username: String,
    pub machine_id: String,
    pub category_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tz: Tz,
}

impl Booking {
    pub fn new(params: NewBookingParams) -> Self {
        // week_id is derived exactly once here and never recomputed.
        let week_id = week_id_for(params.start, &params.tz);

        Self {
            id: Uuid::new_v4().to_string(),
            user_id: params.user_id,
            username: params.username,
            machine_id: params.machine_id,
            category_id: params.category_id,
            week_id,
            start_time: params.start,
            end_time: params.end,
            status: BookingStatus::Active,
            created_at: Utc::now(),
            cancelled_at: None,
            cancelled_by: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    /// Half-open interval overlap against `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time > start
    }
}

/// The only patch the domain model accepts against a persisted booking.
/// The store applies it as a partial field update of the identified record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPatch {
    pub status: BookingStatus,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: String,
}

impl CancelPatch {
    pub fn by(user_id: &str) -> Self {
        Self {
            status: BookingStatus::Cancelled,
            cancelled_at: Utc::now(),
            cancelled_by: user_id.to_string(),
        }
    }
}

/// Identity supplied by the external auth context.
#[derive(Debug, Clone)]
pub struct BookingContext {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
}

impl BookingContext {
    pub fn user(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            is_admin: true,
        }
    }
}
