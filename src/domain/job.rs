//! Durable deferred job bound to one appointment.
//!
//! Jobs are persisted rows, not in-process timers: they survive restarts
//! and are claimed by the runner with row locks. A job that fires after
//! its appointment has moved on is a guaranteed no-op, which is how a
//! stale job is "cancelled" without a cancel API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    ExpireBankTransfer,
    Reminder,
    AutoComplete,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ExpireBankTransfer => "expire_bank_transfer",
            JobKind::Reminder => "reminder",
            JobKind::AutoComplete => "auto_complete",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expire_bank_transfer" => Ok(JobKind::ExpireBankTransfer),
            "reminder" => Ok(JobKind::Reminder),
            "auto_complete" => Ok(JobKind::AutoComplete),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderVariant {
    MorningOf,
    OneHourBefore,
}

impl ReminderVariant {
    /// Fire time computed from the lesson start. Morning-of is pinned to
    /// 09:00 on the lesson date.
    pub fn fire_at(&self, scheduled_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ReminderVariant::MorningOf => {
                let morning = scheduled_at
                    .date_naive()
                    .and_hms_opt(9, 0, 0)
                    .unwrap_or_else(|| scheduled_at.naive_utc());
                Utc.from_utc_datetime(&morning)
            }
            ReminderVariant::OneHourBefore => scheduled_at - Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub variant: ReminderVariant,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeferredJob {
    pub id: Uuid,
    pub kind: String,
    pub appointment_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeferredJob {
    pub fn new(
        kind: JobKind,
        appointment_id: Uuid,
        run_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: kind.as_str().to_string(),
            appointment_id,
            run_at,
            payload,
            status: "pending".to_string(),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
