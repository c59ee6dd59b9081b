use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReminderSchedule {
    /// Fires exactly once when the local minute matches, then is removed.
    /// A tick skipped past the minute misses it; there is no catch-up.
    Once {
        /// `"YYYY-MM-DD HH:MM"` in the configured zone.
        due_at: String,
    },
    /// Fires every day at the given `"HH:MM"` minute.
    Daily { time_of_day: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    #[serde(flatten)]
    pub schedule: ReminderSchedule,
    pub created_at: DateTime<Utc>,
    /// Date of the last daily firing; guards re-fires within the minute.
    #[serde(default)]
    pub last_fired_on: Option<String>,
}

pub fn new_reminder_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("R{}", &raw[..8])
}

impl Reminder {
    pub fn once(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        due_at: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Reminder {
            id: new_reminder_id(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            schedule: ReminderSchedule::Once {
                due_at: due_at.into(),
            },
            created_at,
            last_fired_on: None,
        }
    }

    pub fn daily(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        time_of_day: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Reminder {
            id: new_reminder_id(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            schedule: ReminderSchedule::Daily {
                time_of_day: time_of_day.into(),
            },
            created_at,
            last_fired_on: None,
        }
    }

    pub fn is_once(&self) -> bool {
        matches!(self.schedule, ReminderSchedule::Once { .. })
    }

    /// Whether this reminder matches the tick minute.
    pub fn due_at_minute(&self, now: &DateTime<FixedOffset>) -> bool {
        match &self.schedule {
            ReminderSchedule::Once { due_at } => clock::minute_key(now) == due_at.trim(),
            ReminderSchedule::Daily { time_of_day } => {
                clock::hhmm_key(now) == time_of_day.trim()
                    && self.last_fired_on.as_deref() != Some(clock::date_key(now).as_str())
            }
        }
    }

    /// One-line form for the management `remind list` reply.
    pub fn describe(&self) -> String {
        match &self.schedule {
            ReminderSchedule::Once { due_at } => {
                format!("{} | {} | {}", self.id, due_at, self.content)
            }
            ReminderSchedule::Daily { time_of_day } => {
                format!("{} | {} daily | {}", self.id, time_of_day, self.content)
            }
        }
    }
}
