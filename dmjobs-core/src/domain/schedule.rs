//! Schedule descriptor of recurring jobs
//!
//! The presence of a schedule marks a job as recurring. The engine reads the
//! cron expression and the validity window; everything else (e.g. the list of
//! child runs) belongs to the document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Schedule attribute '{attribute}' has an invalid timestamp '{value}'")]
    InvalidTimestamp { attribute: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Five-field cron expression
    #[serde(default)]
    pub cron: String,

    #[serde(rename = "startDate", default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(rename = "endDate", default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Schedule {
    pub fn new(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            start_date: None,
            end_date: None,
            attributes: Map::new(),
        }
    }

    /// Start of the validity window, if any
    pub fn starts_at(&self) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        Self::window_bound("startDate", self.start_date.as_deref())
    }

    /// End of the validity window, if any
    pub fn ends_at(&self) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        Self::window_bound("endDate", self.end_date.as_deref())
    }

    fn window_bound(
        attribute: &'static str,
        value: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match value {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => timestamp::parse(raw)
                .map(Some)
                .ok_or_else(|| ScheduleError::InvalidTimestamp {
                    attribute,
                    value: raw.to_string(),
                }),
        }
    }
}
