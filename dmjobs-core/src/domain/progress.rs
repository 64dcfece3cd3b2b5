//! Progress domain types
//!
//! Progress reaches a job from two directions: handlers report it when the
//! engine polls them, and callers push it directly. Both are merged through
//! the same [`ProgressUpdate`].

use serde::{Deserialize, Serialize};

use super::job::JobStatus;

/// Progress reported by a handler's `progress` capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub status: JobStatus,
    pub logs: Option<Vec<String>>,
    pub percentage: Option<f64>,
}

/// Log lines as sent by callers: either a list or one block of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogPayload {
    Lines(Vec<String>),
    Text(String),
}

impl LogPayload {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            LogPayload::Lines(lines) => lines,
            LogPayload::Text(text) => text.lines().map(str::to_string).collect(),
        }
    }
}

/// Partial progress update; only the provided fields are merged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub logs: Option<LogPayload>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

impl ProgressUpdate {
    pub fn percentage(percentage: f64) -> Self {
        Self {
            percentage: Some(percentage),
            ..Self::default()
        }
    }

    pub fn logs(lines: Vec<String>) -> Self {
        Self {
            logs: Some(LogPayload::Lines(lines)),
            ..Self::default()
        }
    }

    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

impl From<Progress> for ProgressUpdate {
    fn from(progress: Progress) -> Self {
        Self {
            percentage: progress.percentage,
            logs: progress.logs.map(LogPayload::Lines),
            status: Some(progress.status),
        }
    }
}
