//! Job DTOs exchanged with callers of the engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobStatus};

/// Request to register a job from a document reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterJob {
    pub reference: String,
}

/// Outcome of a registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub uid: Uuid,
    pub message: String,
    pub status: JobStatus,
}

/// Answer to a status poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub status: JobStatus,
    pub log: Vec<String>,
    pub percentage: Option<f64>,
    pub message: String,
}

/// Outcome of a removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveJobResponse {
    pub status: JobStatus,
    pub response: String,
}

/// Result of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub message: String,
    pub result: String,
}

impl JobResultResponse {
    pub fn new(message: String, result: &[u8]) -> Self {
        Self {
            message,
            result: String::from_utf8_lossy(result).into_owned(),
        }
    }
}

/// Message returned by service setup and teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub message: String,
}

/// Caller-facing view of a job; engine-private fields are left out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub uid: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub name: Option<String>,
    pub label: Option<String>,
    pub status: JobStatus,
    pub started: Option<chrono::DateTime<chrono::Utc>>,
    pub ended: Option<chrono::DateTime<chrono::Utc>>,
    pub percentage: Option<f64>,
    pub log: Vec<String>,
    pub external_progress: bool,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            uid: job.job_uid,
            job_type: job.job_type,
            name: job.name,
            label: job.label,
            status: job.status,
            started: job.started,
            ended: job.ended,
            percentage: job.percentage,
            log: job.log,
            external_progress: job.external_progress,
        }
    }
}
