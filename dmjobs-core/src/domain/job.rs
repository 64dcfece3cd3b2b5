//! Job domain types
//!
//! A job lives in two places: the engine's job store holds the full record,
//! while the document store holds the domain-visible part. [`Job::to_document`]
//! produces the latter and never includes engine-private fields.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::reference::{Reference, ReferenceError};
use super::runner::Runner;
use super::schedule::Schedule;
use super::timestamp;

/// Marker prepended to log lines written by the engine itself
pub const ENGINE_LOG_MARKER: &str = "JOBAPI: ";

/// Job document type whose handler spawns child runs
pub const RECURRING_JOB_TYPE: &str = "dmss://WorkflowDS/Blueprints/RecurringJob";

/// Fields that stay inside the engine and are stripped before a document write
pub const PRIVATE_FIELDS: &[&str] = &[
    "dmss_id",
    "log",
    "percentage",
    "token",
    "state",
    "external_progress",
];

#[derive(Debug, Error)]
pub enum JobDocumentError {
    #[error("Job document must be a JSON object")]
    NotAnObject,

    #[error("Job document is invalid: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Job execution status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "registered")]
    Registered,
    #[default]
    #[serde(rename = "not started")]
    NotStarted,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "removed")]
    Removed,
    #[serde(rename = "unknown")]
    Unknown,
}

impl JobStatus {
    /// Terminal statuses end orchestration of a job
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Removed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Registered => "registered",
            JobStatus::NotStarted => "not started",
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
            JobStatus::Removed => "removed",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution metadata attached to a job document at registration
#[derive(Debug, Clone)]
pub struct JobMeta {
    pub dmss_id: String,
    pub job_uid: Uuid,
    pub token: Option<String>,
    pub started: Option<DateTime<Utc>>,
}

/// Job record
///
/// Serialized as-is into the job store. Field names follow the document
/// store's spelling so the same serde shape serves both stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "uid")]
    pub job_uid: Uuid,

    /// Reference to the authoritative document
    #[serde(default)]
    pub dmss_id: String,

    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(rename = "triggeredBy", default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(rename = "applicationInput", default, skip_serializing_if = "Option::is_none")]
    pub application_input: Option<Value>,

    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started: Option<DateTime<Utc>>,

    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ended: Option<DateTime<Utc>>,

    #[serde(rename = "outputTarget", default, skip_serializing_if = "Option::is_none")]
    pub output_target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<Runner>,

    #[serde(rename = "referenceTarget", default, skip_serializing_if = "Option::is_none")]
    pub reference_target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,

    #[serde(default, deserialize_with = "nullable_log")]
    pub log: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,

    /// Credential for the document store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Handler-private continuation data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,

    /// Set once a caller pushes progress; handler polling is then skipped
    #[serde(default)]
    pub external_progress: bool,

    /// Document attributes the engine does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn nullable_log<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Job {
    /// Creates a bare job, mostly useful for tests and child templates
    pub fn new(job_uid: Uuid, dmss_id: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            job_uid,
            dmss_id: dmss_id.into(),
            job_type: job_type.into(),
            name: None,
            label: None,
            triggered_by: None,
            status: JobStatus::default(),
            application_input: None,
            started: None,
            ended: None,
            output_target: None,
            result: None,
            runner: None,
            reference_target: None,
            schedule: None,
            log: Vec::new(),
            percentage: None,
            token: None,
            state: None,
            external_progress: false,
            extra: Map::new(),
        }
    }

    /// Builds a job from a raw document fetched from the document store
    ///
    /// The metadata always wins over same-named document attributes. Private
    /// fields and timestamps of an earlier run present in the document are
    /// ignored.
    pub fn from_document(document: Value, meta: JobMeta) -> Result<Self, JobDocumentError> {
        let Value::Object(mut fields) = document else {
            return Err(JobDocumentError::NotAnObject);
        };

        for key in PRIVATE_FIELDS {
            fields.remove(*key);
        }
        fields.remove("started");
        fields.remove("ended");
        // an empty schedule does not make a job recurring
        if matches!(fields.get("schedule"), Some(Value::Object(schedule)) if schedule.is_empty()) {
            fields.remove("schedule");
        }
        fields.insert("uid".to_string(), Value::String(meta.job_uid.to_string()));
        fields.insert("dmss_id".to_string(), Value::String(meta.dmss_id));

        let mut job: Job = serde_json::from_value(Value::Object(fields))?;
        job.token = meta.token;
        job.started = meta.started;
        Ok(job)
    }

    /// Document representation: document field names, no private fields
    pub fn to_document(&self) -> Value {
        let mut value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(_) => return Value::Object(Map::new()),
        };
        if let Value::Object(fields) = &mut value {
            for key in PRIVATE_FIELDS {
                fields.remove(*key);
            }
            fields.retain(|_, v| !v.is_null());
        }
        value
    }

    /// Adopts the domain-visible attributes of a freshly fetched document
    ///
    /// Identity, status, timestamps and every private field stay as they are
    /// in memory; everything else is taken from the document.
    pub fn merge_document(&mut self, fetched: Value) -> Result<(), JobDocumentError> {
        let fetched = Job::from_document(
            fetched,
            JobMeta {
                dmss_id: self.dmss_id.clone(),
                job_uid: self.job_uid,
                token: None,
                started: None,
            },
        )?;

        self.job_type = fetched.job_type;
        self.name = fetched.name;
        self.label = fetched.label;
        self.triggered_by = fetched.triggered_by;
        self.application_input = fetched.application_input;
        self.output_target = fetched.output_target;
        self.result = fetched.result;
        self.runner = fetched.runner;
        self.reference_target = fetched.reference_target;
        self.schedule = fetched.schedule;
        self.extra = fetched.extra;
        Ok(())
    }

    /// Appends engine-origin log lines, one entry per input line
    pub fn append_log(&mut self, message: &str) {
        self.log.extend(
            message
                .split('\n')
                .map(|line| format!("{ENGINE_LOG_MARKER}{line}")),
        );
    }

    /// Appends handler-origin log lines verbatim
    pub fn push_log(&mut self, message: &str) {
        self.log.extend(message.lines().map(str::to_string));
    }

    /// Moves the job to `status`
    ///
    /// No-op if the status is unchanged. Entering `Completed` or `Failed`
    /// stamps `ended`.
    pub fn set_status(&mut self, status: JobStatus) {
        if status == self.status {
            return;
        }
        self.status = status;
        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            self.ended = Some(Utc::now().trunc_subsecs(0));
        }
    }

    /// Recurring jobs carry a schedule
    pub fn is_recurring(&self) -> bool {
        self.schedule.is_some()
    }

    pub fn runner_type(&self) -> Option<&str> {
        self.runner.as_ref().map(|r| r.runner_type.as_str())
    }

    pub fn reference(&self) -> Result<Reference, ReferenceError> {
        Reference::parse(&self.dmss_id)
    }

    /// Data source that owns the job document
    pub fn data_source(&self) -> Result<String, ReferenceError> {
        self.reference().map(|r| r.data_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> JobMeta {
        JobMeta {
            dmss_id: "dmss://WorkflowDS/$job-1".to_string(),
            job_uid: Uuid::new_v4(),
            token: Some("secret".to_string()),
            started: Some(Utc::now()),
        }
    }

    fn document() -> Value {
        json!({
            "_id": "job-1",
            "type": "dmss://WorkflowDS/Blueprints/Job",
            "label": "Example job",
            "status": "not started",
            "triggeredBy": "me",
            "applicationInput": {"address": "dmss://WorkflowDS/$1"},
            "runner": {"type": "dmss://WorkflowDS/Blueprints/ReverseDescription"},
            "log": ["should be ignored"],
            "token": "leaked"
        })
    }

    #[test]
    fn test_from_document_applies_metadata() {
        let meta = meta();
        let job = Job::from_document(document(), meta.clone()).unwrap();

        assert_eq!(job.job_uid, meta.job_uid);
        assert_eq!(job.dmss_id, meta.dmss_id);
        assert_eq!(job.token.as_deref(), Some("secret"));
        assert_eq!(job.status, JobStatus::NotStarted);
        assert_eq!(job.triggered_by.as_deref(), Some("me"));
        assert_eq!(
            job.runner_type(),
            Some("dmss://WorkflowDS/Blueprints/ReverseDescription")
        );
        assert!(job.log.is_empty());
        assert_eq!(job.extra["_id"], json!("job-1"));
        assert!(!job.is_recurring());
    }

    #[test]
    fn test_from_document_rejects_non_object() {
        assert!(matches!(
            Job::from_document(json!(["nope"]), meta()),
            Err(JobDocumentError::NotAnObject)
        ));
    }

    #[test]
    fn test_empty_schedule_is_not_recurring() {
        let mut doc = document();
        doc["schedule"] = json!({});
        let job = Job::from_document(doc, meta()).unwrap();
        assert!(job.schedule.is_none());
        assert!(!job.is_recurring());

        let mut doc = document();
        doc["schedule"] = json!({"cron": "0 * * * *"});
        assert!(Job::from_document(doc, meta()).unwrap().is_recurring());
    }

    #[test]
    fn test_to_document_excludes_private_fields() {
        let mut job = Job::from_document(document(), meta()).unwrap();
        job.append_log("hello");
        job.percentage = Some(0.5);
        job.state = Some(json!({"job_name": "x"}));
        job.external_progress = true;

        let doc = job.to_document();
        let fields = doc.as_object().unwrap();
        for key in PRIVATE_FIELDS {
            assert!(!fields.contains_key(*key), "{key} leaked into document");
        }
        assert_eq!(fields["uid"], json!(job.job_uid.to_string()));
        assert_eq!(fields["applicationInput"], json!({"address": "dmss://WorkflowDS/$1"}));
        assert_eq!(fields["_id"], json!("job-1"));
        assert!(!fields.contains_key("ended"));
    }

    #[test]
    fn test_store_round_trip_keeps_private_fields() {
        let mut job = Job::from_document(document(), meta()).unwrap();
        job.append_log("one");
        job.percentage = Some(0.25);

        let stored = serde_json::to_string(&job).unwrap();
        let restored: Job = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn test_append_log_splits_and_marks_lines() {
        let mut job = Job::new(Uuid::new_v4(), "dmss://DS/$x", "t");
        job.append_log("first\nsecond");
        job.push_log("handler line");

        assert_eq!(
            job.log,
            vec![
                "JOBAPI: first".to_string(),
                "JOBAPI: second".to_string(),
                "handler line".to_string()
            ]
        );
    }

    #[test]
    fn test_set_status_stamps_ended_on_terminal_outcome() {
        let mut job = Job::new(Uuid::new_v4(), "dmss://DS/$x", "t");
        job.set_status(JobStatus::Running);
        assert!(job.ended.is_none());

        job.set_status(JobStatus::Completed);
        assert_eq!(job.status, JobStatus::Completed);
        let ended = job.ended.unwrap();

        // unchanged status is a no-op
        job.set_status(JobStatus::Completed);
        assert_eq!(job.ended, Some(ended));
    }

    #[test]
    fn test_set_status_removed_does_not_stamp_ended() {
        let mut job = Job::new(Uuid::new_v4(), "dmss://DS/$x", "t");
        job.set_status(JobStatus::Removed);
        assert!(job.ended.is_none());
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_merge_document_keeps_engine_state() {
        let mut job = Job::from_document(document(), meta()).unwrap();
        job.set_status(JobStatus::Running);
        job.append_log("kept");

        let mut fetched = document();
        fetched["label"] = json!("Renamed");
        fetched["status"] = json!("failed");
        fetched["schedule"] = json!({"cron": "* * * * *", "runs": [{"uid": "child"}]});

        let uid = job.job_uid;
        job.merge_document(fetched).unwrap();

        assert_eq!(job.job_uid, uid);
        assert_eq!(job.label.as_deref(), Some("Renamed"));
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.log, vec!["JOBAPI: kept".to_string()]);
        assert_eq!(job.token.as_deref(), Some("secret"));
        assert!(job.is_recurring());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(JobStatus::NotStarted).unwrap(),
            json!("not started")
        );
        let status: JobStatus = serde_json::from_value(json!("completed")).unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(JobStatus::Removed.to_string(), "removed");
    }

    #[test]
    fn test_data_source() {
        let job = Job::from_document(document(), meta()).unwrap();
        assert_eq!(job.data_source().unwrap(), "WorkflowDS");
    }
}
