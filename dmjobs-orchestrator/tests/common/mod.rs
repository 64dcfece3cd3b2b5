//! Shared harness for the lifecycle tests
//!
//! Wires the engine over in-memory stores and drives the scheduler by hand.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dmjobs_client::memory::InMemoryDocumentStore;
use dmjobs_client::{AddedDocument, DocumentError, DocumentStore};
use dmjobs_core::domain::job::{Job, JobStatus};
use dmjobs_core::domain::progress::Progress;
use dmjobs_orchestrator::config::Config;
use dmjobs_orchestrator::handler::{
    Capability, HandlerContext, HandlerEnv, HandlerError, HandlerFactory, HandlerRegistry,
    JobHandler, JobLauncher,
};
use dmjobs_orchestrator::repository::{InMemoryJobStore, InMemoryTriggerStore};
use dmjobs_orchestrator::scheduler::Scheduler;
use dmjobs_orchestrator::service::JobService;
use serde_json::{Value, json};
use uuid::Uuid;

pub const SCRIPTED: &str = "dmss://Tests/Blueprints/Scripted";
pub const TOGGLED: &str = "dmss://Tests/Blueprints/Toggled";
pub const REVERSE: &str = "dmss://WorkflowDS/Blueprints/ReverseDescription";
pub const RECURRING_HANDLER: &str = "dmss://WorkflowDS/Blueprints/RecurringJobHandler";

/// Test handler whose `start` follows `runner.outcome`
///
/// - `"run"`: starts and keeps running
/// - `"complete"`: completes within start
/// - `"fail"`: start fails
/// - `"hang"`: start never returns
/// - `"stall"`: starts, but every progress poll fails
struct Scripted {
    job: Job,
}

impl Scripted {
    fn outcome(&self) -> String {
        self.job
            .runner
            .as_ref()
            .and_then(|runner| runner.attributes.get("outcome"))
            .and_then(Value::as_str)
            .unwrap_or("run")
            .to_string()
    }
}

#[async_trait]
impl JobHandler for Scripted {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Start, Capability::Progress, Capability::SetupService]
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn into_job(self: Box<Self>) -> Job {
        self.job
    }

    async fn start(&mut self, _launcher: &dyn JobLauncher) -> Result<String, HandlerError> {
        match self.outcome().as_str() {
            "complete" => {
                self.job.percentage = Some(1.0);
                self.job.set_status(JobStatus::Completed);
                Ok("scripted job completed".to_string())
            }
            "fail" => Err(HandlerError::Failed(anyhow!("boom"))),
            "hang" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("woke up".to_string())
            }
            _ => Ok("scripted job started".to_string()),
        }
    }

    async fn progress(&mut self) -> Result<Progress, HandlerError> {
        if self.outcome() == "stall" {
            return Err(HandlerError::Failed(anyhow!("backend went away")));
        }
        Ok(Progress {
            status: JobStatus::Running,
            logs: Some(vec!["polled".to_string()]),
            percentage: Some(0.25),
        })
    }

    async fn setup_service(&mut self, service_id: &str) -> Result<String, HandlerError> {
        Ok(format!("service {service_id} is up"))
    }
}

struct ScriptedFactory;

#[async_trait]
impl HandlerFactory for ScriptedFactory {
    fn runner_types(&self) -> &'static [&'static str] {
        &[SCRIPTED]
    }

    async fn create(&self, context: HandlerContext) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(Scripted { job: context.job }))
    }
}

/// Handler whose backend can be switched off between operations
struct ToggledFactory {
    backend_up: Arc<AtomicBool>,
}

#[async_trait]
impl HandlerFactory for ToggledFactory {
    fn runner_types(&self) -> &'static [&'static str] {
        &[TOGGLED]
    }

    async fn create(&self, context: HandlerContext) -> Result<Box<dyn JobHandler>, HandlerError> {
        if !self.backend_up.load(Ordering::SeqCst) {
            return Err(HandlerError::BackendUnavailable(
                "Toggled backend is switched off".to_string(),
            ));
        }
        Ok(Box::new(Scripted { job: context.job }))
    }
}

/// Document store that serves reads but rejects every update
struct ReadOnlyDocuments {
    inner: Arc<InMemoryDocumentStore>,
}

#[async_trait]
impl DocumentStore for ReadOnlyDocuments {
    async fn get_document(
        &self,
        reference: &str,
        depth: u32,
        token: &str,
    ) -> dmjobs_client::Result<Value> {
        self.inner.get_document(reference, depth, token).await
    }

    async fn update_document(
        &self,
        _reference: &str,
        _document: &Value,
        _token: &str,
    ) -> dmjobs_client::Result<Value> {
        Err(DocumentError::api_error(503, "document store is read-only"))
    }

    async fn add_document(
        &self,
        parent: &str,
        document: &Value,
        token: &str,
    ) -> dmjobs_client::Result<AddedDocument> {
        self.inner.add_document(parent, document, token).await
    }

    async fn get_credential(&self) -> dmjobs_client::Result<String> {
        self.inner.get_credential().await
    }
}

pub struct Harness {
    pub service: Arc<JobService>,
    pub scheduler: Arc<Scheduler>,
    pub jobs: Arc<InMemoryJobStore>,
    pub triggers: Arc<InMemoryTriggerStore>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub backend_up: Arc<AtomicBool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Duration::from_secs(5), false)
    }

    pub fn with_handler_timeout(handler_timeout: Duration) -> Self {
        Self::build(handler_timeout, false)
    }

    /// Engine whose document writes all fail; reads still work
    pub fn with_read_only_documents() -> Self {
        Self::build(Duration::from_secs(5), true)
    }

    fn build(handler_timeout: Duration, read_only_documents: bool) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let triggers = Arc::new(InMemoryTriggerStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let engine_documents: Arc<dyn DocumentStore> = if read_only_documents {
            Arc::new(ReadOnlyDocuments {
                inner: documents.clone(),
            })
        } else {
            documents.clone()
        };
        let backend_up = Arc::new(AtomicBool::new(true));

        let env = HandlerEnv::new(engine_documents.clone(), &Config::default()).expect("handler env");
        let mut registry = HandlerRegistry::with_defaults(env).expect("default handlers");
        registry.register(ScriptedFactory).expect("scripted handler");
        registry
            .register(ToggledFactory {
                backend_up: backend_up.clone(),
            })
            .expect("toggled handler");

        let scheduler = Arc::new(Scheduler::new(triggers.clone(), Duration::from_secs(1), 4));
        let service = Arc::new(
            JobService::new(
                jobs.clone(),
                engine_documents,
                Arc::new(registry),
                scheduler.clone(),
            )
            .with_handler_timeout(handler_timeout),
        );

        Self {
            service,
            scheduler,
            jobs,
            triggers,
            documents,
            backend_up,
        }
    }

    pub fn set_backend_up(&self, up: bool) {
        self.backend_up.store(up, Ordering::SeqCst);
    }

    /// Stores a job document under `dmss://WorkflowDS/${id}` and returns its reference
    pub async fn add_document(&self, id: &str, document: Value) -> String {
        let reference = format!("dmss://WorkflowDS/${id}");
        self.documents
            .insert(&reference, document)
            .await
            .expect("insert document");
        reference
    }

    /// Runs one scheduler pass at `now` and waits for every firing
    pub async fn tick_at(&self, now: DateTime<Utc>) -> usize {
        let handles = self
            .scheduler
            .tick(self.service.clone(), now)
            .await
            .expect("scheduler tick");
        let fired = handles.len();
        for handle in handles {
            handle.await.expect("firing task");
        }
        fired
    }

    pub async fn tick(&self) -> usize {
        self.tick_at(Utc::now()).await
    }

    /// Fires the job's trigger at its scheduled time
    pub async fn fire(&self, job_uid: Uuid) -> usize {
        let at = self
            .scheduler
            .next_fire_time(job_uid)
            .await
            .expect("trigger lookup")
            .expect("job has a trigger");
        self.tick_at(at).await
    }
}

pub fn job_document(runner: Value) -> Value {
    json!({
        "type": "dmss://WorkflowDS/Blueprints/Job",
        "label": "test job",
        "status": "not started",
        "runner": runner,
    })
}

pub fn toggled() -> Value {
    job_document(json!({"type": TOGGLED}))
}

pub fn scripted(outcome: &str) -> Value {
    job_document(json!({"type": SCRIPTED, "outcome": outcome}))
}

pub fn reverse(description: &str) -> Value {
    let mut document = job_document(json!({"type": REVERSE}));
    document["applicationInput"] = json!({"description": description});
    document
}

/// Recurring job document spawning a reverse-description child every minute
pub fn recurring(start_date: Option<DateTime<Utc>>, end_date: Option<DateTime<Utc>>) -> Value {
    let mut schedule = json!({"cron": "* * * * *", "runs": []});
    if let Some(start) = start_date {
        schedule["startDate"] = json!(start.to_rfc3339());
    }
    if let Some(end) = end_date {
        schedule["endDate"] = json!(end.to_rfc3339());
    }

    json!({
        "type": "dmss://WorkflowDS/Blueprints/RecurringJob",
        "label": "every minute",
        "runner": {"type": RECURRING_HANDLER},
        "schedule": schedule,
        "applicationInput": reverse("recurring"),
    })
}
