//! Job Service
//!
//! The job lifecycle: register, run, status, remove and result, plus pushed
//! progress and service setup/teardown.
//!
//! A job lives in two places. The job store holds the full record and is the
//! authority; the document store receives the domain-visible part after every
//! change. Document writes are best-effort and never roll back the job store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use dmjobs_client::{DocumentError, DocumentStore};
use dmjobs_core::domain::job::{
    ENGINE_LOG_MARKER, Job, JobDocumentError, JobMeta, JobStatus, RECURRING_JOB_TYPE,
};
use dmjobs_core::domain::progress::ProgressUpdate;
use dmjobs_core::domain::reference::{Reference, ReferenceError};
use dmjobs_core::dto::job::{JobStatusReport, Registration, RemoveJobResponse};
use thiserror::Error;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::handler::{Capability, HandlerError, HandlerRegistry, JobLauncher, RegistryError};
use crate::repository::{JobStore, StoreError};
use crate::scheduler::{CronError, CronSchedule, Scheduler, SchedulerError, TriggerTarget};

/// Service error type
#[derive(Debug, Error)]
pub enum JobError {
    #[error("No job with id '{0}' is registered")]
    NotFound(Uuid),

    #[error("{0}")]
    BadRequest(String),

    #[error("Job is not completed (current status: {0})")]
    NotCompleted(JobStatus),

    #[error("The job handler does not support the '{0}' operation")]
    Unsupported(Capability),

    #[error("{0}")]
    BackendUnavailable(String),

    #[error(transparent)]
    Registry(RegistryError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Handler(HandlerError),

    #[error(transparent)]
    Scheduler(SchedulerError),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(job_uid) => JobError::NotFound(job_uid),
            err => JobError::Store(err),
        }
    }
}

impl From<HandlerError> for JobError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Unsupported(capability) => JobError::Unsupported(capability),
            HandlerError::BackendUnavailable(msg) => JobError::BackendUnavailable(msg),
            HandlerError::InvalidAttribute(_) => JobError::BadRequest(err.to_string()),
            err => JobError::Handler(err),
        }
    }
}

impl From<RegistryError> for JobError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Handler(err) => err.into(),
            RegistryError::InvalidReference(err) => err.into(),
            err => JobError::Registry(err),
        }
    }
}

impl From<SchedulerError> for JobError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Cron(err) => err.into(),
            SchedulerError::NoUpcomingRun(_) => {
                JobError::BadRequest(format!("Failed to schedule cron job: {err}"))
            }
            SchedulerError::Store(err) => err.into(),
        }
    }
}

impl From<CronError> for JobError {
    fn from(err: CronError) -> Self {
        JobError::BadRequest(format!("Failed to schedule cron job: {err}"))
    }
}

impl From<ReferenceError> for JobError {
    fn from(err: ReferenceError) -> Self {
        JobError::BadRequest(err.to_string())
    }
}

impl From<JobDocumentError> for JobError {
    fn from(err: JobDocumentError) -> Self {
        JobError::BadRequest(err.to_string())
    }
}

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    handlers: Arc<HandlerRegistry>,
    scheduler: Arc<Scheduler>,
    start_delay: Duration,
    handler_timeout: Duration,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        handlers: Arc<HandlerRegistry>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            jobs,
            documents,
            handlers,
            scheduler,
            start_delay: Duration::ZERO,
            handler_timeout: Duration::from_secs(30),
        }
    }

    /// Delay between registering a one-shot job and its run
    pub fn with_start_delay(mut self, start_delay: Duration) -> Self {
        self.start_delay = start_delay;
        self
    }

    /// Upper bound for every handler operation
    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    // =============================================================================
    // Lifecycle
    // =============================================================================

    /// Registers the job document at `reference` and arms its trigger
    ///
    /// Nothing is persisted unless a handler exists for the job's runner and,
    /// for recurring jobs, the cron expression parses.
    pub async fn register_job(
        &self,
        reference: &str,
        token: Option<String>,
    ) -> Result<Registration, JobError> {
        let dmss_id = Reference::parse(reference)?.to_string();
        let token = match token {
            Some(token) => token,
            None => self.documents.get_credential().await?,
        };

        let document = self.documents.get_document(&dmss_id, 0, &token).await?;
        let now = Utc::now().trunc_subsecs(0);
        let mut job = Job::from_document(
            document,
            JobMeta {
                dmss_id,
                job_uid: Uuid::new_v4(),
                token: Some(token),
                started: Some(now),
            },
        )?;

        self.handlers.resolve(job.clone()).await?;

        let message = match job.schedule.clone() {
            Some(schedule) => {
                let cron = CronSchedule::parse(&schedule.cron)?;
                job.set_status(JobStatus::Registered);
                self.persist(&job).await?;

                let next = self.scheduler.schedule_cron(job.job_uid, &cron, now).await?;
                format!("Cron job successfully registered. Next scheduled run at {next}")
            }
            None => {
                job.set_status(JobStatus::Starting);
                self.persist(&job).await?;

                let at = now + self.start_delay;
                self.scheduler.schedule_once(job.job_uid, at).await?;
                "Job successfully started".to_string()
            }
        };

        info!("Registered job {} from {}: {}", job.job_uid, job.dmss_id, message);

        Ok(Registration {
            uid: job.job_uid,
            message,
            status: job.status,
        })
    }

    /// Starts the job through its handler
    ///
    /// Handler failures end up in the job log and fail the job; they are not
    /// returned. The final state is always persisted.
    pub async fn run_job(&self, job_uid: Uuid) -> Result<JobStatus, JobError> {
        let mut job = self.jobs.get(job_uid).await?;
        job.started = Some(Utc::now().trunc_subsecs(0));
        info!("Running job {} ({})", job_uid, job.dmss_id);

        let mut job = match self.handlers.resolve(job.clone()).await {
            Ok(mut handler) => {
                let started = self.guard(Capability::Start, handler.start(self)).await;
                let mut job = handler.into_job();
                match started {
                    Ok(msg) => {
                        job.push_log(&msg);
                        if job.status == JobStatus::Starting {
                            job.set_status(JobStatus::Running);
                        }
                    }
                    Err(e) => {
                        warn!("Job {} failed to start: {}", job_uid, e);
                        job.append_log(&format!("Job failed to start: {e}"));
                        job.set_status(JobStatus::Failed);
                    }
                }
                job
            }
            Err(e) => {
                error!("Cannot run job {}: {}", job_uid, e);
                job.append_log(&e.to_string());
                job.set_status(JobStatus::Failed);
                job
            }
        };

        // the handler may have added runs to the document meanwhile
        if job.job_type == RECURRING_JOB_TYPE {
            self.refresh_from_document(&mut job).await;
        }

        if job.status == JobStatus::Removed {
            // removal already deleted the store entry
            self.sync_document(&job).await;
        } else {
            self.persist(&job).await?;
        }

        debug!("Job {} is now {}", job_uid, job.status);
        Ok(job.status)
    }

    /// Current status of a job
    ///
    /// Once a caller pushed progress the handler is no longer polled.
    pub async fn job_status(&self, job_uid: Uuid) -> Result<JobStatusReport, JobError> {
        let mut job = self.jobs.get(job_uid).await?;

        if !job.external_progress && job.status != JobStatus::Starting {
            if job.job_type == RECURRING_JOB_TYPE {
                self.refresh_from_document(&mut job).await;
            }

            let mut handler = self.handlers.resolve(job.clone()).await?;
            if !handler.supports(Capability::Progress) {
                return Err(JobError::Unsupported(Capability::Progress));
            }

            job = match self.guard(Capability::Progress, handler.progress()).await {
                Ok(progress) => self.update_progress(job, progress.into(), true, false).await?,
                Err(e) => {
                    warn!("Failed to poll progress of job {}: {}", job_uid, e);
                    let line = format!("Failed to poll progress: {e}");
                    let repeated = job
                        .log
                        .last()
                        .and_then(|last| last.strip_prefix(ENGINE_LOG_MARKER))
                        == Some(line.as_str());
                    if !repeated {
                        job.append_log(&line);
                    }
                    job.set_status(JobStatus::Failed);
                    self.persist(&job).await?;
                    job
                }
            };
        }

        let next_run = if job.is_recurring() {
            self.scheduler.next_fire_time(job_uid).await?
        } else {
            None
        };
        let message = match (next_run, job.started) {
            (Some(next), _) => format!("Next scheduled run @ {next}"),
            (None, Some(started)) => format!("Started: {}", started.to_rfc3339()),
            (None, None) => "Not started".to_string(),
        };

        Ok(JobStatusReport {
            status: job.status,
            log: job.log,
            percentage: job.percentage,
            message,
        })
    }

    /// Terminates a job and forgets it
    ///
    /// Handler failures do not stop the removal: the document is written, the
    /// trigger cancelled and the store entry deleted regardless.
    pub async fn remove_job(&self, job_uid: Uuid) -> Result<RemoveJobResponse, JobError> {
        let mut job = self.jobs.get(job_uid).await?;
        info!("Removing job {}", job_uid);

        let response = match self.handlers.resolve(job.clone()).await {
            Ok(mut handler) if handler.supports(Capability::Remove) => {
                match self.guard(Capability::Remove, handler.remove()).await {
                    Ok((status, msg)) => {
                        job.set_status(status);
                        msg
                    }
                    Err(e) => {
                        warn!("Handler failed to remove job {}: {}", job_uid, e);
                        job.append_log(&format!("Failed to remove job: {e}"));
                        job.set_status(JobStatus::Removed);
                        e.to_string()
                    }
                }
            }
            Ok(_) => {
                let msg = HandlerError::Unsupported(Capability::Remove).to_string();
                job.append_log(&msg);
                job.set_status(JobStatus::Removed);
                msg
            }
            Err(e) => {
                warn!("Cannot resolve handler to remove job {}: {}", job_uid, e);
                job.append_log(&e.to_string());
                job.set_status(JobStatus::Removed);
                e.to_string()
            }
        };

        if let Err(e) = self.write_document(&job).await {
            warn!("Failed to write removed job {} to the document store: {}", job_uid, e);
        }
        match self.scheduler.cancel(job_uid).await {
            Ok(true) => debug!("Cancelled trigger of job {}", job_uid),
            Ok(false) => {}
            Err(e) => warn!("Failed to cancel trigger of job {}: {}", job_uid, e),
        }
        if let Err(e) = self.jobs.delete(job_uid).await {
            warn!("Failed to delete job {} from the job store: {}", job_uid, e);
        }

        Ok(RemoveJobResponse {
            status: job.status,
            response,
        })
    }

    /// Result message and payload of a completed job
    pub async fn job_result(&self, job_uid: Uuid) -> Result<(String, Vec<u8>), JobError> {
        let job = self.jobs.get(job_uid).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::NotCompleted(job.status));
        }

        let mut handler = self.handlers.resolve(job).await?;
        if !handler.supports(Capability::Result) {
            return Err(JobError::Unsupported(Capability::Result));
        }

        let (msg, payload) = self.guard(Capability::Result, handler.result()).await?;
        let mut job = handler.into_job();
        job.push_log(&msg);
        self.persist(&job).await?;

        Ok((msg, payload))
    }

    // =============================================================================
    // Progress
    // =============================================================================

    /// Merges the provided progress fields into `job` and persists it
    ///
    /// A terminal status is never replaced by a non-terminal one.
    pub async fn update_progress(
        &self,
        mut job: Job,
        update: ProgressUpdate,
        overwrite_log: bool,
        external: bool,
    ) -> Result<Job, JobError> {
        if let Some(percentage) = update.percentage {
            if !(0.0..=1.0).contains(&percentage) {
                return Err(JobError::BadRequest(format!(
                    "Percentage must be between 0 and 1, got {percentage}"
                )));
            }
            job.percentage = Some(percentage);
        }

        if let Some(logs) = update.logs {
            let lines = logs.into_lines();
            if overwrite_log {
                job.log = lines;
            } else {
                job.log.extend(lines);
            }
        }

        if let Some(status) = update.status {
            if job.status.is_terminal() && !status.is_terminal() {
                debug!(
                    "Ignoring status '{}' for job {}, already {}",
                    status, job.job_uid, job.status
                );
            } else {
                job.set_status(status);
            }
        }

        if external {
            job.external_progress = true;
        }

        self.persist(&job).await?;
        Ok(job)
    }

    /// Progress pushed by a caller; stops handler polling for the job
    pub async fn push_progress(
        &self,
        job_uid: Uuid,
        overwrite_log: bool,
        update: ProgressUpdate,
    ) -> Result<Job, JobError> {
        let job = self.jobs.get(job_uid).await?;
        self.update_progress(job, update, overwrite_log, true).await
    }

    // =============================================================================
    // Services
    // =============================================================================

    pub async fn setup_service(&self, job_uid: Uuid, service_id: &str) -> Result<String, JobError> {
        self.service_operation(job_uid, Capability::SetupService, service_id)
            .await
    }

    pub async fn teardown_service(
        &self,
        job_uid: Uuid,
        service_id: &str,
    ) -> Result<String, JobError> {
        self.service_operation(job_uid, Capability::TeardownService, service_id)
            .await
    }

    async fn service_operation(
        &self,
        job_uid: Uuid,
        capability: Capability,
        service_id: &str,
    ) -> Result<String, JobError> {
        let job = self.jobs.get(job_uid).await?;
        let mut handler = self.handlers.resolve(job).await?;
        if !handler.supports(capability) {
            return Err(JobError::Unsupported(capability));
        }

        let msg = match capability {
            Capability::TeardownService => {
                self.guard(capability, handler.teardown_service(service_id))
                    .await?
            }
            _ => {
                self.guard(capability, handler.setup_service(service_id))
                    .await?
            }
        };

        let mut job = handler.into_job();
        job.push_log(&msg);
        self.jobs.set(&job).await?;
        Ok(msg)
    }

    // =============================================================================
    // Startup
    // =============================================================================

    /// Re-arms the cron trigger of every stored recurring job
    ///
    /// Returns how many triggers were armed. Entries that cannot be read or
    /// scheduled are skipped; a failing store is fatal.
    pub async fn rehydrate(&self) -> Result<usize, JobError> {
        let now = Utc::now();
        let mut armed = 0;

        for job_uid in self.jobs.scan().await? {
            let job = match self.jobs.get(job_uid).await {
                Ok(job) => job,
                Err(e @ (StoreError::Corrupt { .. } | StoreError::NotFound(_))) => {
                    warn!("Skipping job {} during startup: {}", job_uid, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let Some(schedule) = job.schedule.as_ref() else {
                continue;
            };
            let cron = match CronSchedule::parse(&schedule.cron) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!("Not re-arming job {}: {}", job_uid, e);
                    continue;
                }
            };

            match self.scheduler.schedule_cron(job_uid, &cron, now).await {
                Ok(next) => {
                    debug!("Re-armed job {}, next run at {}", job_uid, next);
                    armed += 1;
                }
                Err(SchedulerError::Store(e)) => return Err(e.into()),
                Err(e) => warn!("Not re-arming job {}: {}", job_uid, e),
            }
        }

        info!("Re-armed {} recurring job(s)", armed);
        Ok(armed)
    }

    // =============================================================================
    // Helpers
    // =============================================================================

    /// Writes the job store, then the document store
    async fn persist(&self, job: &Job) -> Result<(), JobError> {
        self.jobs.set(job).await?;
        self.sync_document(job).await;
        Ok(())
    }

    async fn sync_document(&self, job: &Job) {
        if let Err(e) = self.write_document(job).await {
            warn!("Failed to write job {} to the document store: {}", job.job_uid, e);
        }
    }

    async fn write_document(&self, job: &Job) -> Result<(), DocumentError> {
        let token = match &job.token {
            Some(token) => token.clone(),
            None => self.documents.get_credential().await?,
        };
        self.documents
            .update_document(&job.dmss_id, &job.to_document(), &token)
            .await?;
        Ok(())
    }

    /// Adopts the attributes the document store holds for `job`
    async fn refresh_from_document(&self, job: &mut Job) {
        let token = job.token.clone().unwrap_or_default();
        let refreshed = match self.documents.get_document(&job.dmss_id, 0, &token).await {
            Ok(document) => job.merge_document(document).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = refreshed {
            warn!("Failed to refresh job {} from {}: {}", job.job_uid, job.dmss_id, e);
        }
    }

    /// Runs a handler operation under the handler timeout
    async fn guard<T>(
        &self,
        capability: Capability,
        operation: impl Future<Output = Result<T, HandlerError>>,
    ) -> Result<T, HandlerError> {
        match time::timeout(self.handler_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout {
                operation: capability,
                timeout: self.handler_timeout,
            }),
        }
    }
}

#[async_trait]
impl JobLauncher for JobService {
    async fn register(
        &self,
        reference: &str,
        token: Option<String>,
    ) -> anyhow::Result<Registration> {
        Ok(self.register_job(reference, token).await?)
    }

    async fn remove(&self, job_uid: Uuid) -> anyhow::Result<RemoveJobResponse> {
        Ok(self.remove_job(job_uid).await?)
    }
}

#[async_trait]
impl TriggerTarget for JobService {
    async fn fire(&self, job_uid: Uuid) {
        match self.run_job(job_uid).await {
            Ok(status) => info!("Run of job {} ended as '{}'", job_uid, status),
            Err(JobError::NotFound(_)) => {
                warn!("Trigger fired for job {}, which is no longer registered", job_uid)
            }
            Err(e) => error!("Failed to run job {}: {}", job_uid, e),
        }
    }
}
