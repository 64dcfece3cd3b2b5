//! Job handlers
//!
//! A handler runs a job on one execution backend. Handlers are picked by the
//! job's `runner.type` and built fresh for every operation from the current
//! job record, which they own until the engine takes it back with
//! [`JobHandler::into_job`].
//!
//! `start` is mandatory. Every other capability is optional: a handler lists
//! the ones it implements in [`JobHandler::capabilities`], and calling one it
//! does not implement yields [`HandlerError::Unsupported`].

pub mod local_container;
pub mod radix;
pub mod recurring;
pub mod registry;
pub mod reverse_description;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dmjobs_client::DocumentStore;
use dmjobs_core::domain::job::{Job, JobStatus};
use dmjobs_core::domain::progress::Progress;
use dmjobs_core::dto::job::{Registration, RemoveJobResponse};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;

pub use registry::{HandlerRegistry, RegistryError};

/// Operations a handler may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Start,
    Remove,
    Progress,
    Result,
    SetupService,
    TeardownService,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Start => "start",
            Capability::Remove => "remove",
            Capability::Progress => "progress",
            Capability::Result => "result",
            Capability::SetupService => "setup_service",
            Capability::TeardownService => "teardown_service",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("The job handler does not support the '{0}' operation")]
    Unsupported(Capability),

    #[error("{0}")]
    BackendUnavailable(String),

    #[error("The job handler tried to access a missing or invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("The job handler's '{operation}' operation timed out after {timeout:?}")]
    Timeout {
        operation: Capability,
        timeout: Duration,
    },

    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn invalid_attribute(attribute: &str, err: impl fmt::Display) -> Self {
        HandlerError::InvalidAttribute(format!("'{attribute}': {err}"))
    }
}

/// Engine operations available to handlers while they run
///
/// The recurring job handler registers child jobs and removes itself
/// through this.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn register(&self, reference: &str, token: Option<String>)
    -> anyhow::Result<Registration>;

    async fn remove(&self, job_uid: Uuid) -> anyhow::Result<RemoveJobResponse>;
}

/// Capability contract of an execution backend
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Every capability this handler implements, `Start` included
    fn capabilities(&self) -> &'static [Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// The job as the handler currently sees it
    fn job(&self) -> &Job;

    /// Hands the (possibly updated) job back to the engine
    fn into_job(self: Box<Self>) -> Job;

    /// Starts the job; the message ends up in the job log
    async fn start(&mut self, launcher: &dyn JobLauncher) -> Result<String, HandlerError>;

    /// Terminates the job and cleans up its resources
    async fn remove(&mut self) -> Result<(JobStatus, String), HandlerError> {
        Err(HandlerError::Unsupported(Capability::Remove))
    }

    async fn progress(&mut self) -> Result<Progress, HandlerError> {
        Err(HandlerError::Unsupported(Capability::Progress))
    }

    /// Result message and payload of a completed job
    async fn result(&mut self) -> Result<(String, Vec<u8>), HandlerError> {
        Err(HandlerError::Unsupported(Capability::Result))
    }

    async fn setup_service(&mut self, _service_id: &str) -> Result<String, HandlerError> {
        Err(HandlerError::Unsupported(Capability::SetupService))
    }

    async fn teardown_service(&mut self, _service_id: &str) -> Result<String, HandlerError> {
        Err(HandlerError::Unsupported(Capability::TeardownService))
    }
}

/// Everything a factory gets to build a handler
pub struct HandlerContext {
    pub job: Job,
    /// Data source segment of the job's document reference
    pub data_source: String,
    pub env: Arc<HandlerEnv>,
}

/// Builds handlers for the runner types it claims
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    fn runner_types(&self) -> &'static [&'static str];

    /// Fails with `BackendUnavailable` when the backend cannot be reached
    async fn create(&self, context: HandlerContext) -> Result<Box<dyn JobHandler>, HandlerError>;
}

/// Engine-wide resources shared by all handlers
#[derive(Clone)]
pub struct HandlerEnv {
    pub documents: Arc<dyn DocumentStore>,
    pub dmss_url: String,
    pub job_api_url: String,
    /// Engine variables handed through to backends, by name
    pub exported_envs: Vec<String>,
    pub container_cli: String,
    pub http: reqwest::Client,
}

impl HandlerEnv {
    pub fn new(documents: Arc<dyn DocumentStore>, config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.dmss_request_timeout)
            .build()?;

        Ok(Self {
            documents,
            dmss_url: config.dmss_api.clone(),
            job_api_url: config.job_api_url.clone(),
            exported_envs: config.envs_to_export.clone(),
            container_cli: config.container_cli.clone(),
            http,
        })
    }

    /// Allow-listed engine variables that are set and non-empty
    pub fn exported_environment(&self) -> Vec<(String, String)> {
        self.exported_envs
            .iter()
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|value| !value.is_empty())
                    .map(|value| (name.clone(), value))
            })
            .collect()
    }

    /// Document store coordinates a backend needs to report back for `job`
    pub fn engine_environment(&self, job: &Job) -> Vec<(String, String)> {
        vec![
            (
                "DMSS_TOKEN".to_string(),
                job.token.clone().unwrap_or_default(),
            ),
            ("DMSS_ID".to_string(), job.dmss_id.clone()),
            ("DMSS_URL".to_string(), self.dmss_url.clone()),
            ("JOB_API_URL".to_string(), self.job_api_url.clone()),
        ]
    }
}
