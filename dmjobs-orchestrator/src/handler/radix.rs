//! Radix job scheduler handler
//!
//! Talks to the job scheduler a Radix application exposes at
//! `http://{jobName}:{schedulerPort}/api/v1/jobs`. The scheduler names each
//! job it starts; that name is kept in the job's `state` for later calls.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use dmjobs_core::domain::job::{Job, JobStatus};
use dmjobs_core::domain::progress::Progress;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::info;

use super::{
    Capability, HandlerContext, HandlerEnv, HandlerError, HandlerFactory, JobHandler, JobLauncher,
};

pub const RUNNER_TYPE: &str = "dmss://WorkflowDS/Blueprints/Radix";

const CAPABILITIES: &[Capability] = &[Capability::Start, Capability::Remove, Capability::Progress];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadixRunner {
    pub job_name: String,
    #[serde(deserialize_with = "port")]
    pub scheduler_port: u16,
}

/// Accepts the port as a number or a numeric string
fn port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl RadixRunner {
    pub fn jobs_url(&self) -> String {
        format!("http://{}:{}/api/v1/jobs", self.job_name, self.scheduler_port)
    }
}

/// What the handler keeps in `Job::state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RadixState {
    job_name: String,
}

#[derive(Debug, Deserialize)]
struct StartedJob {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JobState {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

pub fn map_status(status: &str) -> JobStatus {
    match status {
        "Running" => JobStatus::Running,
        "Failed" => JobStatus::Failed,
        "Succeeded" => JobStatus::Completed,
        _ => JobStatus::Unknown,
    }
}

pub struct RadixFactory;

#[async_trait]
impl HandlerFactory for RadixFactory {
    fn runner_types(&self) -> &'static [&'static str] {
        &[RUNNER_TYPE]
    }

    async fn create(&self, context: HandlerContext) -> Result<Box<dyn JobHandler>, HandlerError> {
        let runner: RadixRunner = context
            .job
            .runner
            .as_ref()
            .ok_or_else(|| HandlerError::InvalidAttribute("'runner' is missing".to_string()))?
            .view()
            .map_err(|e| HandlerError::invalid_attribute("runner", e))?;

        Ok(Box::new(RadixHandler {
            job: context.job,
            runner,
            env: context.env,
        }))
    }
}

pub struct RadixHandler {
    job: Job,
    runner: RadixRunner,
    env: Arc<HandlerEnv>,
}

impl RadixHandler {
    /// URL of the scheduled job started by `start`
    fn job_url(&self) -> Result<String, HandlerError> {
        let state: RadixState = self
            .job
            .state
            .clone()
            .ok_or_else(|| HandlerError::InvalidAttribute("'state.job_name' is missing".to_string()))
            .and_then(|state| {
                serde_json::from_value(state)
                    .map_err(|e| HandlerError::invalid_attribute("state.job_name", e))
            })?;
        Ok(format!("{}/{}", self.runner.jobs_url(), state.job_name))
    }
}

#[async_trait]
impl JobHandler for RadixHandler {
    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn into_job(self: Box<Self>) -> Job {
        self.job
    }

    async fn start(&mut self, _launcher: &dyn JobLauncher) -> Result<String, HandlerError> {
        info!("Starting Radix job {}", self.runner.job_name);

        // the scheduled job connects back to the document store with these
        let payload = json!({
            "DMSS_TOKEN": self.job.token.clone().unwrap_or_default(),
            "DMSS_URL": self.env.dmss_url,
        });
        let url = self.runner.jobs_url();

        let started: StartedJob = self
            .env
            .http
            .post(&url)
            .json(&json!({ "payload": payload.to_string() }))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Failed to start a job at '{url}'"))?
            .json()
            .await
            .context("Radix job scheduler returned an unexpected answer")?;

        let msg = format!("Radix job '{}' started", started.name);
        self.job.state = Some(serde_json::to_value(RadixState {
            job_name: started.name,
        })
        .map_err(|e| HandlerError::Failed(anyhow!(e)))?);
        Ok(msg)
    }

    async fn remove(&mut self) -> Result<(JobStatus, String), HandlerError> {
        let url = self.job_url()?;
        self.env
            .http
            .delete(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Failed to remove the job at '{url}'"))?;
        Ok((JobStatus::Removed, "Removed".to_string()))
    }

    async fn progress(&mut self) -> Result<Progress, HandlerError> {
        let url = self.job_url()?;
        let state: JobState = self
            .env
            .http
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Failed to poll the job at '{url}'"))?
            .json()
            .await
            .context("Radix job scheduler returned an unexpected answer")?;

        Ok(Progress {
            status: map_status(&state.status),
            logs: state.message.map(|message| vec![message]),
            percentage: None,
        })
    }
}
