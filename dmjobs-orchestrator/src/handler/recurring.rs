//! Recurring job handler
//!
//! A recurring job carries a schedule and a job template in its
//! `applicationInput`. Every firing adds a copy of the template under
//! `{dmss_id}.schedule.runs` and registers that copy as an independent job.
//! Outside the schedule's validity window nothing is spawned; once past its
//! end date the recurring job removes itself.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use dmjobs_core::domain::job::{Job, JobStatus};
use dmjobs_core::domain::progress::Progress;
use dmjobs_core::domain::reference::Reference;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::{
    Capability, HandlerContext, HandlerEnv, HandlerError, HandlerFactory, JobHandler, JobLauncher,
};

pub const RUNNER_TYPE: &str = "dmss://WorkflowDS/Blueprints/RecurringJobHandler";

const CAPABILITIES: &[Capability] = &[Capability::Start, Capability::Remove, Capability::Progress];

/// The job document spawned on every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    #[serde(rename = "applicationInput", default, skip_serializing_if = "Option::is_none")]
    pub application_input: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl JobTemplate {
    /// Re-anchors a relative input address
    ///
    /// The template moves one level down (into `schedule.runs`), so an
    /// address relative to it (`~...`) needs one more `~.` hop.
    pub fn relocate_input(&mut self) {
        let Some(input) = self.application_input.as_mut() else {
            return;
        };
        if let Some(Value::String(address)) = input.get_mut("address") {
            if address.starts_with('~') {
                *address = format!("~.{address}");
            }
        }
    }
}

pub struct RecurringJobFactory;

#[async_trait]
impl HandlerFactory for RecurringJobFactory {
    fn runner_types(&self) -> &'static [&'static str] {
        &[RUNNER_TYPE]
    }

    async fn create(&self, context: HandlerContext) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(RecurringJobHandler {
            job: context.job,
            env: context.env,
        }))
    }
}

pub struct RecurringJobHandler {
    job: Job,
    env: Arc<HandlerEnv>,
}

impl RecurringJobHandler {
    async fn spawn_run(&mut self, launcher: &dyn JobLauncher) -> anyhow::Result<String> {
        let msg = format!("Starting scheduled job from \"{}\"", self.job.dmss_id);
        info!("{}", msg);
        self.job.append_log(&msg);

        let input = self
            .job
            .application_input
            .clone()
            .ok_or_else(|| anyhow!("Recurring job has no 'applicationInput' job template"))?;
        let mut template: JobTemplate =
            serde_json::from_value(input).context("The 'applicationInput' is not a job template")?;
        template.relocate_input();

        let token = self
            .job
            .token
            .clone()
            .ok_or_else(|| anyhow!("Recurring job has no document store token"))?;

        let reference = self.job.reference()?;
        let runs = reference.join("schedule.runs").to_string();
        let added = self
            .env
            .documents
            .add_document(&runs, &serde_json::to_value(&template)?, &token)
            .await
            .with_context(|| format!("Failed to add a new run to '{runs}'"))?;

        let child = Reference::by_id(&reference.protocol, &reference.data_source, &added.uid);
        let registration = launcher
            .register(&child.to_string(), Some(token))
            .await
            .with_context(|| format!("Failed to register the new run '{child}'"))?;

        let msg = format!(
            "Job: \"{}\", Status: \"{}\"",
            registration.uid, registration.status
        );
        info!("{}", msg);
        Ok(msg)
    }
}

#[async_trait]
impl JobHandler for RecurringJobHandler {
    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn job(&self) -> &Job {
        &self.job
    }

    fn into_job(self: Box<Self>) -> Job {
        self.job
    }

    async fn start(&mut self, launcher: &dyn JobLauncher) -> Result<String, HandlerError> {
        let schedule = self
            .job
            .schedule
            .clone()
            .ok_or_else(|| HandlerError::InvalidAttribute("'schedule' is missing".to_string()))?;
        let starts_at = schedule
            .starts_at()
            .map_err(|e| HandlerError::invalid_attribute("schedule.startDate", e))?;
        let ends_at = schedule
            .ends_at()
            .map_err(|e| HandlerError::invalid_attribute("schedule.endDate", e))?;
        let now = Utc::now();

        if starts_at.is_some_and(|start| start > now) {
            let msg = format!(
                "Job is not valid yet, and will run for the first time after {}.",
                schedule.start_date.unwrap_or_default()
            );
            info!("{}", msg);
            return Ok(msg);
        }

        if ends_at.is_some_and(|end| end <= now) {
            let msg = format!(
                "Recurring job {} has expired since {}. Removing...",
                self.job.job_uid,
                schedule.end_date.unwrap_or_default()
            );
            info!("{}", msg);
            launcher.remove(self.job.job_uid).await?;
            self.job.set_status(JobStatus::Removed);
            return Ok(msg);
        }

        Ok(self.spawn_run(launcher).await?)
    }

    async fn remove(&mut self) -> Result<(JobStatus, String), HandlerError> {
        Ok((JobStatus::Removed, "OK. Nothing to clean up".to_string()))
    }

    async fn progress(&mut self) -> Result<Progress, HandlerError> {
        Ok(Progress {
            status: self.job.status,
            logs: Some(self.job.log.clone()),
            percentage: self.job.percentage,
        })
    }
}
