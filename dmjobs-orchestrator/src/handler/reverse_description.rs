//! Reverse description handler
//!
//! A synchronous demonstration backend: it reads the `description` of the
//! job's input document, reverses it, writes it back and completes the job
//! within `start`.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use dmjobs_core::domain::job::{Job, JobStatus};
use dmjobs_core::domain::progress::Progress;
use dmjobs_core::domain::reference::Reference;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
    Capability, HandlerContext, HandlerEnv, HandlerError, HandlerFactory, JobHandler, JobLauncher,
};

pub const RUNNER_TYPES: &[&str] = &[
    "WorkflowDS/Blueprints/ReverseDescription",
    "dmss://WorkflowDS/Blueprints/ReverseDescription",
];

const CAPABILITIES: &[Capability] = &[Capability::Start, Capability::Progress, Capability::Result];

pub struct ReverseDescriptionFactory;

#[async_trait]
impl HandlerFactory for ReverseDescriptionFactory {
    fn runner_types(&self) -> &'static [&'static str] {
        RUNNER_TYPES
    }

    async fn create(&self, context: HandlerContext) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(ReverseDescriptionHandler {
            job: context.job,
            data_source: context.data_source,
            env: context.env,
        }))
    }
}

pub struct ReverseDescriptionHandler {
    job: Job,
    data_source: String,
    env: Arc<HandlerEnv>,
}

pub fn reverse(text: &str) -> String {
    text.chars().rev().collect()
}

impl ReverseDescriptionHandler {
    /// Reference of the input document, if the input is not embedded
    fn input_reference(&self) -> Result<Option<String>, HandlerError> {
        let Some(input) = self.job.application_input.as_ref() else {
            return Err(HandlerError::InvalidAttribute(
                "'applicationInput' is missing".to_string(),
            ));
        };

        if let Some(address) = input.get("address").and_then(Value::as_str) {
            if !address.starts_with('~') {
                return Ok(Some(address.to_string()));
            }
        }

        if let Some(id) = input.get("_id").and_then(Value::as_str) {
            let protocol = self
                .job
                .reference()
                .map_err(|e| HandlerError::invalid_attribute("dmss_id", e))?
                .protocol;
            return Ok(Some(
                Reference::by_id(&protocol, &self.data_source, id).to_string(),
            ));
        }

        Ok(None)
    }

    async fn reverse_input(&mut self) -> anyhow::Result<String> {
        let reversed = match self.input_reference()? {
            Some(reference) => {
                let token = self
                    .job
                    .token
                    .clone()
                    .ok_or_else(|| anyhow!("Job has no document store token"))?;
                let mut document = self
                    .env
                    .documents
                    .get_document(&reference, 0, &token)
                    .await
                    .with_context(|| format!("Failed to fetch input '{reference}'"))?;

                let description = document
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let reversed = reverse(description);
                debug!("Writing reversed description back to '{}'", reference);

                document
                    .as_object_mut()
                    .ok_or_else(|| anyhow!("Input '{reference}' is not a document"))?
                    .insert("description".to_string(), Value::String(reversed.clone()));
                self.env
                    .documents
                    .update_document(&reference, &document, &token)
                    .await
                    .with_context(|| format!("Failed to update input '{reference}'"))?;
                reversed
            }
            None => {
                let description = self
                    .job
                    .application_input
                    .as_ref()
                    .and_then(|input| input.get("description"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        HandlerError::InvalidAttribute(
                            "'applicationInput' has neither an address nor a description"
                                .to_string(),
                        )
                    })?;
                reverse(description)
            }
        };
        Ok(reversed)
    }
}

#[async_trait]
impl JobHandler for ReverseDescriptionHandler {
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
        let reversed = self.reverse_input().await?;
        info!("Reversed description of job {}", self.job.job_uid);

        self.job.result = Some(json!({ "description": reversed }));
        self.job.percentage = Some(1.0);
        self.job.set_status(JobStatus::Completed);
        Ok("OK".to_string())
    }

    async fn progress(&mut self) -> Result<Progress, HandlerError> {
        Ok(Progress {
            status: self.job.status,
            logs: Some(self.job.log.clone()),
            percentage: self.job.percentage,
        })
    }

    async fn result(&mut self) -> Result<(String, Vec<u8>), HandlerError> {
        let reversed = self
            .job
            .result
            .as_ref()
            .and_then(|result| result.get("description"))
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::Failed(anyhow!("Job has no reversed description")))?;
        Ok(("Done".to_string(), reversed.as_bytes().to_vec()))
    }
}
