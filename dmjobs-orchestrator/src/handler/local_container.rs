//! Local container handler
//!
//! Runs the job as a detached container on the engine's host through a
//! docker-compatible CLI (`podman` unless configured otherwise). The
//! container is named after the runner and the job, so every later operation
//! finds it again without extra state.

use std::process::Output;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use dmjobs_core::domain::job::{Job, JobStatus};
use dmjobs_core::domain::progress::Progress;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    Capability, HandlerContext, HandlerEnv, HandlerError, HandlerFactory, JobHandler, JobLauncher,
};

pub const RUNNER_TYPE: &str = "dmss://WorkflowDS/Blueprints/LocalContainer";

const CAPABILITIES: &[Capability] = &[
    Capability::Start,
    Capability::Remove,
    Capability::Progress,
    Capability::Result,
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImage {
    pub registry_name: String,
    pub image_name: String,
    pub version: String,
}

impl ContainerImage {
    pub fn full_name(&self) -> String {
        format!("{}/{}:{}", self.registry_name, self.image_name, self.version)
    }
}

/// Command override: one shell-style line or an argument list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CustomCommand {
    Line(String),
    Args(Vec<String>),
}

impl CustomCommand {
    fn into_args(self) -> Vec<String> {
        match self {
            CustomCommand::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CustomCommand::Args(args) => args,
        }
    }
}

/// The runner attributes this handler reads
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalContainerRunner {
    pub name: String,
    pub image: ContainerImage,
    #[serde(default)]
    pub environment_variables: Vec<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub custom_commands: Option<CustomCommand>,
}

/// Container name for a job: runner name plus the first uid segment
pub fn container_name(runner_name: &str, job: &Job) -> String {
    let uid = job.job_uid.to_string();
    let prefix = uid.split('-').next().unwrap_or_default();
    format!("{runner_name}_{prefix}")
}

/// Maps `{{.State.Status}}|{{.State.ExitCode}}` to a job status
pub fn parse_state(state: &str) -> (JobStatus, Option<f64>) {
    let (status, exit_code) = state.trim().split_once('|').unwrap_or((state.trim(), ""));
    match status {
        "created" | "running" | "paused" | "restarting" => (JobStatus::Running, Some(0.0)),
        "exited" if exit_code.trim() == "0" => (JobStatus::Completed, Some(1.0)),
        "exited" | "dead" => (JobStatus::Failed, Some(0.0)),
        _ => (JobStatus::Unknown, None),
    }
}

fn log_output(operation: &str, output: &Output) {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stdout.trim().is_empty() {
        debug!("{} stdout: {}", operation, stdout.trim());
    }
    if !stderr.trim().is_empty() {
        debug!("{} stderr: {}", operation, stderr.trim());
    }
}

pub struct LocalContainerFactory;

#[async_trait]
impl HandlerFactory for LocalContainerFactory {
    fn runner_types(&self) -> &'static [&'static str] {
        &[RUNNER_TYPE]
    }

    async fn create(&self, context: HandlerContext) -> Result<Box<dyn JobHandler>, HandlerError> {
        let runner: LocalContainerRunner = context
            .job
            .runner
            .as_ref()
            .ok_or_else(|| HandlerError::InvalidAttribute("'runner' is missing".to_string()))?
            .view()
            .map_err(|e| HandlerError::invalid_attribute("runner", e))?;

        let handler = LocalContainerHandler {
            container_name: container_name(&runner.name, &context.job),
            runner,
            job: context.job,
            env: context.env,
        };
        handler.check_cli().await?;
        Ok(Box::new(handler))
    }
}

pub struct LocalContainerHandler {
    job: Job,
    runner: LocalContainerRunner,
    container_name: String,
    env: Arc<HandlerEnv>,
}

impl LocalContainerHandler {
    async fn check_cli(&self) -> Result<(), HandlerError> {
        let unavailable = || {
            HandlerError::BackendUnavailable(format!(
                "Support for running local containers has not been configured for this environment ('{}' is not available)",
                self.env.container_cli
            ))
        };

        let output = Command::new(&self.env.container_cli)
            .arg("--version")
            .output()
            .await
            .map_err(|_| unavailable())?;
        if !output.status.success() {
            return Err(unavailable());
        }

        debug!(
            "Container CLI is available: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    /// Runs the container CLI and returns its output, whatever the exit code
    async fn cli(&self, args: &[String]) -> anyhow::Result<Output> {
        let operation = format!(
            "{} {}",
            self.env.container_cli,
            args.first().map(String::as_str).unwrap_or_default()
        );
        let output = Command::new(&self.env.container_cli)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{operation}'"))?;
        log_output(&operation, &output);
        Ok(output)
    }

    async fn cli_checked(&self, args: &[String]) -> anyhow::Result<String> {
        let output = self.cli(args).await?;
        if !output.status.success() {
            bail!(
                "'{} {}' failed with exit code {:?}: {}",
                self.env.container_cli,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Arguments of the detached `run`
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.container_name.clone(),
        ];

        let exported = self
            .env
            .exported_environment()
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"));
        let engine = self
            .env
            .engine_environment(&self.job)
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"));
        for variable in exported
            .chain(self.runner.environment_variables.iter().cloned())
            .chain(engine)
        {
            args.push("-e".to_string());
            args.push(variable);
        }

        if let Some(network) = &self.runner.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        args.push(self.runner.image.full_name());
        if let Some(command) = self.runner.custom_commands.clone() {
            args.extend(command.into_args());
        }
        args
    }

    /// Container state, or `None` when no such container exists
    async fn inspect(&self) -> anyhow::Result<Option<String>> {
        let output = self
            .cli(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{.State.Status}}|{{.State.ExitCode}}".to_string(),
                self.container_name.clone(),
            ])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    async fn logs(&self) -> anyhow::Result<String> {
        self.cli_checked(&["logs".to_string(), self.container_name.clone()])
            .await
    }
}

#[async_trait]
impl JobHandler for LocalContainerHandler {
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
        let image = self.runner.image.full_name();
        info!(
            "Starting container {} from image {}",
            self.container_name, image
        );

        self.cli_checked(&self.run_args()).await.with_context(|| {
            format!(
                "No container could be started from image '{image}'. Sure it is published and that you have access?"
            )
        })?;
        Ok("*** Local container job started successfully ***".to_string())
    }

    async fn remove(&mut self) -> Result<(JobStatus, String), HandlerError> {
        match self.inspect().await? {
            Some(state) => {
                if !state.starts_with("exited") {
                    self.cli(&["kill".to_string(), self.container_name.clone()])
                        .await?;
                }
                self.cli_checked(&["rm".to_string(), self.container_name.clone()])
                    .await?;
            }
            None => info!("Container {} was not found", self.container_name),
        }
        Ok((
            JobStatus::Removed,
            format!("Removed container {}", self.container_name),
        ))
    }

    async fn progress(&mut self) -> Result<Progress, HandlerError> {
        let Some(state) = self.inspect().await? else {
            return Ok(Progress {
                status: JobStatus::Unknown,
                logs: Some(vec![format!(
                    "Failed to poll progress of local container: no container named '{}'",
                    self.container_name
                )]),
                percentage: None,
            });
        };

        let (status, percentage) = parse_state(&state);
        let logs = self.logs().await?;
        Ok(Progress {
            status,
            logs: Some(logs.lines().map(str::to_string).collect()),
            percentage,
        })
    }

    async fn result(&mut self) -> Result<(String, Vec<u8>), HandlerError> {
        let logs = self.logs().await?;
        Ok((
            format!("Output of container {}", self.container_name),
            logs.into_bytes(),
        ))
    }
}
