//! Handler registry
//!
//! An explicit list of handler factories, populated at process start.
//! Resolution is a linear scan over the runner types each factory claims.

use std::sync::Arc;

use dmjobs_core::domain::job::Job;
use dmjobs_core::domain::reference::ReferenceError;
use thiserror::Error;
use tracing::debug;

use super::local_container::LocalContainerFactory;
use super::radix::RadixFactory;
use super::recurring::RecurringJobFactory;
use super::reverse_description::ReverseDescriptionFactory;
use super::{HandlerContext, HandlerEnv, HandlerError, HandlerFactory, JobHandler};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No handler for a job of type '{0}' is configured")]
    NoHandler(String),

    #[error("Job '{0}' has no runner; cannot pick a job handler")]
    MissingRunner(String),

    #[error("Runner type '{0}' is claimed by more than one job handler")]
    DuplicateType(String),

    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

pub struct HandlerRegistry {
    factories: Vec<Arc<dyn HandlerFactory>>,
    env: Arc<HandlerEnv>,
}

impl HandlerRegistry {
    pub fn new(env: HandlerEnv) -> Self {
        Self {
            factories: Vec::new(),
            env: Arc::new(env),
        }
    }

    /// Registry with every bundled handler
    pub fn with_defaults(env: HandlerEnv) -> Result<Self, RegistryError> {
        let mut registry = Self::new(env);
        registry.register(RecurringJobFactory)?;
        registry.register(ReverseDescriptionFactory)?;
        registry.register(LocalContainerFactory)?;
        registry.register(RadixFactory)?;
        Ok(registry)
    }

    /// Adds a factory; each runner type may be claimed once
    pub fn register(&mut self, factory: impl HandlerFactory + 'static) -> Result<(), RegistryError> {
        for runner_type in factory.runner_types() {
            if self.runner_types().contains(runner_type) {
                return Err(RegistryError::DuplicateType(runner_type.to_string()));
            }
        }
        self.factories.push(Arc::new(factory));
        Ok(())
    }

    /// Every runner type some factory claims
    pub fn runner_types(&self) -> Vec<&'static str> {
        self.factories
            .iter()
            .flat_map(|factory| factory.runner_types().iter().copied())
            .collect()
    }

    pub fn env(&self) -> &Arc<HandlerEnv> {
        &self.env
    }

    /// Builds the handler for `job`
    pub async fn resolve(&self, job: Job) -> Result<Box<dyn JobHandler>, RegistryError> {
        let runner_type = job
            .runner_type()
            .ok_or_else(|| RegistryError::MissingRunner(job.job_uid.to_string()))?
            .to_string();

        let factory = self
            .factories
            .iter()
            .find(|factory| factory.runner_types().contains(&runner_type.as_str()))
            .ok_or_else(|| RegistryError::NoHandler(runner_type.clone()))?;

        let data_source = job.data_source()?;
        debug!("Resolved handler for runner type '{}'", runner_type);

        let handler = factory
            .create(HandlerContext {
                job,
                data_source,
                env: Arc::clone(&self.env),
            })
            .await?;
        Ok(handler)
    }
}
