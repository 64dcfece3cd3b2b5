//! Trigger scheduler
//!
//! Arms one-shot and cron triggers and fires them when due. Each firing runs
//! on its own task; the number of concurrently running jobs is bounded by a
//! semaphore. What a firing does is up to the [`TriggerTarget`]; the
//! scheduler only guarantees the timing.

pub mod cron;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{StoreError, Trigger, TriggerKind, TriggerStore};

pub use cron::{CronError, CronSchedule};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Cron(#[from] CronError),

    #[error("Cron expression '{0}' has no upcoming fire time")]
    NoUpcomingRun(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Receiver of trigger firings
#[async_trait]
pub trait TriggerTarget: Send + Sync {
    async fn fire(&self, job_uid: Uuid);
}

pub struct Scheduler {
    triggers: Arc<dyn TriggerStore>,
    tick_interval: Duration,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        tick_interval: Duration,
        max_parallel_jobs: usize,
    ) -> Self {
        Self {
            triggers,
            tick_interval,
            semaphore: Arc::new(Semaphore::new(max_parallel_jobs)),
        }
    }

    /// Arms a trigger that fires once at `at`, replacing any trigger of the job
    pub async fn schedule_once(
        &self,
        job_uid: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.triggers.upsert(&Trigger::one_shot(job_uid, at)).await?;
        debug!("Armed one-shot trigger for job {} at {}", job_uid, at);
        Ok(())
    }

    /// Arms a cron trigger, replacing any trigger of the job
    ///
    /// Returns the first fire time, which is always after `now`.
    pub async fn schedule_cron(
        &self,
        job_uid: Uuid,
        cron: &CronSchedule,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let next = cron
            .next_after(now)
            .ok_or_else(|| SchedulerError::NoUpcomingRun(cron.to_string()))?;

        self.triggers
            .upsert(&Trigger::cron(job_uid, cron.expression(), next))
            .await?;
        debug!("Armed cron trigger '{}' for job {}, next run at {}", cron, job_uid, next);
        Ok(next)
    }

    /// Removes the job's trigger; returns whether there was one
    pub async fn cancel(&self, job_uid: Uuid) -> Result<bool, SchedulerError> {
        Ok(self.triggers.remove(job_uid).await?)
    }

    pub async fn next_fire_time(
        &self,
        job_uid: Uuid,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        Ok(self
            .triggers
            .get(job_uid)
            .await?
            .map(|trigger| trigger.next_fire_at))
    }

    /// Starts the tick loop on a background task
    pub fn spawn(self: Arc<Self>, target: Arc<dyn TriggerTarget>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(target).await })
    }

    /// Fires due triggers every tick, forever
    pub async fn run(&self, target: Arc<dyn TriggerTarget>) {
        info!("Starting scheduler (interval: {:?})", self.tick_interval);

        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.tick(Arc::clone(&target), Utc::now()).await {
                Ok(fired) => {
                    if !fired.is_empty() {
                        info!("Fired {} trigger(s) this tick", fired.len());
                    }
                }
                Err(e) => {
                    error!("Error during scheduler tick: {}", e);
                }
            }
        }
    }

    /// Performs a single scheduling pass at `now`
    ///
    /// Returns the handles of the spawned firings. Triggers that cannot get a
    /// permit stay due and are picked up by a later pass.
    pub async fn tick(
        &self,
        target: Arc<dyn TriggerTarget>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JoinHandle<()>>, SchedulerError> {
        let due = self.triggers.due(now).await?;
        let mut handles = Vec::new();

        for trigger in due {
            let job_uid = trigger.job_uid;

            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                debug!("Max parallel jobs reached, leaving job {} due", job_uid);
                continue;
            };

            let next = match trigger.kind {
                TriggerKind::OneShot => None,
                TriggerKind::Cron => match self.next_cron_run(&trigger, now) {
                    Ok(next) => Some(next),
                    Err(e) => {
                        warn!("Dropping cron trigger of job {}: {}", job_uid, e);
                        self.triggers.remove(job_uid).await?;
                        continue;
                    }
                },
            };

            if !self.triggers.claim(&trigger, next).await? {
                debug!("Trigger of job {} changed before it was claimed", job_uid);
                continue;
            }

            handles.push(Self::spawn_firing(Arc::clone(&target), job_uid, permit));
        }

        Ok(handles)
    }

    fn next_cron_run(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let cron = CronSchedule::parse(trigger.cron.as_deref().unwrap_or_default())?;
        cron.next_after(now)
            .ok_or_else(|| SchedulerError::NoUpcomingRun(cron.to_string()))
    }

    fn spawn_firing(
        target: Arc<dyn TriggerTarget>,
        job_uid: Uuid,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _permit = permit;
            debug!("Firing trigger of job {}", job_uid);
            target.fire(job_uid).await;
            // Permit is automatically released when dropped
        })
    }
}
