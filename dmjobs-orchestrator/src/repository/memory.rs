//! In-memory stores
//!
//! Drop-in replacements for the Postgres stores, used for embedding the
//! engine and for tests. Jobs are kept serialized so they go through the
//! same encoding as the persistent store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dmjobs_core::domain::job::Job;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::job::{JobStore, StoreError, decode, encode};
use super::trigger::{Trigger, TriggerStore};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, serde_json::Value>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_uid: Uuid) -> Result<Job, StoreError> {
        let body = self
            .jobs
            .read()
            .await
            .get(&job_uid)
            .cloned()
            .ok_or(StoreError::NotFound(job_uid))?;
        decode(&job_uid.to_string(), body)
    }

    async fn set(&self, job: &Job) -> Result<(), StoreError> {
        let body = encode(job)?;
        self.jobs.write().await.insert(job.job_uid, body);
        Ok(())
    }

    async fn delete(&self, job_uid: Uuid) -> Result<bool, StoreError> {
        Ok(self.jobs.write().await.remove(&job_uid).is_some())
    }

    async fn scan(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.jobs.read().await.keys().copied().collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTriggerStore {
    triggers: RwLock<HashMap<Uuid, Trigger>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.triggers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.triggers.read().await.is_empty()
    }
}

#[async_trait]
impl TriggerStore for InMemoryTriggerStore {
    async fn upsert(&self, trigger: &Trigger) -> Result<(), StoreError> {
        self.triggers
            .write()
            .await
            .insert(trigger.job_uid, trigger.clone());
        Ok(())
    }

    async fn get(&self, job_uid: Uuid) -> Result<Option<Trigger>, StoreError> {
        Ok(self.triggers.read().await.get(&job_uid).cloned())
    }

    async fn remove(&self, job_uid: Uuid) -> Result<bool, StoreError> {
        Ok(self.triggers.write().await.remove(&job_uid).is_some())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>, StoreError> {
        let mut due: Vec<Trigger> = self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.next_fire_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_fire_at);
        Ok(due)
    }

    async fn claim(
        &self,
        trigger: &Trigger,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut triggers = self.triggers.write().await;
        let matches = triggers
            .get(&trigger.job_uid)
            .is_some_and(|stored| stored.next_fire_at == trigger.next_fire_at);
        if !matches {
            return Ok(false);
        }

        match next {
            None => {
                triggers.remove(&trigger.job_uid);
            }
            Some(next) => {
                if let Some(stored) = triggers.get_mut(&trigger.job_uid) {
                    stored.next_fire_at = next;
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_job_store_round_trip_and_delete() {
        let store = InMemoryJobStore::new();
        let mut job = Job::new(Uuid::new_v4(), "dmss://DS/$job", "dmss://DS/Blueprints/Job");
        job.append_log("registered");

        store.set(&job).await.unwrap();
        assert_eq!(store.get(job.job_uid).await.unwrap(), job);
        assert_eq!(store.scan().await.unwrap(), vec![job.job_uid]);

        assert!(store.delete(job.job_uid).await.unwrap());
        assert!(!store.delete(job.job_uid).await.unwrap());
        assert!(matches!(
            store.get(job.job_uid).await,
            Err(StoreError::NotFound(uid)) if uid == job.job_uid
        ));
    }

    #[tokio::test]
    async fn test_due_triggers_are_ordered() {
        let store = InMemoryTriggerStore::new();
        let now = Utc::now();
        let late = Trigger::one_shot(Uuid::new_v4(), now - Duration::seconds(1));
        let early = Trigger::cron(Uuid::new_v4(), "* * * * *", now - Duration::minutes(5));
        let future = Trigger::one_shot(Uuid::new_v4(), now + Duration::minutes(5));
        for trigger in [&late, &early, &future] {
            store.upsert(trigger).await.unwrap();
        }

        let due = store.due(now).await.unwrap();
        assert_eq!(due, vec![early, late]);
    }

    #[tokio::test]
    async fn test_claim_requires_unchanged_trigger() {
        let store = InMemoryTriggerStore::new();
        let now = Utc::now();
        let uid = Uuid::new_v4();
        let original = Trigger::cron(uid, "* * * * *", now);
        store.upsert(&original).await.unwrap();

        // re-registration replaced the trigger after it was loaded
        let replaced = Trigger::cron(uid, "*/5 * * * *", now + Duration::minutes(5));
        store.upsert(&replaced).await.unwrap();
        assert!(!store.claim(&original, Some(now + Duration::minutes(1))).await.unwrap());

        assert!(store.claim(&replaced, None).await.unwrap());
        assert!(store.get(uid).await.unwrap().is_none());
    }
}
