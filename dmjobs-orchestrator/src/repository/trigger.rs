//! Trigger Repository
//!
//! Persisted scheduling directives. Triggers live apart from the job records
//! so a restart finds them again without scanning jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::job::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fires once and is gone
    OneShot,
    /// Re-armed with the next cron time on every firing
    Cron,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::OneShot => "one_shot",
            TriggerKind::Cron => "cron",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "one_shot" => Some(TriggerKind::OneShot),
            "cron" => Some(TriggerKind::Cron),
            _ => None,
        }
    }
}

/// A scheduled invocation of `run` for one job
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub job_uid: Uuid,
    pub kind: TriggerKind,
    /// Cron expression, set for cron triggers only
    pub cron: Option<String>,
    pub next_fire_at: DateTime<Utc>,
}

impl Trigger {
    pub fn one_shot(job_uid: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            job_uid,
            kind: TriggerKind::OneShot,
            cron: None,
            next_fire_at: at,
        }
    }

    pub fn cron(job_uid: Uuid, expression: impl Into<String>, next: DateTime<Utc>) -> Self {
        Self {
            job_uid,
            kind: TriggerKind::Cron,
            cron: Some(expression.into()),
            next_fire_at: next,
        }
    }
}

/// Persistence of triggers, at most one per job
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Inserts the trigger, replacing any trigger of the same job
    async fn upsert(&self, trigger: &Trigger) -> Result<(), StoreError>;

    async fn get(&self, job_uid: Uuid) -> Result<Option<Trigger>, StoreError>;

    /// Returns whether a trigger was removed
    async fn remove(&self, job_uid: Uuid) -> Result<bool, StoreError>;

    /// Triggers whose fire time is at or before `now`, earliest first
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>, StoreError>;

    /// Claims a due trigger for firing
    ///
    /// Deletes it when `next` is `None`, otherwise moves it to `next`. Fails
    /// (returns `false`) when the stored trigger no longer matches `trigger`,
    /// e.g. because it was replaced or cancelled meanwhile.
    async fn claim(
        &self,
        trigger: &Trigger,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;
}

/// Postgres-backed trigger store
#[derive(Debug, Clone)]
pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn upsert(&self, trigger: &Trigger) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_triggers (job_uid, kind, cron, next_fire_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_uid) DO UPDATE
            SET kind = EXCLUDED.kind, cron = EXCLUDED.cron, next_fire_at = EXCLUDED.next_fire_at
            "#,
        )
        .bind(trigger.job_uid)
        .bind(trigger.kind.as_str())
        .bind(&trigger.cron)
        .bind(trigger.next_fire_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, job_uid: Uuid) -> Result<Option<Trigger>, StoreError> {
        let row = sqlx::query_as::<_, TriggerRow>(
            r#"
            SELECT job_uid, kind, cron, next_fire_at
            FROM scheduled_triggers
            WHERE job_uid = $1
            "#,
        )
        .bind(job_uid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trigger::try_from).transpose()
    }

    async fn remove(&self, job_uid: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM scheduled_triggers WHERE job_uid = $1")
            .bind(job_uid)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>, StoreError> {
        let rows = sqlx::query_as::<_, TriggerRow>(
            r#"
            SELECT job_uid, kind, cron, next_fire_at
            FROM scheduled_triggers
            WHERE next_fire_at <= $1
            ORDER BY next_fire_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trigger::try_from).collect()
    }

    async fn claim(
        &self,
        trigger: &Trigger,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = match next {
            None => {
                sqlx::query(
                    "DELETE FROM scheduled_triggers WHERE job_uid = $1 AND next_fire_at = $2",
                )
                .bind(trigger.job_uid)
                .bind(trigger.next_fire_at)
                .execute(&self.pool)
                .await?
            }
            Some(next) => {
                sqlx::query(
                    r#"
                    UPDATE scheduled_triggers
                    SET next_fire_at = $3
                    WHERE job_uid = $1 AND next_fire_at = $2
                    "#,
                )
                .bind(trigger.job_uid)
                .bind(trigger.next_fire_at)
                .bind(next)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TriggerRow {
    job_uid: Uuid,
    kind: String,
    cron: Option<String>,
    next_fire_at: DateTime<Utc>,
}

impl TryFrom<TriggerRow> for Trigger {
    type Error = StoreError;

    fn try_from(row: TriggerRow) -> Result<Self, Self::Error> {
        let kind = TriggerKind::parse(&row.kind).ok_or_else(|| StoreError::Corrupt {
            key: row.job_uid.to_string(),
            reason: format!("unknown trigger kind '{}'", row.kind),
        })?;

        Ok(Trigger {
            job_uid: row.job_uid,
            kind,
            cron: row.cron,
            next_fire_at: row.next_fire_at,
        })
    }
}
