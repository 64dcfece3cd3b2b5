//! Job Repository
//!
//! The job store holds the engine's fast copy of every registered job: the
//! full serialized record, private fields included, keyed by job uid.

use async_trait::async_trait;
use dmjobs_core::domain::job::Job;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

/// SQLSTATE codes Postgres uses for rejected credentials
const AUTH_FAILURE_CODES: &[&str] = &["28P01", "28000"];

/// Errors shared by the job store and the trigger store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No job with id '{0}' is registered")]
    NotFound(Uuid),

    #[error("The store rejected its credentials. Make sure {credential} is set correctly")]
    Unauthorized { credential: &'static str },

    #[error("Stored entry '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let unauthorized = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| AUTH_FAILURE_CODES.iter().any(|c| code == *c));

        if unauthorized {
            StoreError::Unauthorized {
                credential: "DATABASE_URL",
            }
        } else {
            StoreError::Database(err)
        }
    }
}

/// Key-value persistence of jobs
///
/// Whole records are read and written per key; concurrent writers follow
/// last-write-wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_uid: Uuid) -> Result<Job, StoreError>;

    async fn set(&self, job: &Job) -> Result<(), StoreError>;

    /// Returns whether an entry was deleted
    async fn delete(&self, job_uid: Uuid) -> Result<bool, StoreError>;

    /// Uids of every stored job
    async fn scan(&self) -> Result<Vec<Uuid>, StoreError>;
}

pub(crate) fn encode(job: &Job) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(job).map_err(|e| StoreError::Corrupt {
        key: job.job_uid.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn decode(key: &str, body: serde_json::Value) -> Result<Job, StoreError> {
    serde_json::from_value(body).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Postgres-backed job store
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, job_uid: Uuid) -> Result<Job, StoreError> {
        let key = job_uid.to_string();
        let row = sqlx::query_as::<_, JobRow>("SELECT job_uid, body FROM job_store WHERE job_uid = $1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => decode(&row.job_uid, row.body),
            None => Err(StoreError::NotFound(job_uid)),
        }
    }

    async fn set(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_store (job_uid, body, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_uid) DO UPDATE
            SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.job_uid.to_string())
        .bind(encode(job)?)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, job_uid: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM job_store WHERE job_uid = $1")
            .bind(job_uid.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan(&self) -> Result<Vec<Uuid>, StoreError> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT job_uid FROM job_store")
            .fetch_all(&self.pool)
            .await?;

        Ok(parse_keys(keys))
    }
}

/// Keeps keys that are job uids; anything else in the table is skipped
pub(crate) fn parse_keys(keys: impl IntoIterator<Item = String>) -> Vec<Uuid> {
    keys.into_iter()
        .filter_map(|key| match Uuid::parse_str(&key) {
            Ok(uid) => Some(uid),
            Err(_) => {
                tracing::warn!("Ignoring job store key '{}': not a job uid", key);
                None
            }
        })
        .collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    job_uid: String,
    body: serde_json::Value,
}
