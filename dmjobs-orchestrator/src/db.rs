use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Full serialized job records, keyed by job uid
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_store (
            job_uid TEXT PRIMARY KEY,
            body JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Scheduling directives; kept apart from the job records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_triggers (
            job_uid UUID PRIMARY KEY,
            kind VARCHAR(20) NOT NULL,
            cron TEXT,
            next_fire_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scheduled_triggers_next_fire_at ON scheduled_triggers(next_fire_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
