//! PostgreSQL implementation of the Conveyor job store.
//!
//! # Database schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id              UUID PRIMARY KEY,
//!     job_name        TEXT NOT NULL,
//!     repository      TEXT NOT NULL,
//!     payload         TEXT NOT NULL,
//!     lease_path      TEXT NOT NULL,
//!     dependencies    TEXT NOT NULL,   -- comma-joined UUIDs
//!     worker_name     TEXT NOT NULL,
//!     start_time      TIMESTAMPTZ NOT NULL,
//!     finish_time     TIMESTAMPTZ NOT NULL,
//!     successful      BOOLEAN NOT NULL,
//!     error_message   TEXT NOT NULL
//! );
//!
//! CREATE TABLE schema_version (
//!     version_number  INTEGER NOT NULL,
//!     valid_from      TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     valid_to        TIMESTAMPTZ
//! );
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use conveyor_core::{JobSpecification, JobStatus, ProcessedJob, UnprocessedJob};
use conveyor_store::JobStatusStore;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Connects to `database_url`, pings the connection and returns a store.
    /// Does **not** verify the schema version — call
    /// [`JobStatusStore::verify_schema`] once construction succeeds, as the
    /// server's startup sequence does (spec §4.3).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("could not open PostgreSQL connection pool")?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("connection ping failed")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn join_dependencies(deps: &BTreeSet<Uuid>) -> String {
    deps.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn split_dependencies(joined: &str) -> BTreeSet<Uuid> {
    if joined.is_empty() {
        return BTreeSet::new();
    }
    joined
        .split(',')
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}

fn row_to_processed_job(row: &sqlx::postgres::PgRow) -> Result<ProcessedJob> {
    let deps: String = row.try_get("dependencies")?;
    Ok(ProcessedJob {
        job: UnprocessedJob {
            id: row.try_get("id")?,
            spec: JobSpecification {
                job_name: row.try_get("job_name")?,
                repository: row.try_get("repository")?,
                payload: row.try_get("payload")?,
                lease_path: row.try_get("lease_path")?,
                dependencies: split_dependencies(&deps),
            },
        },
        worker_name: row.try_get("worker_name")?,
        start_time: row.try_get("start_time")?,
        finish_time: row.try_get("finish_time")?,
        successful: row.try_get("successful")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl JobStatusStore for PgJobStore {
    /// Insert-or-replace by id: `INSERT ... ON CONFLICT(id) DO UPDATE`
    /// (spec §4.3). The source's PostgreSQL dialect used `WHERE ID == $1`,
    /// which is not valid SQL; this uses `=` (spec §9 design note).
    async fn upsert_job(&self, job: &ProcessedJob) -> Result<()> {
        let mut tx = self.pool.begin().await.context("opening transaction failed")?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_name, repository, payload, lease_path, dependencies,
                worker_name, start_time, finish_time, successful, error_message
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            ON CONFLICT (id) DO UPDATE SET
                job_name = EXCLUDED.job_name,
                repository = EXCLUDED.repository,
                payload = EXCLUDED.payload,
                lease_path = EXCLUDED.lease_path,
                dependencies = EXCLUDED.dependencies,
                worker_name = EXCLUDED.worker_name,
                start_time = EXCLUDED.start_time,
                finish_time = EXCLUDED.finish_time,
                successful = EXCLUDED.successful,
                error_message = EXCLUDED.error_message
            "#,
        )
        .bind(job.job.id)
        .bind(&job.job.spec.job_name)
        .bind(&job.job.spec.repository)
        .bind(&job.job.spec.payload)
        .bind(&job.job.spec.lease_path)
        .bind(join_dependencies(&job.job.spec.dependencies))
        .bind(&job.worker_name)
        .bind(job.start_time)
        .bind(job.finish_time)
        .bind(job.successful)
        .bind(&job.error_message)
        .execute(&mut *tx)
        .await
        .context("executing upsert statement failed")?;

        tx.commit().await.context("committing transaction failed")?;
        Ok(())
    }

    async fn job_statuses(&self, ids: &[Uuid]) -> Result<Vec<JobStatus>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT id, successful FROM jobs WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .context("SQL query failed")?;

        rows.into_iter()
            .map(|row| {
                Ok(JobStatus {
                    id: row.try_get("id")?,
                    successful: row.try_get("successful")?,
                })
            })
            .collect()
    }

    async fn job_rows(&self, ids: &[Uuid]) -> Result<Vec<ProcessedJob>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM jobs WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .context("SQL query failed")?;

        rows.iter().map(row_to_processed_job).collect()
    }

    async fn schema_version(&self) -> Result<i32> {
        let row = sqlx::query(
            "SELECT version_number FROM schema_version WHERE valid_to IS NULL",
        )
        .fetch_one(&self.pool)
        .await
        .context("could not read current schema version")?;
        Ok(row.try_get("version_number")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_joining_round_trips() {
        let mut deps = BTreeSet::new();
        deps.insert(Uuid::nil());
        let joined = join_dependencies(&deps);
        assert_eq!(split_dependencies(&joined), deps);
        assert_eq!(split_dependencies(""), BTreeSet::new());
    }
}
