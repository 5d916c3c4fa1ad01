//! MySQL implementation of the Conveyor job store.
//!
//! Schema mirrors `conveyor-store-postgres` (see that crate's docs); the
//! dialect differences are the upsert statement (`REPLACE INTO` rather than
//! `INSERT ... ON CONFLICT`) and the IN-list query, which MySQL's driver
//! requires to be built as one `?` placeholder per id rather than bound as
//! an array (spec §4.3: "an IN-list query builder for N bound parameters").

use anyhow::{Context, Result};
use async_trait::async_trait;
use conveyor_core::{JobSpecification, JobStatus, ProcessedJob, UnprocessedJob};
use conveyor_store::JobStatusStore;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Clone)]
pub struct MySqlJobStore {
    pool: MySqlPool,
}

impl MySqlJobStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("could not open MySQL connection pool")?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("connection ping failed")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
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

/// Builds `<column> IN (?, ?, ..., ?)` for `n` placeholders.
fn in_list(column: &str, n: usize) -> String {
    let placeholders = std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ");
    format!("{column} IN ({placeholders})")
}

fn row_to_processed_job(row: &sqlx::mysql::MySqlRow) -> Result<ProcessedJob> {
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
impl JobStatusStore for MySqlJobStore {
    /// Insert-or-replace by id via MySQL's `REPLACE` (spec §4.3).
    async fn upsert_job(&self, job: &ProcessedJob) -> Result<()> {
        let mut tx = self.pool.begin().await.context("opening transaction failed")?;

        sqlx::query(
            r#"
            REPLACE INTO jobs (
                id, job_name, repository, payload, lease_path, dependencies,
                worker_name, start_time, finish_time, successful, error_message
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?)
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
        .context("executing REPLACE statement failed")?;

        tx.commit().await.context("committing transaction failed")?;
        Ok(())
    }

    async fn job_statuses(&self, ids: &[Uuid]) -> Result<Vec<JobStatus>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query_str = format!("SELECT id, successful FROM jobs WHERE {}", in_list("id", ids.len()));
        let mut query = sqlx::query(&query_str);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.context("SQL query failed")?;

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
        let query_str = format!("SELECT * FROM jobs WHERE {}", in_list("id", ids.len()));
        let mut query = sqlx::query(&query_str);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.context("SQL query failed")?;

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
