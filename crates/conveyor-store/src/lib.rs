//! # Conveyor store
//!
//! A narrow SQL-backed interface with driver adapters that plug in via the
//! [`JobStatusStore`] trait (spec §4.3). `conveyor-store-postgres` and
//! `conveyor-store-mysql` each provide one dialect; this crate only fixes
//! the contract and the schema-version constant both must agree with.

use anyhow::Result;
use async_trait::async_trait;
use conveyor_core::{JobStatus, ProcessedJob};
use uuid::Uuid;

/// Compile-time schema version every adapter's DB must report at startup
/// (spec §4.3). A mismatch is fatal before the owning process opens any
/// listener (spec §8 scenario S7).
pub const SCHEMA_VERSION: i32 = 1;

/// The persisted job-status store: insert-or-replace by id, query by id set.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Inserts or replaces the row for `job.job.id` (last writer wins).
    async fn upsert_job(&self, job: &ProcessedJob) -> Result<()>;

    /// Returns `(id, successful)` pairs for every id in `ids` that has a row.
    /// Unknown ids are simply absent from the result — this is not an error.
    async fn job_statuses(&self, ids: &[Uuid]) -> Result<Vec<JobStatus>>;

    /// Returns full `ProcessedJob` rows for every id in `ids` that has a row.
    async fn job_rows(&self, ids: &[Uuid]) -> Result<Vec<ProcessedJob>>;

    /// The schema version the connected database currently reports
    /// (the `SchemaVersion` row with `valid_to IS NULL`).
    async fn schema_version(&self) -> Result<i32>;

    /// Verifies the connected database's schema version matches
    /// [`SCHEMA_VERSION`], failing fatally otherwise (spec §4.3, §8 S7).
    async fn verify_schema(&self) -> Result<()> {
        let found = self.schema_version().await?;
        if found != SCHEMA_VERSION {
            anyhow::bail!(conveyor_core::ConveyorError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found,
            });
        }
        Ok(())
    }
}
