//! In-memory [`JobStatusStore`] double, mirroring the teacher's
//! `TestJobQueue` pattern: a `Mutex`-guarded map standing in for a real
//! database in tests that shouldn't need one.

use anyhow::Result;
use async_trait::async_trait;
use conveyor_core::{JobStatus, ProcessedJob};
use conveyor_store::{JobStatusStore, SCHEMA_VERSION};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub struct InMemoryJobStore {
    rows: Mutex<HashMap<Uuid, ProcessedJob>>,
    schema_version: i32,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Builds a store reporting a mismatched schema version, for exercising
    /// the startup gate.
    pub fn with_schema_version(version: i32) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            schema_version: version,
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStatusStore for InMemoryJobStore {
    async fn upsert_job(&self, job: &ProcessedJob) -> Result<()> {
        self.rows.lock().unwrap().insert(job.job.id, job.clone());
        Ok(())
    }

    async fn job_statuses(&self, ids: &[Uuid]) -> Result<Vec<JobStatus>> {
        let rows = self.rows.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id))
            .map(|job| JobStatus {
                id: job.job.id,
                successful: job.successful,
            })
            .collect())
    }

    async fn job_rows(&self, ids: &[Uuid]) -> Result<Vec<ProcessedJob>> {
        let rows = self.rows.lock().unwrap();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn schema_version(&self) -> Result<i32> {
        Ok(self.schema_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::UnprocessedJob;
    use std::collections::BTreeSet;

    fn job(id: Uuid, successful: bool) -> ProcessedJob {
        let now = chrono::Utc::now();
        ProcessedJob {
            job: UnprocessedJob {
                id,
                spec: conveyor_core::JobSpecification {
                    job_name: "".into(),
                    repository: "r".into(),
                    payload: "".into(),
                    lease_path: "/a".into(),
                    dependencies: BTreeSet::new(),
                },
            },
            worker_name: "w".into(),
            start_time: now,
            finish_time: now,
            successful,
            error_message: if successful { String::new() } else { "x".into() },
        }
    }

    #[tokio::test]
    async fn upsert_then_query_round_trips() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.upsert_job(&job(id, true)).await.unwrap();
        let statuses = store.job_statuses(&[id]).await.unwrap();
        assert_eq!(statuses, vec![JobStatus { id, successful: true }]);
    }

    #[tokio::test]
    async fn unknown_ids_are_silently_absent() {
        let store = InMemoryJobStore::new();
        assert!(store.job_statuses(&[Uuid::new_v4()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_schema_version_fails_verify() {
        let store = InMemoryJobStore::with_schema_version(SCHEMA_VERSION + 1);
        assert!(store.verify_schema().await.is_err());
    }
}
