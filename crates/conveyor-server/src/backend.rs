//! The job coordination backend (spec §4.5): submits new jobs to the
//! broker, and persists/reports completions against the job store. No
//! knowledge of HTTP lives here — that's `conveyor-server::http`.

use conveyor_broker::JobBus;
use conveyor_core::{
    new_job_id, BasicReply, ConveyorError, GetJobStatusReply, JobSpecification,
    PostJobStatusReply, PostNewJobReply, ProcessedJob, UnprocessedJob,
};
use conveyor_store::JobStatusStore;
use std::sync::Arc;
use uuid::Uuid;

pub struct Backend {
    store: Arc<dyn JobStatusStore>,
    bus: Arc<dyn JobBus>,
}

impl Backend {
    /// Verifies the store's schema version matches before accepting traffic
    /// (spec §4.3: "fatal mismatch before opening listener").
    pub async fn new(store: Arc<dyn JobStatusStore>, bus: Arc<dyn JobBus>) -> Result<Self, ConveyorError> {
        store.verify_schema().await.map_err(|e| {
            e.downcast::<ConveyorError>()
                .unwrap_or_else(|e| ConveyorError::ConfigInvalid(e.to_string()))
        })?;
        Ok(Self { store, bus })
    }

    fn validate(spec: &JobSpecification) -> Result<(), ConveyorError> {
        if spec.repository.is_empty() {
            return Err(ConveyorError::BadRequest("Repository must not be empty".into()));
        }
        if spec.lease_path.is_empty() {
            return Err(ConveyorError::BadRequest("LeasePath must not be empty".into()));
        }
        Ok(())
    }

    /// `POST /jobs/new`: mints an id, normalizes the lease path, and
    /// publishes the job to the `new-jobs` queue.
    pub async fn post_new_job(&self, mut spec: JobSpecification) -> Result<PostNewJobReply, ConveyorError> {
        Self::validate(&spec)?;
        spec.normalize();

        let job = UnprocessedJob {
            id: new_job_id(),
            spec,
        };
        self.bus
            .publish_new_job(&job)
            .await
            .map_err(|e| ConveyorError::Transient(e.to_string()))?;

        Ok(PostNewJobReply {
            basic: BasicReply::ok(),
            id: Some(job.id),
        })
    }

    /// `GET /jobs/complete`: reports `(id, successful)` pairs, or full job
    /// rows when `full` is set.
    pub async fn get_job_status(&self, ids: &[Uuid], full: bool) -> Result<GetJobStatusReply, ConveyorError> {
        if ids.is_empty() {
            return Err(ConveyorError::BadRequest("at least one id is required".into()));
        }
        if full {
            let jobs = self
                .store
                .job_rows(ids)
                .await
                .map_err(|e| ConveyorError::Transient(e.to_string()))?;
            Ok(GetJobStatusReply {
                basic: BasicReply::ok(),
                ids: vec![],
                jobs,
            })
        } else {
            let ids = self
                .store
                .job_statuses(ids)
                .await
                .map_err(|e| ConveyorError::Transient(e.to_string()))?;
            Ok(GetJobStatusReply {
                basic: BasicReply::ok(),
                ids,
                jobs: vec![],
            })
        }
    }

    /// `POST /jobs/complete`: persists the outcome and fans it out to
    /// `completed-jobs` subscribers.
    pub async fn post_job_status(&self, job: &ProcessedJob) -> Result<PostJobStatusReply, ConveyorError> {
        if !job.is_consistent() {
            return Err(ConveyorError::BadRequest(
                "Successful and ErrorMessage are inconsistent, or FinishTime precedes StartTime".into(),
            ));
        }
        self.store
            .upsert_job(job)
            .await
            .map_err(|e| ConveyorError::Transient(e.to_string()))?;

        let status = conveyor_core::JobStatus {
            id: job.job.id,
            successful: job.successful,
        };
        self.bus
            .publish_completion(&status)
            .await
            .map_err(|e| ConveyorError::Transient(e.to_string()))?;

        Ok(PostJobStatusReply {
            basic: BasicReply::ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_testing::{InMemoryBus, InMemoryJobStore};
    use std::collections::BTreeSet;

    async fn backend() -> (Backend, Arc<InMemoryJobStore>, Arc<InMemoryBus>) {
        let store = Arc::new(InMemoryJobStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let backend = Backend::new(store.clone(), bus.clone()).await.unwrap();
        (backend, store, bus)
    }

    #[tokio::test]
    async fn post_new_job_normalizes_and_publishes() {
        let (backend, _store, bus) = backend().await;
        let spec = JobSpecification {
            job_name: "build".into(),
            repository: "repo.example.org".into(),
            payload: "s|u".into(),
            lease_path: "a/b".into(),
            dependencies: BTreeSet::new(),
        };
        let reply = backend.post_new_job(spec).await.unwrap();
        assert!(reply.id.is_some());
        let published = bus.new_jobs();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].spec.lease_path, "/a/b");
    }

    #[tokio::test]
    async fn post_new_job_rejects_empty_repository() {
        let (backend, _store, _bus) = backend().await;
        let spec = JobSpecification {
            job_name: "".into(),
            repository: "".into(),
            payload: "".into(),
            lease_path: "/a".into(),
            dependencies: BTreeSet::new(),
        };
        assert!(backend.post_new_job(spec).await.is_err());
    }

    #[tokio::test]
    async fn post_job_status_rejects_inconsistent_job() {
        let (backend, _store, _bus) = backend().await;
        let now = chrono::Utc::now();
        let job = ProcessedJob {
            job: UnprocessedJob {
                id: Uuid::new_v4(),
                spec: JobSpecification {
                    job_name: "".into(),
                    repository: "r".into(),
                    payload: "".into(),
                    lease_path: "/a".into(),
                    dependencies: BTreeSet::new(),
                },
            },
            worker_name: "w1".into(),
            start_time: now,
            finish_time: now,
            successful: true,
            error_message: "oops".into(),
        };
        assert!(backend.post_job_status(&job).await.is_err());
    }

    #[tokio::test]
    async fn post_job_status_persists_and_publishes_completion() {
        let (backend, store, bus) = backend().await;
        let now = chrono::Utc::now();
        let job = ProcessedJob {
            job: UnprocessedJob {
                id: Uuid::new_v4(),
                spec: JobSpecification {
                    job_name: "".into(),
                    repository: "r".into(),
                    payload: "".into(),
                    lease_path: "/a".into(),
                    dependencies: BTreeSet::new(),
                },
            },
            worker_name: "w1".into(),
            start_time: now,
            finish_time: now,
            successful: true,
            error_message: String::new(),
        };
        backend.post_job_status(&job).await.unwrap();
        assert_eq!(store.job_statuses(&[job.job.id]).await.unwrap().len(), 1);
        assert_eq!(bus.completions().len(), 1);
    }

    #[tokio::test]
    async fn get_job_status_requires_at_least_one_id() {
        let (backend, _store, _bus) = backend().await;
        assert!(backend.get_job_status(&[], false).await.is_err());
    }
}
