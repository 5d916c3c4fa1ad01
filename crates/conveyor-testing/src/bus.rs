//! In-memory [`JobBus`] double. Captures published messages for assertions
//! and optionally fans completions out to a `tokio::sync::broadcast`
//! channel so waiters can be driven the same way a real subscription would.

use anyhow::Result;
use async_trait::async_trait;
use conveyor_broker::JobBus;
use conveyor_core::{JobStatus, UnprocessedJob};
use std::sync::Mutex;
use tokio::sync::broadcast;

pub struct InMemoryBus {
    new_jobs: Mutex<Vec<UnprocessedJob>>,
    completions: Mutex<Vec<JobStatus>>,
    completion_tx: broadcast::Sender<JobStatus>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (completion_tx, _) = broadcast::channel(256);
        Self {
            new_jobs: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
            completion_tx,
        }
    }

    pub fn new_jobs(&self) -> Vec<UnprocessedJob> {
        self.new_jobs.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<JobStatus> {
        self.completions.lock().unwrap().clone()
    }

    /// Subscribes to completions published through this bus, the same way
    /// a worker or client would subscribe to `completed-jobs`.
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatus> {
        self.completion_tx.subscribe()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobBus for InMemoryBus {
    async fn publish_new_job(&self, job: &UnprocessedJob) -> Result<()> {
        self.new_jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn publish_completion(&self, status: &JobStatus) -> Result<()> {
        self.completions.lock().unwrap().push(*status);
        let _ = self.completion_tx.send(*status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    #[tokio::test]
    async fn publishing_records_and_broadcasts() {
        let bus = InMemoryBus::new();
        let mut subscriber = bus.subscribe();
        let status = JobStatus {
            id: Uuid::new_v4(),
            successful: true,
        };
        bus.publish_completion(&status).await.unwrap();
        assert_eq!(bus.completions(), vec![status]);
        assert_eq!(subscriber.recv().await.unwrap(), status);
    }

    #[tokio::test]
    async fn publishing_new_job_records_it() {
        let bus = InMemoryBus::new();
        let job = UnprocessedJob {
            id: Uuid::new_v4(),
            spec: conveyor_core::JobSpecification {
                job_name: "".into(),
                repository: "r".into(),
                payload: "".into(),
                lease_path: "/a".into(),
                dependencies: BTreeSet::new(),
            },
        };
        bus.publish_new_job(&job).await.unwrap();
        assert_eq!(bus.new_jobs(), vec![job]);
    }
}
