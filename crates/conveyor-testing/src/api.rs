//! In-memory [`ServerApi`] double backed by an [`InMemoryJobStore`], for
//! exercising the client wait protocol and worker dependency wait without a
//! running `conveyor-server`.

use crate::store::InMemoryJobStore;
use async_trait::async_trait;
use conveyor_client::ServerApi;
use conveyor_core::{
    BasicReply, ConveyorError, GetJobStatusReply, JobSpecification, PostJobStatusReply,
    PostNewJobReply, ProcessedJob,
};
use conveyor_store::JobStatusStore;
use std::sync::Arc;
use uuid::Uuid;

pub struct InMemoryServerApi {
    store: Arc<InMemoryJobStore>,
}

impl InMemoryServerApi {
    pub fn new(store: Arc<InMemoryJobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServerApi for InMemoryServerApi {
    async fn post_new_job(&self, _spec: JobSpecification) -> Result<PostNewJobReply, ConveyorError> {
        Err(ConveyorError::BadRequest(
            "InMemoryServerApi does not accept new job submissions".into(),
        ))
    }

    async fn get_job_status(
        &self,
        ids: &[Uuid],
        full: bool,
    ) -> Result<GetJobStatusReply, ConveyorError> {
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

    async fn post_job_status(&self, job: &ProcessedJob) -> Result<PostJobStatusReply, ConveyorError> {
        self.store
            .upsert_job(job)
            .await
            .map_err(|e| ConveyorError::Transient(e.to_string()))?;
        Ok(PostJobStatusReply {
            basic: BasicReply::ok(),
        })
    }
}
