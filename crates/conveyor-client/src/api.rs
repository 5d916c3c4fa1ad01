//! HTTP transport for the `cvmfs_job` API (spec §4.6), HMAC-signed the same
//! way the frontend in `conveyor-server` verifies.

use async_trait::async_trait;
use conveyor_core::{
    canonical_query_bytes, sign, ConveyorError, GetJobStatusReply, JobSpecification,
    PostJobStatusReply, PostNewJobReply, ProcessedJob,
};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use uuid::Uuid;

/// Everything a caller needs from the job server, abstracted so worker and
/// client logic can run against an in-memory double in tests.
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn post_new_job(&self, spec: JobSpecification) -> Result<PostNewJobReply, ConveyorError>;

    async fn get_job_status(
        &self,
        ids: &[Uuid],
        full: bool,
    ) -> Result<GetJobStatusReply, ConveyorError>;

    async fn post_job_status(&self, job: &ProcessedJob) -> Result<PostJobStatusReply, ConveyorError>;
}

/// `ServerApi` backed by a real HTTP connection, signing every request body
/// (POST) or query string (GET) with the shared secret.
pub struct HttpServerApi {
    http: Client,
    base_url: String,
    shared_key: String,
}

impl HttpServerApi {
    pub fn new(base_url: impl Into<String>, shared_key: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            http,
            base_url: base_url.into(),
            shared_key: shared_key.into(),
        }
    }

    fn status_to_error(status: StatusCode) -> ConveyorError {
        match status {
            StatusCode::UNAUTHORIZED => ConveyorError::Unauthorized,
            StatusCode::FORBIDDEN => ConveyorError::Forbidden,
            StatusCode::NOT_FOUND => ConveyorError::NotFound,
            StatusCode::BAD_REQUEST => ConveyorError::BadRequest("server rejected request".into()),
            _ => ConveyorError::Transient(format!("server returned {status}")),
        }
    }
}

#[async_trait]
impl ServerApi for HttpServerApi {
    async fn post_new_job(&self, spec: JobSpecification) -> Result<PostNewJobReply, ConveyorError> {
        let body = serde_json::to_vec(&spec)
            .map_err(|e| ConveyorError::BadRequest(format!("could not encode job: {e}")))?;
        let token = sign(&body, &self.shared_key);

        let resp = self
            .http
            .post(format!("{}/jobs/new", self.base_url))
            .header("Authorization", token)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ConveyorError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Self::status_to_error(resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| ConveyorError::Transient(format!("could not decode reply: {e}")))
    }

    async fn get_job_status(
        &self,
        ids: &[Uuid],
        full: bool,
    ) -> Result<GetJobStatusReply, ConveyorError> {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for id in ids {
            query.append_pair("id", &id.to_string());
        }
        if full {
            query.append_pair("full", "true");
        }
        let query = query.finish();
        let token = sign(&canonical_query_bytes(&query), &self.shared_key);

        let resp = self
            .http
            .get(format!("{}/jobs/complete?{query}", self.base_url))
            .header("Authorization", token)
            .send()
            .await
            .map_err(|e| ConveyorError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Self::status_to_error(resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| ConveyorError::Transient(format!("could not decode reply: {e}")))
    }

    async fn post_job_status(&self, job: &ProcessedJob) -> Result<PostJobStatusReply, ConveyorError> {
        let body = serde_json::to_vec(job)
            .map_err(|e| ConveyorError::BadRequest(format!("could not encode job: {e}")))?;
        let token = sign(&body, &self.shared_key);

        let resp = self
            .http
            .post(format!("{}/jobs/complete", self.base_url))
            .header("Authorization", token)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ConveyorError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Self::status_to_error(resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| ConveyorError::Transient(format!("could not decode reply: {e}")))
    }
}
