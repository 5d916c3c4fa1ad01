//! Wire data model shared by server, worker and client.
//!
//! Field names are serialized with an initial capital to match the existing
//! `cvmfs_job` HTTP API (see spec §6): `ID` rather than `id`, `IDs` rather
//! than `ids`. Everything else follows plain PascalCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// An immutable submission payload: a request to materialize something into
/// a sub-path of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSpecification {
    #[serde(default)]
    pub job_name: String,
    pub repository: String,
    #[serde(default)]
    pub payload: String,
    pub lease_path: String,
    #[serde(default)]
    pub dependencies: BTreeSet<Uuid>,
}

impl JobSpecification {
    /// Normalizes the lease path to start with a leading `/`.
    ///
    /// Called once by the server on submission (spec §3); never by callers,
    /// so a job's `lease_path` is always absolute once it becomes part of an
    /// `UnprocessedJob`.
    pub fn normalize(&mut self) {
        if !self.lease_path.starts_with('/') {
            self.lease_path.insert(0, '/');
        }
    }
}

/// A `JobSpecification` assigned a server-minted identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnprocessedJob {
    #[serde(rename = "ID")]
    pub id: Uuid,
    #[serde(flatten)]
    pub spec: JobSpecification,
}

/// A completed job: an `UnprocessedJob` plus execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessedJob {
    #[serde(flatten)]
    pub job: UnprocessedJob,
    pub worker_name: String,
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub successful: bool,
    #[serde(default)]
    pub error_message: String,
}

impl ProcessedJob {
    /// `successful ⇔ error_message == ""` (spec §3 invariant).
    pub fn is_consistent(&self) -> bool {
        self.successful == self.error_message.is_empty() && self.finish_time >= self.start_time
    }
}

/// A compact `(id, successful)` pair used on the notification bus and in
/// lightweight query replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobStatus {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub successful: bool,
}

/// The routing key a `JobStatus` is published under on `completed-jobs`.
impl JobStatus {
    pub fn routing_key(&self) -> &'static str {
        if self.successful {
            "success"
        } else {
            "failure"
        }
    }
}

/// Every API response carries `{status, reason?}`; specialized replies
/// extend it with `id`, `ids[]` or `jobs[]` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BasicReply {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

impl BasicReply {
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            reason: Some(reason.into()),
        }
    }
}

/// Reply to `POST /jobs/new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostNewJobReply {
    #[serde(flatten)]
    pub basic: BasicReply,
    #[serde(rename = "ID", skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

/// Reply to `GET /jobs/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetJobStatusReply {
    #[serde(flatten)]
    pub basic: BasicReply,
    #[serde(rename = "IDs", default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<JobStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<ProcessedJob>,
}

/// Reply to `POST /jobs/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostJobStatusReply {
    #[serde(flatten)]
    pub basic: BasicReply,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_specification_normalizes_lease_path() {
        let mut spec = JobSpecification {
            job_name: "".into(),
            repository: "repo.example.org".into(),
            payload: "".into(),
            lease_path: "a/b".into(),
            dependencies: BTreeSet::new(),
        };
        spec.normalize();
        assert_eq!(spec.lease_path, "/a/b");

        let mut already_absolute = spec.clone();
        already_absolute.normalize();
        assert_eq!(already_absolute.lease_path, "/a/b");
    }

    #[test]
    fn unprocessed_job_round_trips_through_json() {
        let job = UnprocessedJob {
            id: Uuid::new_v4(),
            spec: JobSpecification {
                job_name: "build".into(),
                repository: "repo.example.org".into(),
                payload: "".into(),
                lease_path: "/a".into(),
                dependencies: BTreeSet::new(),
            },
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["ID"], job.id.to_string());
        assert_eq!(json["Repository"], "repo.example.org");

        let parsed: UnprocessedJob = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn processed_job_consistency_invariant() {
        let now = Utc::now();
        let job = UnprocessedJob {
            id: Uuid::new_v4(),
            spec: JobSpecification {
                job_name: "".into(),
                repository: "r".into(),
                payload: "".into(),
                lease_path: "/a".into(),
                dependencies: BTreeSet::new(),
            },
        };
        let ok = ProcessedJob {
            job: job.clone(),
            worker_name: "w1".into(),
            start_time: now,
            finish_time: now,
            successful: true,
            error_message: String::new(),
        };
        assert!(ok.is_consistent());

        let inconsistent = ProcessedJob {
            successful: true,
            error_message: "oops".into(),
            ..ok
        };
        assert!(!inconsistent.is_consistent());
    }

    #[test]
    fn job_status_routing_key_matches_outcome() {
        let id = Uuid::new_v4();
        assert_eq!(
            JobStatus {
                id,
                successful: true
            }
            .routing_key(),
            "success"
        );
        assert_eq!(
            JobStatus {
                id,
                successful: false
            }
            .routing_key(),
            "failure"
        );
    }
}
