//! # Conveyor core
//!
//! Shared data model, HMAC request authentication, error taxonomy and retry
//! policy for the Conveyor publishing pipeline: a distributed job
//! coordination plane that materializes client-submitted payloads into a
//! content-addressed repository under a mutually exclusive transaction.
//!
//! This crate has no knowledge of HTTP, AMQP or SQL — those live in
//! `conveyor-server`, `conveyor-broker` and `conveyor-store*` respectively.
//! It only defines the wire types and pure logic every other crate shares.

mod error;
mod id;
mod mac;
mod model;
mod retry;

pub use error::{ConveyorError, FailureKind};
pub use id::new_job_id;
pub use mac::{canonical_query_bytes, sign, verify};
pub use model::{
    BasicReply, GetJobStatusReply, JobSpecification, JobStatus, PostJobStatusReply,
    PostNewJobReply, ProcessedJob, ReplyStatus, UnprocessedJob,
};
pub use retry::RetryWaiter;

/// Broker/queue topology shared by server and worker (spec §4.2).
pub mod topology {
    /// Direct, durable exchange new jobs are published to.
    pub const NEW_JOB_EXCHANGE: &str = "new-jobs";
    /// Durable work queue bound to [`NEW_JOB_EXCHANGE`] with an empty routing key.
    pub const NEW_JOB_QUEUE: &str = "new-jobs";
    /// Non-durable topic exchange completion notifications fan out on.
    pub const COMPLETED_JOB_EXCHANGE: &str = "completed-jobs";
    /// Routing key for successful completions.
    pub const SUCCESS_KEY: &str = "success";
    /// Routing key for failed completions.
    pub const FAILURE_KEY: &str = "failure";
}
