//! # Conveyor client
//!
//! HTTP access to the job server (spec §4.6) plus the dual-source
//! wait-for-completion protocol workers and callers use to block on a set
//! of job ids (spec §4.8).

mod api;
mod wait;

pub use api::{HttpServerApi, ServerApi};
pub use wait::{wait_for_jobs, JobOutcomes, MAX_REQUEST_RETRIES};
