//! # Conveyor worker
//!
//! Consumes the `new-jobs` queue and drives each job through dependency
//! wait, a per-repository CVMFS transaction, and status reporting back to
//! the job server (spec §4.7).

mod config;
mod dependency;
mod download;
mod exit;
mod locks;
mod processor;
mod transaction;

pub use config::WorkerConfig;
pub use dependency::{unsatisfied_dependencies, wait_for_dependencies};
pub use download::{parse_payload, Checksum, ChecksumAlgorithm, Payload};
pub use exit::classify_exit_code;
pub use locks::RepositoryLocks;
pub use processor::{PipelineStage, Processor};
pub use transaction::{run_transaction_loop, CvmfsRunner, TransactionRunner};
