//! Ties decode, dependency wait, transaction loop and status reporting
//! together into the per-job pipeline a worker runs for every delivery on
//! the `new-jobs` queue (spec §4.7).

use crate::config::WorkerConfig;
use crate::dependency::wait_for_dependencies;
use crate::download::{download_if_needed, parse_payload};
use crate::locks::RepositoryLocks;
use crate::transaction::{run_transaction_loop, TransactionRunner};
use chrono::Utc;
use conveyor_client::ServerApi;
use conveyor_core::{ConveyorError, ProcessedJob, UnprocessedJob};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

/// Bridges a shared completion broadcast into the per-wait `mpsc` channel
/// the dependency-wait protocol expects.
fn subscribe_completions(completions: &broadcast::Sender<conveyor_core::JobStatus>) -> mpsc::Receiver<conveyor_core::JobStatus> {
    let mut rx = completions.subscribe();
    let (tx, forwarded) = mpsc::channel(32);
    tokio::spawn(async move {
        while let Ok(status) = rx.recv().await {
            if tx.send(status).await.is_err() {
                return;
            }
        }
    });
    forwarded
}

/// Which pipeline stage a failed job was decided at — drives the worker's
/// ack/nack choice (spec §4.7 diagram): a `DependencyWait` failure is
/// requeued so a later delivery can re-evaluate the (possibly still
/// resolving) dependencies, while a `TransactionLoop` failure has already
/// exhausted its own retry budget and is acked like a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    DependencyWait,
    TransactionLoop,
}

pub struct Processor {
    config: WorkerConfig,
    api: Arc<dyn ServerApi>,
    runner: Arc<dyn TransactionRunner>,
    locks: Arc<RepositoryLocks>,
    completions: broadcast::Sender<conveyor_core::JobStatus>,
    http: reqwest::Client,
}

impl Processor {
    pub fn new(
        config: WorkerConfig,
        api: Arc<dyn ServerApi>,
        runner: Arc<dyn TransactionRunner>,
        completions: broadcast::Sender<conveyor_core::JobStatus>,
    ) -> Self {
        Self {
            config,
            api,
            runner,
            locks: Arc::new(RepositoryLocks::new()),
            completions,
            http: reqwest::Client::new(),
        }
    }

    /// Runs the full pipeline for one job and returns the `ProcessedJob` to
    /// report alongside the stage a failure was decided at (`None` on
    /// success) — failures are recorded on the job, not propagated, so the
    /// caller can always post a status and ack or requeue.
    pub async fn run(
        &self,
        job: UnprocessedJob,
        quit: watch::Receiver<bool>,
    ) -> (ProcessedJob, Option<PipelineStage>) {
        let start_time = Utc::now();
        let outcome = self.run_pipeline(&job, quit).await;
        let finish_time = Utc::now();

        let (successful, error_message, stage) = match outcome {
            Ok(()) => (true, String::new(), None),
            Err((stage, e)) => (false, e.to_string(), Some(stage)),
        };

        let processed = ProcessedJob {
            job,
            worker_name: self.config.worker_name.clone(),
            start_time,
            finish_time,
            successful,
            error_message,
        };
        (processed, stage)
    }

    async fn run_pipeline(
        &self,
        job: &UnprocessedJob,
        quit: watch::Receiver<bool>,
    ) -> Result<(), (PipelineStage, ConveyorError)> {
        let notifications = subscribe_completions(&self.completions);
        let unsatisfied = wait_for_dependencies(
            &job.spec.dependencies,
            self.api.clone(),
            notifications,
            quit,
            Duration::from_secs(self.config.dependency_wait_timeout_secs),
        )
        .await
        .map_err(|e| (PipelineStage::DependencyWait, e))?;
        if !unsatisfied.is_empty() {
            let ids = unsatisfied
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err((
                PipelineStage::DependencyWait,
                ConveyorError::Terminal(format!("dependency failed: {ids}")),
            ));
        }

        let payload =
            parse_payload(&job.spec.payload).map_err(|e| (PipelineStage::TransactionLoop, e))?;
        let script_path = std::env::temp_dir().join(format!("conveyor-task-{}", job.id));
        let http = &self.http;
        let prepare = || async {
            download_if_needed(http, &payload, &script_path).await?;
            make_executable(&script_path)
        };

        let _guard = self.locks.lock(&job.spec.repository).await;
        run_transaction_loop(
            self.runner.as_ref(),
            &job.spec.repository,
            &job.spec.lease_path,
            script_path.to_string_lossy().as_ref(),
            payload.arg.as_deref(),
            self.config.max_job_retries,
            prepare,
        )
        .await
        .map_err(|e| (PipelineStage::TransactionLoop, e))
    }

    pub fn api(&self) -> &Arc<dyn ServerApi> {
        &self.api
    }
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> Result<(), ConveyorError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .map_err(|e| ConveyorError::Transient(format!("could not stat {}: {e}", path.display())))?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
        .map_err(|e| ConveyorError::Transient(format!("could not chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> Result<(), ConveyorError> {
    Ok(())
}
