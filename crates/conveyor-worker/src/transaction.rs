//! CVMFS transaction state machine (spec §4.7): abort any stale transaction,
//! begin, run the task, commit on success or abort on failure — retried up
//! to a configured budget while the failure is transient.

use async_trait::async_trait;
use conveyor_core::{ConveyorError, FailureKind};
use std::future::Future;
use std::process::Stdio;
use tokio::process::Command;

/// The subprocess surface the transaction loop drives. A trait so the loop
/// itself can be exercised against a mock (spec §9: the mock toggle is a
/// config field, not an environment switch baked into the logic).
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    /// Aborts any transaction left open against `repository` by a previous,
    /// presumably crashed, worker. Best-effort: callers ignore its error.
    async fn abort_any_stale(&self, repository: &str);

    async fn begin(&self, repository: &str) -> Result<(), ConveyorError>;

    async fn commit(&self, repository: &str) -> Result<(), ConveyorError>;

    async fn abort(&self, repository: &str) -> Result<(), ConveyorError>;

    /// Runs the job's task inside the open transaction. Implementations
    /// classify the underlying subprocess's exit code into
    /// [`ConveyorError::Transient`] or [`ConveyorError::Terminal`].
    async fn run_task(
        &self,
        repository: &str,
        lease_path: &str,
        script_path: &str,
        arg: Option<&str>,
    ) -> Result<(), ConveyorError>;
}

/// Drives one job's transaction through `1 + max_retries` attempts total
/// (spec §4.7), aborting and retrying on transient failures. `prepare` runs
/// at the start of every attempt, inside the open transaction and before
/// `run_task` — it is how the caller stages the job's downloaded payload,
/// so a download failure is retried exactly like a task failure.
pub async fn run_transaction_loop<P, Fut>(
    runner: &dyn TransactionRunner,
    repository: &str,
    lease_path: &str,
    script_path: &str,
    arg: Option<&str>,
    max_retries: u32,
    prepare: P,
) -> Result<(), ConveyorError>
where
    P: Fn() -> Fut,
    Fut: Future<Output = Result<(), ConveyorError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        runner.abort_any_stale(repository).await;
        runner.begin(repository).await?;

        let outcome = match prepare().await {
            Ok(()) => runner.run_task(repository, lease_path, script_path, arg).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                runner.commit(repository).await?;
                return Ok(());
            }
            Err(e) => {
                let _ = runner.abort(repository).await;
                let retryable = matches!(failure_kind(&e), FailureKind::Retryable);
                if !retryable || attempt > max_retries {
                    return Err(e);
                }
                tracing::warn!(repository, attempt, error = %e, "transaction attempt failed, retrying");
            }
        }
    }
}

fn failure_kind(e: &ConveyorError) -> FailureKind {
    if e.is_retryable() {
        FailureKind::Retryable
    } else {
        FailureKind::NonRetryable
    }
}

/// Drives `cvmfs_server` directly. The real, non-test implementation.
pub struct CvmfsRunner {
    repo_root: String,
}

impl CvmfsRunner {
    pub fn new(repo_root: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), ConveyorError> {
        let status = Command::new("cvmfs_server")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| ConveyorError::Transient(format!("could not spawn cvmfs_server: {e}")))?;
        if status.success() {
            return Ok(());
        }
        match status.code() {
            None => Err(ConveyorError::Transient(
                "cvmfs_server was terminated by a signal".into(),
            )),
            Some(code) => Err(ConveyorError::Terminal(format!(
                "cvmfs_server {args:?} exited with status {code}"
            ))),
        }
    }
}

#[async_trait]
impl TransactionRunner for CvmfsRunner {
    async fn abort_any_stale(&self, repository: &str) {
        let _ = self.run(&["abort", "-f", repository]).await;
    }

    async fn begin(&self, repository: &str) -> Result<(), ConveyorError> {
        self.run(&["transaction", repository]).await
    }

    async fn commit(&self, repository: &str) -> Result<(), ConveyorError> {
        self.run(&["publish", repository]).await
    }

    async fn abort(&self, repository: &str) -> Result<(), ConveyorError> {
        self.run(&["abort", "-f", repository]).await
    }

    async fn run_task(
        &self,
        repository: &str,
        lease_path: &str,
        script_path: &str,
        arg: Option<&str>,
    ) -> Result<(), ConveyorError> {
        let mut command = Command::new(script_path);
        command.arg(repository).arg(lease_path);
        if let Some(arg) = arg {
            command.arg(arg);
        }
        command.current_dir(format!("{}/{}", self.repo_root, repository));

        let status = command
            .status()
            .await
            .map_err(|e| ConveyorError::Transient(format!("could not spawn task script: {e}")))?;
        if status.success() {
            return Ok(());
        }
        match crate::exit::classify_exit_code(status.code()) {
            FailureKind::Retryable => {
                Err(ConveyorError::Transient("task script was signalled".into()))
            }
            FailureKind::NonRetryable => Err(ConveyorError::Terminal(format!(
                "task script exited with status {:?}",
                status.code()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRunner {
        attempts: AtomicU32,
        task_outcomes: Mutex<Vec<Result<(), ConveyorError>>>,
        committed: AtomicU32,
        aborted: AtomicU32,
    }

    #[async_trait]
    impl TransactionRunner for MockRunner {
        async fn abort_any_stale(&self, _repository: &str) {}

        async fn begin(&self, _repository: &str) -> Result<(), ConveyorError> {
            Ok(())
        }

        async fn commit(&self, _repository: &str) -> Result<(), ConveyorError> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn abort(&self, _repository: &str) -> Result<(), ConveyorError> {
            self.aborted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_task(
            &self,
            _repository: &str,
            _lease_path: &str,
            _script_path: &str,
            _arg: Option<&str>,
        ) -> Result<(), ConveyorError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.task_outcomes.lock().unwrap().remove(0)
        }
    }

    async fn no_op_prepare() -> Result<(), ConveyorError> {
        Ok(())
    }

    #[tokio::test]
    async fn succeeds_on_first_try_commits_once() {
        let runner = MockRunner {
            task_outcomes: Mutex::new(vec![Ok(())]),
            ..Default::default()
        };
        let result =
            run_transaction_loop(&runner, "repo", "/a", "/bin/true", None, 3, no_op_prepare).await;
        assert!(result.is_ok());
        assert_eq!(runner.committed.load(Ordering::SeqCst), 1);
        assert_eq!(runner.aborted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_transient_failures_up_to_budget() {
        let runner = MockRunner {
            task_outcomes: Mutex::new(vec![
                Err(ConveyorError::Transient("net".into())),
                Err(ConveyorError::Transient("net".into())),
                Ok(()),
            ]),
            ..Default::default()
        };
        let result =
            run_transaction_loop(&runner, "repo", "/a", "/bin/true", None, 5, no_op_prepare).await;
        assert!(result.is_ok());
        assert_eq!(runner.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(runner.aborted.load(Ordering::SeqCst), 2);
        assert_eq!(runner.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_failure_does_not_retry() {
        let runner = MockRunner {
            task_outcomes: Mutex::new(vec![Err(ConveyorError::Terminal("bad script".into()))]),
            ..Default::default()
        };
        let result =
            run_transaction_loop(&runner, "repo", "/a", "/bin/false", None, 5, no_op_prepare).await;
        assert!(result.is_err());
        assert_eq!(runner.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(runner.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(runner.committed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausting_retry_budget_makes_exactly_one_plus_max_retries_attempts() {
        let runner = MockRunner {
            task_outcomes: Mutex::new(vec![
                Err(ConveyorError::Transient("a".into())),
                Err(ConveyorError::Transient("b".into())),
                Err(ConveyorError::Transient("c".into())),
            ]),
            ..Default::default()
        };
        let result =
            run_transaction_loop(&runner, "repo", "/a", "/bin/true", None, 2, no_op_prepare).await;
        assert!(result.is_err());
        assert_eq!(runner.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn prepare_failure_is_retried_like_a_task_failure() {
        let runner = MockRunner {
            task_outcomes: Mutex::new(vec![Ok(())]),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let prepare = || async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ConveyorError::Transient("download failed".into()))
            } else {
                Ok(())
            }
        };
        let result = run_transaction_loop(&runner, "repo", "/a", "/bin/true", None, 2, prepare).await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(runner.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(runner.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(runner.committed.load(Ordering::SeqCst), 1);
    }
}
