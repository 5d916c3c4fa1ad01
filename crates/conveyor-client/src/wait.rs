//! Dual-source job-completion wait protocol (spec §4.8).
//!
//! A caller waiting on a set of job ids gets notified of completions two
//! ways: a push from the `completed-jobs` subscription (fast path) and a
//! poll against `GET /jobs/complete` (fallback, bounded by
//! `MAX_REQUEST_RETRIES`). Both feed the same channel; the first one to
//! report an id wins. The wait ends on: every id resolved, any id failing
//! (short-circuit), the timeout elapsing, or the quit signal firing.

use crate::api::ServerApi;
use conveyor_core::{ConveyorError, JobStatus, RetryWaiter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Poll attempts before giving up and falling back to the overall timeout.
pub const MAX_REQUEST_RETRIES: u32 = 50;

/// Outcome of [`wait_for_jobs`]: `(id, successful)` for every id that
/// resolved before the wait ended.
pub type JobOutcomes = HashMap<Uuid, bool>;

/// Waits for `ids` to complete, merging push notifications from
/// `notifications` with periodic polling through `api`. Returns as soon as
/// every id has resolved or any one of them fails; `quit` or the timeout
/// end the wait early with an error.
pub async fn wait_for_jobs(
    ids: &[Uuid],
    api: Arc<dyn ServerApi>,
    notifications: mpsc::Receiver<JobStatus>,
    quit: watch::Receiver<bool>,
    timeout: Duration,
) -> Result<JobOutcomes, ConveyorError> {
    let mut pending: HashSet<Uuid> = ids.iter().copied().collect();
    let mut outcomes = JobOutcomes::new();
    if pending.is_empty() {
        return Ok(outcomes);
    }

    let (combined_tx, mut combined_rx) = mpsc::channel::<JobStatus>(ids.len().max(1) * 2);

    let forward_quit = quit.clone();
    let forward_tx = combined_tx.clone();
    let forward_task = tokio::spawn(forward_notifications(notifications, forward_tx, forward_quit));

    let poll_quit = quit.clone();
    let poll_ids: Vec<Uuid> = ids.to_vec();
    let poll_task = tokio::spawn(poll_loop(poll_ids, api, combined_tx, poll_quit));

    let deadline = tokio::time::Instant::now() + timeout;
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);
    let mut quit = quit;

    let result = loop {
        tokio::select! {
            biased;

            changed = quit.changed() => {
                if changed.is_ok() && *quit.borrow() {
                    break Err(ConveyorError::Cancelled);
                }
            }

            _ = &mut sleep => {
                break Err(ConveyorError::Timeout);
            }

            maybe_status = combined_rx.recv() => {
                match maybe_status {
                    Some(status) => {
                        pending.remove(&status.id);
                        outcomes.insert(status.id, status.successful);
                        if !status.successful {
                            break Ok(outcomes.clone());
                        }
                        if pending.is_empty() {
                            break Ok(outcomes.clone());
                        }
                    }
                    None => {
                        // Both producers gave up (e.g. quit fired first); the
                        // quit/timeout arms above will resolve the select on
                        // the next iteration.
                    }
                }
            }
        }
    };

    forward_task.abort();
    poll_task.abort();
    result
}

async fn forward_notifications(
    mut notifications: mpsc::Receiver<JobStatus>,
    tx: mpsc::Sender<JobStatus>,
    mut quit: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            status = notifications.recv() => {
                match status {
                    Some(status) => {
                        if tx.send(status).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = quit.changed() => return,
        }
    }
}

/// Polls `GET /jobs/complete` up to [`MAX_REQUEST_RETRIES`] times, waiting
/// between attempts with the standard backoff. Failed requests are logged
/// and retried; they do not end the wait on their own — only the caller's
/// overall timeout does.
async fn poll_loop(
    ids: Vec<Uuid>,
    api: Arc<dyn ServerApi>,
    tx: mpsc::Sender<JobStatus>,
    mut quit: watch::Receiver<bool>,
) {
    let mut waiter = RetryWaiter::default();
    for _ in 0..MAX_REQUEST_RETRIES {
        match api.get_job_status(&ids, false).await {
            Ok(reply) => {
                for status in reply.ids {
                    if tx.send(status).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "polling job status failed, retrying");
            }
        }

        tokio::select! {
            _ = waiter.wait() => {}
            _ = quit.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::{BasicReply, GetJobStatusReply, JobSpecification, PostJobStatusReply, PostNewJobReply, ProcessedJob};
    use std::sync::Mutex;

    struct StubApi {
        replies: Mutex<Vec<GetJobStatusReply>>,
    }

    #[async_trait::async_trait]
    impl ServerApi for StubApi {
        async fn post_new_job(&self, _spec: JobSpecification) -> Result<PostNewJobReply, ConveyorError> {
            unimplemented!()
        }

        async fn get_job_status(
            &self,
            _ids: &[Uuid],
            _full: bool,
        ) -> Result<GetJobStatusReply, ConveyorError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(GetJobStatusReply {
                    basic: BasicReply::ok(),
                    ids: vec![],
                    jobs: vec![],
                })
            } else {
                Ok(replies.remove(0))
            }
        }

        async fn post_job_status(&self, _job: &ProcessedJob) -> Result<PostJobStatusReply, ConveyorError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn resolves_as_soon_as_notification_arrives() {
        let id = Uuid::new_v4();
        let api = Arc::new(StubApi { replies: Mutex::new(vec![]) });
        let (tx, rx) = mpsc::channel(4);
        let (_quit_tx, quit_rx) = watch::channel(false);

        tx.send(JobStatus { id, successful: true }).await.unwrap();

        let outcomes = wait_for_jobs(&[id], api, rx, quit_rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcomes.get(&id), Some(&true));
    }

    #[tokio::test]
    async fn short_circuits_on_first_failure() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let api = Arc::new(StubApi { replies: Mutex::new(vec![]) });
        let (tx, rx) = mpsc::channel(4);
        let (_quit_tx, quit_rx) = watch::channel(false);

        tx.send(JobStatus { id: a, successful: false }).await.unwrap();

        let outcomes = wait_for_jobs(&[a, b], api, rx, quit_rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcomes.get(&a), Some(&false));
        assert!(!outcomes.contains_key(&b));
    }

    #[tokio::test]
    async fn quit_signal_cancels_the_wait() {
        let id = Uuid::new_v4();
        let api = Arc::new(StubApi { replies: Mutex::new(vec![]) });
        let (_tx, rx) = mpsc::channel(4);
        let (quit_tx, quit_rx) = watch::channel(false);

        quit_tx.send(true).unwrap();

        let result = wait_for_jobs(&[id], api, rx, quit_rx, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ConveyorError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_id_list_resolves_immediately() {
        let api = Arc::new(StubApi { replies: Mutex::new(vec![]) });
        let (_tx, rx) = mpsc::channel(4);
        let (_quit_tx, quit_rx) = watch::channel(false);

        let outcomes = wait_for_jobs(&[], api, rx, quit_rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }
}
