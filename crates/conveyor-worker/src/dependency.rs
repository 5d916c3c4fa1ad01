//! Dependency wait stage (spec §4.7): a job with dependencies does not
//! start its transaction until every dependency has resolved. Any
//! dependency failing fails the dependent job outright, without ever
//! running its task.

use conveyor_client::{wait_for_jobs, JobOutcomes, ServerApi};
use conveyor_core::{ConveyorError, JobStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Given the resolved outcomes of a job's dependencies, the ids that did
/// not succeed (empty if the job may proceed).
pub fn unsatisfied_dependencies(dependencies: &BTreeSet<Uuid>, outcomes: &JobOutcomes) -> Vec<Uuid> {
    dependencies
        .iter()
        .filter(|id| outcomes.get(id).copied() != Some(true))
        .copied()
        .collect()
}

/// Waits for every id in `dependencies` to complete. Returns the ids that
/// did not succeed — empty means the job may proceed — so the caller can
/// name them in the job's error message (spec §4.7: "`errorMessage`
/// mentions that dependency id"). Propagates timeout/cancellation as errors.
pub async fn wait_for_dependencies(
    dependencies: &BTreeSet<Uuid>,
    api: Arc<dyn ServerApi>,
    notifications: mpsc::Receiver<JobStatus>,
    quit: watch::Receiver<bool>,
    timeout: Duration,
) -> Result<Vec<Uuid>, ConveyorError> {
    if dependencies.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = dependencies.iter().copied().collect();
    let outcomes = wait_for_jobs(&ids, api, notifications, quit, timeout).await?;
    Ok(unsatisfied_dependencies(dependencies, &outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_dependencies_are_always_satisfied() {
        assert!(unsatisfied_dependencies(&BTreeSet::new(), &JobOutcomes::new()).is_empty());
    }

    #[test]
    fn missing_or_failed_dependency_is_unsatisfied() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut deps = BTreeSet::new();
        deps.insert(a);
        deps.insert(b);

        let mut outcomes = JobOutcomes::new();
        outcomes.insert(a, true);
        outcomes.insert(b, false);

        assert_eq!(unsatisfied_dependencies(&deps, &outcomes), vec![b]);
    }

    #[test]
    fn all_succeeded_dependencies_are_satisfied() {
        let a = Uuid::new_v4();
        let mut deps = BTreeSet::new();
        deps.insert(a);
        let mut outcomes = JobOutcomes::new();
        outcomes.insert(a, true);
        assert!(unsatisfied_dependencies(&deps, &outcomes).is_empty());
    }
}
