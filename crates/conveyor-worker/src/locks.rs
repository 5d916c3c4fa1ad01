//! Per-repository serialization (spec §4.7): only one transaction may be
//! open against a given repository at a time, but unrelated repositories
//! proceed concurrently.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct RepositoryLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, repository: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(repository.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the lock for `repository`, blocking until any in-flight
    /// transaction against it finishes.
    pub async fn lock(&self, repository: &str) -> OwnedMutexGuard<()> {
        self.get_or_create(repository).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_repository_serializes() {
        let locks = RepositoryLocks::new();
        let guard = locks.lock("repo.example.org").await;
        let locks2 = &locks;
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks2.lock("repo.example.org"),
        )
        .await;
        assert!(second.is_err(), "second lock should block while first is held");
        drop(guard);
    }

    #[tokio::test]
    async fn different_repositories_do_not_block_each_other() {
        let locks = RepositoryLocks::new();
        let _a = locks.lock("repo-a").await;
        let b = tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("repo-b")).await;
        assert!(b.is_ok());
    }
}
