//! Per-release operation locks
//!
//! Serializes mutating operations on the same release/namespace pair
//! without ever waiting for a lock. A second caller for a held key gets
//! `OperationInProgress` back immediately; different keys never contend.
//!
//! Keys are released by [`OperationGuard`] on drop, so an action that
//! returns an error, panics, or is cancelled mid-await still frees its key.

use crate::error::{ChartpilotError, ChartpilotResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Lock table key: one release in one namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub release: String,
    pub namespace: String,
}

impl LockKey {
    pub fn new(release: &str, namespace: &str) -> Self {
        Self {
            release: release.to_owned(),
            namespace: namespace.to_owned(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.release)
    }
}

/// Who holds a key, and since when
#[derive(Debug, Clone)]
pub struct LockHolder {
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
}

/// Snapshot of one held lock
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub key: LockKey,
    pub holder: LockHolder,
}

/// Registry of per-release operation locks
///
/// Cheap to clone; clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct OperationLockRegistry {
    locks: Arc<DashMap<LockKey, LockHolder>>,
}

impl OperationLockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key for `operation`, failing fast if it is already held
    pub fn try_acquire(
        &self,
        release: &str,
        namespace: &str,
        operation: &str,
    ) -> ChartpilotResult<OperationGuard> {
        let key = LockKey::new(release, namespace);

        match self.locks.entry(key.clone()) {
            Entry::Occupied(held) => Err(ChartpilotError::OperationInProgress {
                release: key.release,
                namespace: key.namespace,
                operation: operation.to_owned(),
                held_by: held.get().operation.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(LockHolder {
                    operation: operation.to_owned(),
                    acquired_at: Utc::now(),
                });
                debug!(key = %key, operation, "operation lock acquired");
                Ok(OperationGuard {
                    locks: Arc::clone(&self.locks),
                    key,
                })
            }
        }
    }

    /// Run `action` while holding the key for `release` in `namespace`
    ///
    /// Returns `OperationInProgress` without running the action if another
    /// operation holds the key. The key is released on every exit path.
    pub async fn try_run<F, Fut, T>(
        &self,
        release: &str,
        namespace: &str,
        operation: &str,
        action: F,
    ) -> ChartpilotResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChartpilotResult<T>>,
    {
        let _guard = self.try_acquire(release, namespace, operation)?;
        action().await
    }

    /// Whether the key is currently held
    pub fn is_locked(&self, release: &str, namespace: &str) -> bool {
        self.locks.contains_key(&LockKey::new(release, namespace))
    }

    /// Snapshot of every held lock
    pub fn active_operations(&self) -> Vec<ActiveOperation> {
        self.locks
            .iter()
            .map(|entry| ActiveOperation {
                key: entry.key().clone(),
                holder: entry.value().clone(),
            })
            .collect()
    }

    /// Number of held locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True when no lock is held
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds a key until dropped
#[derive(Debug)]
pub struct OperationGuard {
    locks: Arc<DashMap<LockKey, LockHolder>>,
    key: LockKey,
}

impl OperationGuard {
    /// The key this guard holds
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.locks.remove(&self.key);
        debug!(key = %self.key, "operation lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn runs_action_and_releases() {
        let registry = OperationLockRegistry::new();

        let value = registry
            .try_run("orders", "shop", "deploy", || async {
                Ok::<_, ChartpilotError>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(!registry.is_locked("orders", "shop"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn contention_fails_fast() {
        let registry = OperationLockRegistry::new();
        let _held = registry.try_acquire("orders", "shop", "deploy").unwrap();

        let err = registry
            .try_run("orders", "shop", "rollback", || async { Ok(()) })
            .await
            .unwrap_err();

        match err {
            ChartpilotError::OperationInProgress {
                operation, held_by, ..
            } => {
                assert_eq!(operation, "rollback");
                assert_eq!(held_by, "deploy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn same_release_in_other_namespace_is_independent() {
        let registry = OperationLockRegistry::new();
        let _a = registry.try_acquire("orders", "shop", "deploy").unwrap();
        let _b = registry.try_acquire("orders", "staging", "deploy").unwrap();

        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn released_after_action_error() {
        let registry = OperationLockRegistry::new();

        let result: ChartpilotResult<()> = registry
            .try_run("ui", "web", "deploy", || async {
                Err(ChartpilotError::Internal("boom".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(registry.try_acquire("ui", "web", "deploy").is_ok());
    }

    #[tokio::test]
    async fn released_after_action_panics() {
        let registry = OperationLockRegistry::new();
        let inner = registry.clone();

        let handle = tokio::spawn(async move {
            inner
                .try_run("ui", "web", "deploy", || async {
                    if true {
                        panic!("action blew up");
                    }
                    Ok::<(), ChartpilotError>(())
                })
                .await
        });

        assert!(handle.await.is_err());
        assert!(!registry.is_locked("ui", "web"));
    }

    #[tokio::test]
    async fn released_when_future_is_dropped() {
        let registry = OperationLockRegistry::new();

        let slow = registry.try_run("ui", "web", "deploy", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;

        assert!(timed_out.is_err());
        assert!(!registry.is_locked("ui", "web"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_yield_one_winner() {
        const CALLERS: usize = 16;

        let registry = OperationLockRegistry::new();
        let barrier = Arc::new(Barrier::new(CALLERS));
        let executed = Arc::new(AtomicUsize::new(0));
        let contention = Arc::new(AtomicUsize::new(0));
        // Winner holds the key until every loser has tried.
        let release = Arc::new(tokio::sync::Notify::new());

        let mut handles = Vec::new();
        for _ in 0..CALLERS {
            let registry = registry.clone();
            let barrier = Arc::clone(&barrier);
            let executed = Arc::clone(&executed);
            let contention = Arc::clone(&contention);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let result = registry
                    .try_run("orders", "shop", "deploy", || async move {
                        executed.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(())
                    })
                    .await;
                if let Err(ChartpilotError::OperationInProgress { .. }) = result {
                    contention.fetch_add(1, Ordering::SeqCst);
                }
                result
            }));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while contention.load(Ordering::SeqCst) < CALLERS - 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        release.notify_one();
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(contention.load(Ordering::SeqCst), CALLERS - 1);
        assert!(registry.try_acquire("orders", "shop", "deploy").is_ok());
    }
}
