//! In-process per-ref write lock.
//!
//! A process-wide map from `(project, ref)` to an exclusive async mutex.
//! Its sole job is to serialize concurrent in-process writers on a ref so
//! the storage transaction seldom contends; cross-session exclusivity for
//! whole turns comes from the persisted lease, not from this lock. Entries
//! are created lazily and purged once nothing has contended for them for a
//! while.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::CoreError;
use crate::model::{ProjectId, RefId};

/// Guard proving the caller holds the per-ref write lock. Dropping it
/// releases the lock.
pub type RefGuard = OwnedMutexGuard<()>;

struct LockEntry {
    mutex: Arc<Mutex<()>>,
    last_used: Instant,
}

/// Process-wide registry of per-ref mutexes.
#[derive(Default)]
pub struct RefLockManager {
    locks: DashMap<(ProjectId, RefId), LockEntry>,
}

impl RefLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for `(project, ref)`, waiting at most
    /// `timeout`. A timeout surfaces as `RefLocked`, the storage layer's
    /// contention error.
    pub async fn lock(
        &self,
        project: &ProjectId,
        ref_id: &RefId,
        timeout: Duration,
    ) -> Result<RefGuard, CoreError> {
        let mutex = {
            let mut entry = self
                .locks
                .entry((project.clone(), ref_id.clone()))
                .or_insert_with(|| LockEntry {
                    mutex: Arc::new(Mutex::new(())),
                    last_used: Instant::now(),
                });
            entry.last_used = Instant::now();
            entry.mutex.clone()
        };
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::debug!("ref lock timed out after {:?}: {}/{}", timeout, project, ref_id);
                Err(CoreError::RefLocked(ref_id.to_string()))
            }
        }
    }

    /// Drop map entries that are neither held nor waited on and have been
    /// idle longer than `max_idle`.
    pub fn purge_idle(&self, max_idle: Duration) {
        self.locks.retain(|_, entry| {
            Arc::strong_count(&entry.mutex) > 1 || entry.last_used.elapsed() < max_idle
        });
    }

    /// Number of live map entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> (ProjectId, RefId) {
        (ProjectId::from("p1"), RefId::from("r1"))
    }

    #[tokio::test]
    async fn test_sequential_acquire() {
        let mgr = RefLockManager::new();
        let (p, r) = key();
        let g1 = mgr.lock(&p, &r, Duration::from_millis(100)).await.unwrap();
        drop(g1);
        let g2 = mgr.lock(&p, &r, Duration::from_millis(100)).await.unwrap();
        drop(g2);
    }

    #[tokio::test]
    async fn test_contention_times_out() {
        let mgr = RefLockManager::new();
        let (p, r) = key();
        let _held = mgr.lock(&p, &r, Duration::from_millis(100)).await.unwrap();
        let err = mgr.lock(&p, &r, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, CoreError::RefLocked(_)));
    }

    #[tokio::test]
    async fn test_distinct_refs_do_not_contend() {
        let mgr = RefLockManager::new();
        let p = ProjectId::from("p1");
        let _a = mgr
            .lock(&p, &RefId::from("a"), Duration::from_millis(50))
            .await
            .unwrap();
        let _b = mgr
            .lock(&p, &RefId::from("b"), Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_keeps_held_locks() {
        let mgr = RefLockManager::new();
        let (p, r) = key();
        let guard = mgr.lock(&p, &r, Duration::from_millis(50)).await.unwrap();
        mgr.purge_idle(Duration::ZERO);
        assert_eq!(mgr.len(), 1);
        drop(guard);
        mgr.purge_idle(Duration::ZERO);
        assert!(mgr.is_empty());
    }
}
