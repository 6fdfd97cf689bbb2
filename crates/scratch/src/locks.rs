//! Per-uid mutex table: at most one PATCH may be in flight for a given uid at any time
//! (§5, hard requirement). Locks are allocated lazily and reference-counted so the table
//! never grows unboundedly for the life of the process (Design Note).

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

use tokio::sync::{
    Mutex as AsyncMutex,
    OwnedMutexGuard,
};

#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `uid`, waiting if another request already holds it. The
    /// returned guard releases the lock and, if no other waiter is holding a reference,
    /// prunes the table entry on drop.
    pub async fn acquire(self: &Arc<Self>, uid: &str) -> UidLockGuard {
        let arc = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            locks.entry(uid.to_owned()).or_default().clone()
        };
        let guard = arc.clone().lock_owned().await;
        UidLockGuard {
            table: self.clone(),
            uid: uid.to_owned(),
            arc,
            guard: Some(guard),
        }
    }

    /// Non-blocking variant used where a conflicting in-flight PATCH should fail fast with
    /// 409 rather than queue behind it.
    pub fn try_acquire(self: &Arc<Self>, uid: &str) -> Option<UidLockGuard> {
        let arc = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            locks.entry(uid.to_owned()).or_default().clone()
        };
        let guard = arc.clone().try_lock_owned().ok()?;
        Some(UidLockGuard {
            table: self.clone(),
            uid: uid.to_owned(),
            arc,
            guard: Some(guard),
        })
    }
}

pub struct UidLockGuard {
    table: Arc<LockTable>,
    uid: String,
    arc: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UidLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.table.locks.lock().expect("lock table poisoned");
        // Only the table's own clone and `self.arc` should remain; anything more means
        // another acquire() is already queued and the entry must stay.
        if Arc::strong_count(&self.arc) <= 2 {
            locks.remove(&self.uid);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn serializes_same_uid() {
        let table = Arc::new(LockTable::new());
        let g1 = table.acquire("a").await;
        assert!(table.try_acquire("a").is_none());
        drop(g1);
        assert!(table.try_acquire("a").is_some());
    }

    #[tokio::test]
    async fn different_uids_do_not_contend() {
        let table = Arc::new(LockTable::new());
        let _g1 = table.acquire("a").await;
        assert!(table.try_acquire("b").is_some());
    }

    #[tokio::test]
    async fn table_shrinks_after_release() {
        let table = Arc::new(LockTable::new());
        {
            let _g = table.acquire("a").await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(table.locks.lock().unwrap().len(), 0);
    }
}
