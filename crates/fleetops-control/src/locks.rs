//! Per-instance operation serialization.

use std::collections::HashMap;
use std::sync::Arc;

use fleetops_core::InstanceId;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<InstanceId, Arc<tokio::sync::Mutex<()>>>;

/// Hands out one async lock per instance id.
///
/// Distinct ids never contend. An id's entry is removed once no guard or
/// waiter references it, so the table only holds ids with work in progress.
#[derive(Debug, Default, Clone)]
pub struct InstanceLocks {
    table: Arc<Mutex<LockMap>>,
}

impl InstanceLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other operation holds `id`, then hold it until the
    /// returned guard is dropped.
    pub async fn acquire(&self, id: InstanceId) -> InstanceGuard {
        let lock = Arc::clone(self.table.lock().entry(id).or_default());
        let guard = lock.lock_owned().await;
        InstanceGuard {
            id,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of ids currently held or waited on.
    #[must_use]
    pub fn active(&self) -> usize {
        self.table.lock().len()
    }
}

/// Exclusive hold on one instance id.
#[derive(Debug)]
pub struct InstanceGuard {
    id: InstanceId,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Mutex<LockMap>>,
}

impl InstanceGuard {
    /// The held instance id.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        self.guard.take();
        if table
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.id);
        }
    }
}
