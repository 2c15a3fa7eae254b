//! Per-instance async locks.
//!
//! Writes to one instance never interleave inside a process: every mutating
//! operation holds the instance's lock for its read-plan-commit cycle. The
//! repository revision check covers writers in other processes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry of one async mutex per workflow instance.
///
/// Cloning shares the registry. The `DashMap` guard is dropped before the
/// mutex is awaited.
#[derive(Clone, Default)]
pub struct InstanceLocks {
    inner: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `instance_id`.
    pub async fn acquire(&self, instance_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the entry for a finished instance if nobody holds or waits on it.
    pub fn release_idle(&self, instance_id: &Uuid) {
        self.inner
            .remove_if(instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
