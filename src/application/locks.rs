use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-record serialization points.
///
/// Guards only the local check-then-write; callers must drop the guard before
/// any gateway round trip.
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drops entries nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
