use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::limits::MAX_IDLE_DAY_LOCKS;
use crate::model::DayKey;

/// One async mutex per provider-day. Holding it makes the conflict check
/// and the write a single step for every other writer of that day.
#[derive(Default)]
pub(crate) struct DayLocks {
    locks: DashMap<DayKey, Arc<Mutex<()>>>,
}

/// Held locks; released on drop.
pub(crate) struct DayGuard {
    _held: Vec<OwnedMutexGuard<()>>,
}

impl DayLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Lock every key. Keys are sorted and deduplicated first so two writers
    /// touching the same pair of days can't deadlock.
    pub(crate) async fn acquire(&self, mut keys: Vec<DayKey>) -> DayGuard {
        keys.sort();
        keys.dedup();
        if self.locks.len() > MAX_IDLE_DAY_LOCKS {
            self.prune();
        }
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.locks.entry(key).or_default().value().clone();
            held.push(lock.lock_owned().await);
        }
        DayGuard { _held: held }
    }

    /// Drop entries nobody holds or waits on. A clone is only taken under
    /// the shard lock, so a count of 1 seen here can't grow concurrently.
    fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
