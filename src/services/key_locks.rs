//! Per-key serialization of version-history mutations.
//!
//! Every write that reads a key's current entry and then appends or removes
//! entries holds that key's guard for the whole sequence. Guards for
//! different keys are independent.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry size above which dead entries are swept on the next lock call.
const SWEEP_THRESHOLD: usize = 1024;

type LockKey = (String, String);

#[derive(Default)]
pub struct KeyLocks {
    inner: DashMap<LockKey, Weak<AsyncMutex<()>>>,
}

pub type KeyGuard = OwnedMutexGuard<()>;

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(bucket, key)`.
    pub async fn lock(&self, bucket: &str, key: &str) -> KeyGuard {
        let mutex = self.entry(bucket, key);
        mutex.lock_owned().await
    }

    fn entry(&self, bucket: &str, key: &str) -> Arc<AsyncMutex<()>> {
        // No shard guard may be held across the sweep.
        if self.inner.len() >= SWEEP_THRESHOLD {
            self.inner.retain(|_, weak| weak.strong_count() > 0);
        }

        let mut slot = self
            .inner
            .entry((bucket.to_string(), key.to_string()))
            .or_default();
        match slot.upgrade() {
            Some(existing) => existing,
            None => {
                let fresh = Arc::new(AsyncMutex::new(()));
                *slot = Arc::downgrade(&fresh);
                fresh
            }
        }
    }

    #[cfg(test)]
    fn live_entries(&self) -> usize {
        self.inner
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }
}
