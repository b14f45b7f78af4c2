//! Per-key serialization of state transitions.
//!
//! A double-clicked "accept" must not produce two concurrent remote calls
//! for the same request. Each request id and each stream key gets its own
//! async mutex; the guard is held across the remote call so the second
//! caller re-reads the status only after the first one has finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map size above which dead entries are swept on the next acquire.
const SWEEP_THRESHOLD: usize = 1024;

/// A set of lazily created async mutexes addressed by string key.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and returns a guard that holds it.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    tracing::error!("keyed lock table poisoned, recovering");
                    poisoned.into_inner()
                }
            };

            if map.len() > SWEEP_THRESHOLD {
                map.retain(|_, weak| weak.strong_count() > 0);
            }

            match map.get(key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(AsyncMutex::new(()));
                    map.insert(key.to_string(), Arc::downgrade(&fresh));
                    fresh
                }
            }
        };

        lock.lock_owned().await
    }

    /// Number of keys currently tracked, live or not.
    pub fn tracked(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }
}
