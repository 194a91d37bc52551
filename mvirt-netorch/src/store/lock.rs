//! Row and named locks with bounded waits.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::model::{AccountId, NetworkId, NicId};

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Account(AccountId),
    Network(NetworkId),
    Nic(NicId),
    /// Global lock shared by all orchestrator instances, e.g. the GC lock.
    Named(String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Account(id) => write!(f, "account:{}", id),
            LockKey::Network(id) => write!(f, "network:{}", id),
            LockKey::Nic(id) => write!(f, "nic:{}", id),
            LockKey::Named(name) => write!(f, "named:{}", name),
        }
    }
}

/// Held lock. Dropping it releases the lock.
pub struct LockGuard {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(lock = %self.key, "Lock released");
    }
}

/// Lock table keyed by [`LockKey`].
///
/// Locks are not reentrant: a task holding a key must pass its guard down
/// instead of acquiring the key again.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the lock. Returns None on timeout.
    pub async fn acquire(&self, key: LockKey, timeout: Duration) -> Option<LockGuard> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(lock = %key, "Lock acquired");
                Some(LockGuard { key, _guard: guard })
            }
            Err(_) => {
                debug!(lock = %key, timeout_ms = timeout.as_millis() as u64, "Lock wait timed out");
                None
            }
        }
    }
}
