use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::user::UserId;

/// Per-user ordered store of messages that have not been saved yet.
///
/// The store is injected into the dispatcher rather than living in a global, so
/// tests get an isolated instance and a persistent backend can be swapped in
/// behind the same surface later.
#[derive(Default)]
pub struct MessageBuffer {
    entries: RwLock<HashMap<UserId, Vec<String>>>,
    user_locks: Arc<UserLocks>,
}

type UserLocks = SyncMutex<HashMap<UserId, Arc<Mutex<()>>>>;

/// Held while a single user's read-modify-write sequence runs. Dropping it
/// lets the next event for the same user proceed, and forgets the user's lock
/// once nobody else is waiting on it.
pub struct UserGuard {
    guard: Option<OwnedMutexGuard<()>>,
    user_id: UserId,
    locks: Arc<UserLocks>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        // The owned guard keeps its own reference to the lock; release it first.
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&self.user_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.user_id);
        }
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` for `user_id` and returns the number of pending messages.
    pub async fn append(&self, user_id: &UserId, text: impl Into<String>) -> usize {
        let mut entries = self.entries.write().await;
        let messages = entries.entry(user_id.clone()).or_default();
        messages.push(text.into());
        messages.len()
    }

    /// Returns the pending messages without removing them. The caller clears
    /// them separately once the downstream save has succeeded.
    pub async fn drain(&self, user_id: &UserId) -> Vec<String> {
        let entries = self.entries.read().await;
        entries.get(user_id).cloned().unwrap_or_default()
    }

    pub async fn clear(&self, user_id: &UserId) {
        let mut entries = self.entries.write().await;
        entries.remove(user_id);
    }

    pub async fn pending(&self, user_id: &UserId) -> usize {
        let entries = self.entries.read().await;
        entries.get(user_id).map(Vec::len).unwrap_or(0)
    }

    pub async fn is_empty(&self, user_id: &UserId) -> bool {
        self.pending(user_id).await == 0
    }

    pub async fn snapshot(&self) -> HashMap<UserId, Vec<String>> {
        self.entries.read().await.clone()
    }

    /// Serializes work for one user across concurrently running event tasks.
    pub async fn lock_user(&self, user_id: &UserId) -> UserGuard {
        let lock = {
            let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(user_id.clone()).or_default())
        };

        let guard = lock.lock_owned().await;
        UserGuard {
            guard: Some(guard),
            user_id: user_id.clone(),
            locks: Arc::clone(&self.user_locks),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.user_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
