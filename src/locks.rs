// 12.0: keyed async locks, one per user. the engine serializes ledger writes on them and
// the monitor uses a second set to keep passes for one user from overlapping.

use crate::types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

// map size at which idle entries are swept
const PRUNE_AT: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Handle to the user's lock. Once the map reaches the sweep size, entries that no
    /// guard or waiter references are dropped, so it stays bounded by the busy users.
    pub(crate) async fn handle(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if locks.len() >= PRUNE_AT && !locks.contains_key(user_id) {
            // handles are cloned under the map lock, so a count of 1 means nobody else has one
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(user_id.clone()).or_default().clone()
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
