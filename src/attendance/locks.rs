use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Arena of keyed FIFO locks: per employee in the ledger, per tag at the
/// gateway.
///
/// Holders of one key queue up FIFO on that key's mutex; different keys
/// never share a lock. Slots are dropped again once nobody holds or waits
/// on them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

pub struct KeyedGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: &'a KeyedLocks,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        // clone out of the shard before awaiting so the shard lock is released
        let slot = self.slots.entry(key.to_owned()).or_default().clone();
        let guard = slot.lock_owned().await;

        KeyedGuard {
            guard: Some(guard),
            key: key.to_owned(),
            locks: self,
        }
    }

    /// Slots currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // only the arena's own reference left: no holder, no waiter
        self.locks
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_employee_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.lock("E1").await;

        let waiter = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("E1").await;
                order.lock().await.push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("first");
        drop(first);

        waiter.await.unwrap();
        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_employees_do_not_block_each_other() {
        let locks = KeyedLocks::new();
        let _e1 = locks.lock("E1").await;

        let e2 = tokio::time::timeout(Duration::from_millis(50), locks.lock("E2")).await;
        assert!(e2.is_ok());
    }

    #[tokio::test]
    async fn released_slots_are_pruned() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock("E1").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }
}
