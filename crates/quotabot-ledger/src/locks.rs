use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-username async mutexes so a sweep and a control command never
/// interleave on the same account.
///
/// Only names that are locked or awaited keep a slot; idle slots are
/// dropped on the next `lock` call.
#[derive(Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, username: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // The map's own reference is the only one left on an idle slot.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(username.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.lock("alice").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("alice").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn idle_slots_are_dropped() {
        let locks = AccountLocks::new();
        for name in ["typo1", "typo2", "typo3"] {
            drop(locks.lock(name).await);
        }
        let held = locks.lock("alice").await;
        assert_eq!(locks.slot_count().await, 1);

        drop(held);
        let _other = locks.lock("bob").await;
        assert_eq!(locks.slot_count().await, 1);
    }

    #[tokio::test]
    async fn held_slot_survives_pruning() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.lock("alice").await;
        let _bob = locks.lock("bob").await;
        assert_eq!(locks.slot_count().await, 2);

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("alice").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_users_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.lock("alice").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock("bob"))
            .await
            .expect("bob should not wait on alice");
    }
}
