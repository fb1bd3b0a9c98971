//! Per-entity serialisation
//!
//! Everything that touches one target entity, from snapshot fetch through
//! apply, runs under that entity's lock so two records naming the same
//! entity cannot both decide against the same stale snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity_id` (ids compare case-insensitively)
    pub async fn lock(&self, entity_id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(entity_id.trim().to_ascii_uppercase())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// Entities locked at least once this run
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_entity_is_exclusive() {
        let locks = EntityLocks::new();
        let guard = locks.lock("Q7245").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock("q7245")).await;
        assert!(blocked.is_err(), "second lock on the same entity must wait");

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.lock("Q7245")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_different_entities_do_not_block() {
        let locks = EntityLocks::new();
        let _a = locks.lock("Q1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("Q2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len().await, 2);
    }
}
