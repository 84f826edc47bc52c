//! Per-identity serialization
//!
//! Generation and verification for one identity must not interleave; different
//! identities run in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IdentityLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the identity
    pub async fn acquire(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries referenced only by the table are idle.
            locks.retain(|key, lock| key == identity || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(identity.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_identity_is_exclusive() {
        let locks = IdentityLocks::new();
        let _guard = locks.acquire("reader@example.com").await;

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("reader@example.com"),
        )
        .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_other_identities_proceed() {
        let locks = IdentityLocks::new();
        let _guard = locks.acquire("a@example.com").await;

        let other =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire("b@example.com")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = IdentityLocks::new();
        drop(locks.acquire("a@example.com").await);
        drop(locks.acquire("b@example.com").await);
        drop(locks.acquire("c@example.com").await);

        assert_eq!(locks.tracked(), 1);
    }
}
