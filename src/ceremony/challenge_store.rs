//! Pending challenge storage
//!
//! Process-lifetime map from user identity to the single outstanding
//! challenge for that identity.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

/// Which ceremony a challenge was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePurpose {
    Registration,
    Authentication,
}

/// A single-use random challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub value: Vec<u8>,
    pub purpose: ChallengePurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    #[must_use]
    pub fn new(
        value: Vec<u8>,
        purpose: ChallengePurpose,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            value,
            purpose,
            issued_at,
            expires_at: issued_at + lifetime,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// In-memory challenge store, at most one challenge per identity
#[derive(Debug, Default)]
pub struct ChallengeStore {
    challenges: RwLock<HashMap<String, Challenge>>,
}

impl ChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a challenge, replacing any existing one for the identity
    pub fn put(&self, identity: &str, challenge: Challenge) {
        self.challenges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.to_string(), challenge);
    }

    /// Current challenge for the identity, if any
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<Challenge> {
        self.challenges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Remove the identity's challenge; a no-op when there is none
    pub fn clear(&self, identity: &str) {
        self.take(identity);
    }

    /// Remove and return the identity's challenge in one step
    pub fn take(&self, identity: &str) -> Option<Challenge> {
        self.challenges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    /// Drop every challenge that expired before `now`, returning how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut challenges = self
            .challenges
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = challenges.len();
        challenges.retain(|_, challenge| !challenge.is_expired(now));
        before - challenges.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.challenges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
