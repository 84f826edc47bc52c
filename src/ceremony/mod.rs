//! Credential ceremonies
//!
//! A ceremony starts when options are generated (a challenge is issued for the
//! identity) and ends when the signed response is verified or rejected. The
//! [`CredentialCeremonyManager`] composes the pieces and serializes work per
//! identity.

pub mod challenge_store;
mod generator;
mod locks;
mod manager;
mod verifier;

use serde::Serialize;

use crate::errors::CeremonyFailure;

pub use challenge_store::{Challenge, ChallengePurpose, ChallengeStore};
pub use generator::CeremonyGenerator;
pub use locks::IdentityLocks;
pub use manager::CredentialCeremonyManager;
pub use verifier::CeremonyVerifier;

/// Lifecycle of a single ceremony
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeremonyState {
    AwaitingResponse,
    Verified,
    Rejected(CeremonyFailure),
}

impl CeremonyState {
    /// Move out of `AwaitingResponse`; terminal states never change
    #[must_use]
    pub fn resolve(self, outcome: Result<(), CeremonyFailure>) -> Self {
        match self {
            Self::AwaitingResponse => match outcome {
                Ok(()) => Self::Verified,
                Err(failure) => Self::Rejected(failure),
            },
            terminal => terminal,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AwaitingResponse)
    }
}

/// Outcome of a verification, as returned to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedResult {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CeremonyFailure>,
}

impl VerifiedResult {
    #[must_use]
    pub fn verified() -> Self {
        Self {
            verified: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn rejected(reason: CeremonyFailure) -> Self {
        Self {
            verified: false,
            reason: Some(reason),
        }
    }
}

impl From<CeremonyState> for VerifiedResult {
    fn from(state: CeremonyState) -> Self {
        match state {
            CeremonyState::Verified => Self::verified(),
            CeremonyState::Rejected(failure) => Self::rejected(failure),
            // A ceremony that never saw a verdict is not verified.
            CeremonyState::AwaitingResponse => {
                Self::rejected(CeremonyFailure::NoChallengePending)
            }
        }
    }
}
