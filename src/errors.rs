//! Ceremony error types
//!
//! Recoverable ceremony outcomes are modelled as [`CeremonyFailure`] values and
//! travel back to the client inside a `VerifiedResult`. Infrastructure problems
//! (storage, entropy) are [`CeremonyError`] faults and surface as a generic
//! server error.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Expected, recoverable reasons a ceremony is rejected.
///
/// The client must restart the ceremony from option generation after any of
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CeremonyFailure {
    #[error("unknown user")]
    UnknownUser,

    #[error("credential is not registered for this user")]
    UnknownCredential,

    #[error("no challenge pending for this ceremony")]
    NoChallengePending,

    #[error("challenge expired")]
    ChallengeExpired,

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error("origin mismatch")]
    OriginMismatch,

    #[error("relying party mismatch")]
    RelyingPartyMismatch,

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("signature counter regressed")]
    CounterRegression,

    /// The response could not be decoded or is structurally invalid
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl CeremonyFailure {
    /// Stable reason code sent to clients
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownUser => "unknown_user",
            Self::UnknownCredential => "unknown_credential",
            Self::NoChallengePending => "no_challenge_pending",
            Self::ChallengeExpired => "challenge_expired",
            Self::ChallengeMismatch => "challenge_mismatch",
            Self::OriginMismatch => "origin_mismatch",
            Self::RelyingPartyMismatch => "relying_party_mismatch",
            Self::SignatureInvalid => "signature_invalid",
            Self::CounterRegression => "counter_regression",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedResponse(detail.into())
    }
}

// Only the code goes on the wire; malformed-response detail stays in the logs.
impl Serialize for CeremonyFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Errors raised by the credential repository backends
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no account for identity {0}")]
    AccountNotFound(String),

    #[error("credential not found for identity {0}")]
    CredentialNotFound(String),

    #[error("stored credential for identity {0} has an unreadable public key")]
    CorruptRecord(String),
}

/// Error returned by ceremony operations
#[derive(Debug, Error)]
pub enum CeremonyError {
    /// The request was rejected for a recoverable reason
    #[error("ceremony rejected: {0}")]
    Rejected(#[from] CeremonyFailure),

    /// Persistence backend failure
    #[error("infrastructure fault: {0}")]
    InfrastructureFault(#[from] RepositoryError),

    /// The system random source failed
    #[error("secure random source unavailable")]
    EntropyUnavailable,
}

impl CeremonyError {
    /// Whether this error is a server-side fault rather than a rejection
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// The rejection reason, if this is a rejection
    #[must_use]
    pub fn failure(&self) -> Option<&CeremonyFailure> {
        match self {
            Self::Rejected(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<ring::error::Unspecified> for CeremonyError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::EntropyUnavailable
    }
}
