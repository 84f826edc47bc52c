//! Ceremony response verification
//!
//! Every verification consumes the pending challenge before any check on the
//! response runs, so a failed attempt can never be retried with the same
//! challenge.

use std::sync::Arc;

use chrono::Utc;

use super::challenge_store::{Challenge, ChallengePurpose, ChallengeStore};
use super::{CeremonyState, VerifiedResult};
use crate::errors::{CeremonyError, CeremonyFailure, RepositoryError};
use crate::repository::{CredentialRecord, CredentialRepository, UserAccount};
use crate::webauthn::{
    crypto, AuthenticationResponse, CosePublicKey, RegisteredCredential, RegistrationResponse,
    VerifiedAssertion, WebAuthnService,
};

/// Validates signed responses and records their results
pub struct CeremonyVerifier {
    webauthn: Arc<WebAuthnService>,
    challenges: Arc<ChallengeStore>,
    repository: Arc<dyn CredentialRepository>,
}

impl CeremonyVerifier {
    #[must_use]
    pub fn new(
        webauthn: Arc<WebAuthnService>,
        challenges: Arc<ChallengeStore>,
        repository: Arc<dyn CredentialRepository>,
    ) -> Self {
        Self {
            webauthn,
            challenges,
            repository,
        }
    }

    /// Finish a registration ceremony
    ///
    /// On success the new credential is stored on the account. On rejection the
    /// repository is untouched.
    ///
    /// # Errors
    /// Only infrastructure faults are errors; rejections are returned in the
    /// `VerifiedResult`.
    pub async fn verify_registration(
        &self,
        identity: &str,
        response: &RegistrationResponse,
    ) -> Result<VerifiedResult, CeremonyError> {
        if self.repository.find_account(identity).await?.is_none() {
            return Ok(rejected(identity, "registration", CeremonyFailure::UnknownUser));
        }
        let challenge = match self.take_challenge(identity, ChallengePurpose::Registration) {
            Ok(challenge) => challenge,
            Err(failure) => return Ok(rejected(identity, "registration", failure)),
        };

        let state = CeremonyState::AwaitingResponse;
        let state = match self.webauthn.finish_registration(response, &challenge.value) {
            Ok(credential) => {
                self.store_credential(identity, credential).await?;
                state.resolve(Ok(()))
            }
            Err(failure) => state.resolve(Err(failure)),
        };

        Ok(finish(identity, "registration", state))
    }

    /// Finish an authentication ceremony
    ///
    /// On success the credential's signature counter is advanced.
    ///
    /// # Errors
    /// Only infrastructure faults are errors; rejections are returned in the
    /// `VerifiedResult`.
    pub async fn verify_authentication(
        &self,
        identity: &str,
        response: &AuthenticationResponse,
    ) -> Result<VerifiedResult, CeremonyError> {
        let Some(account) = self.repository.find_account(identity).await? else {
            return Ok(rejected(identity, "authentication", CeremonyFailure::UnknownUser));
        };
        let challenge = match self.take_challenge(identity, ChallengePurpose::Authentication) {
            Ok(challenge) => challenge,
            Err(failure) => return Ok(rejected(identity, "authentication", failure)),
        };

        let state = CeremonyState::AwaitingResponse;
        let state = match self.check_assertion(&account, response, &challenge) {
            Ok((credential_id, assertion)) => {
                self.repository
                    .update_sign_count(identity, &credential_id, assertion.sign_count, Utc::now())
                    .await?;
                log::debug!(
                    "Credential counter for {identity} advanced to {} (user verified: {})",
                    assertion.sign_count,
                    assertion.user_verified
                );
                state.resolve(Ok(()))
            }
            Err(CeremonyError::Rejected(failure)) => state.resolve(Err(failure)),
            Err(fault) => return Err(fault),
        };

        Ok(finish(identity, "authentication", state))
    }

    /// Remove the pending challenge and check it belongs to this ceremony
    fn take_challenge(
        &self,
        identity: &str,
        purpose: ChallengePurpose,
    ) -> Result<Challenge, CeremonyFailure> {
        let challenge = self
            .challenges
            .take(identity)
            .ok_or(CeremonyFailure::NoChallengePending)?;
        if challenge.purpose != purpose {
            return Err(CeremonyFailure::NoChallengePending);
        }
        if challenge.is_expired(Utc::now()) {
            return Err(CeremonyFailure::ChallengeExpired);
        }
        Ok(challenge)
    }

    fn check_assertion(
        &self,
        account: &UserAccount,
        response: &AuthenticationResponse,
        challenge: &Challenge,
    ) -> Result<(Vec<u8>, VerifiedAssertion), CeremonyError> {
        let credential_id = crypto::decode(&response.raw_id)
            .map_err(|_| CeremonyFailure::malformed("invalid rawId encoding"))?;
        let record = account
            .credential(&credential_id)
            .ok_or(CeremonyFailure::UnknownCredential)?;

        if let Some(user_handle) = &response.response.user_handle {
            let matches = crypto::decode(user_handle)
                .ok()
                .zip(crypto::decode(&account.user_handle).ok())
                .is_some_and(|(given, expected)| given == expected);
            if !matches {
                return Err(CeremonyFailure::UnknownCredential.into());
            }
        }

        let public_key = CosePublicKey::from_bytes(&record.public_key)
            .map_err(|_| RepositoryError::CorruptRecord(account.identity.clone()))?;
        let assertion = self.webauthn.finish_authentication(
            response,
            &challenge.value,
            &public_key,
            record.sign_count,
        )?;
        Ok((credential_id, assertion))
    }

    async fn store_credential(
        &self,
        identity: &str,
        credential: RegisteredCredential,
    ) -> Result<(), CeremonyError> {
        log::debug!(
            "Storing {} credential (alg {}) for {identity} (user verified: {})",
            credential.attestation_format,
            credential.algorithm,
            credential.user_verified
        );
        let record = CredentialRecord {
            credential_id: credential.credential_id,
            public_key: credential.public_key,
            algorithm: credential.algorithm,
            sign_count: credential.sign_count,
            attestation_format: credential.attestation_format,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.repository.put_credential(identity, record).await?;
        Ok(())
    }
}

fn rejected(identity: &str, ceremony: &str, failure: CeremonyFailure) -> VerifiedResult {
    finish(identity, ceremony, CeremonyState::Rejected(failure))
}

fn finish(identity: &str, ceremony: &str, state: CeremonyState) -> VerifiedResult {
    match &state {
        CeremonyState::Verified => log::info!("Passkey {ceremony} verified for {identity}"),
        CeremonyState::Rejected(failure) => {
            log::warn!("Passkey {ceremony} rejected for {identity}: {failure}");
        }
        CeremonyState::AwaitingResponse => {
            log::error!("Passkey {ceremony} for {identity} finished without a verdict");
        }
    }
    VerifiedResult::from(state)
}
