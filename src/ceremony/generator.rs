//! Ceremony option generation

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::challenge_store::{Challenge, ChallengePurpose, ChallengeStore};
use crate::errors::{CeremonyError, CeremonyFailure};
use crate::repository::CredentialRepository;
use crate::webauthn::{crypto, AuthenticationOptions, RegistrationOptions, WebAuthnService};

const MAX_CHALLENGE_LIFETIME_SECS: i64 = 86_400;

/// Issues challenges and builds the options handed to the browser
pub struct CeremonyGenerator {
    webauthn: Arc<WebAuthnService>,
    challenges: Arc<ChallengeStore>,
    repository: Arc<dyn CredentialRepository>,
}

impl CeremonyGenerator {
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

    /// Start a registration ceremony, creating the account on first use
    ///
    /// # Errors
    /// Returns an infrastructure error if the repository or random source fails
    pub async fn generate_registration(
        &self,
        identity: &str,
    ) -> Result<RegistrationOptions, CeremonyError> {
        let user_handle = crypto::generate_user_handle()?;
        let account = self.repository.upsert_account(identity, user_handle).await?;

        let challenge = self.issue(identity, ChallengePurpose::Registration)?;
        Ok(self
            .webauthn
            .registration_options(&account.user_handle, &account.identity, &challenge))
    }

    /// Start an authentication ceremony for an existing account
    ///
    /// # Errors
    /// Returns `UnknownUser` if the identity has no account, or an
    /// infrastructure error
    pub async fn generate_authentication(
        &self,
        identity: &str,
    ) -> Result<AuthenticationOptions, CeremonyError> {
        let account = self
            .repository
            .find_account(identity)
            .await?
            .ok_or(CeremonyFailure::UnknownUser)?;

        let challenge = self.issue(identity, ChallengePurpose::Authentication)?;
        Ok(self.webauthn.authentication_options(
            account
                .credentials
                .iter()
                .map(|c| c.credential_id.as_slice()),
            &challenge,
        ))
    }

    fn issue(&self, identity: &str, purpose: ChallengePurpose) -> Result<Vec<u8>, CeremonyError> {
        let value = crypto::generate_challenge()?;
        let seconds = i64::try_from(self.webauthn.settings().timeout_seconds)
            .unwrap_or(MAX_CHALLENGE_LIFETIME_SECS)
            .min(MAX_CHALLENGE_LIFETIME_SECS);
        let lifetime = Duration::seconds(seconds);
        self.challenges.put(
            identity,
            Challenge::new(value.clone(), purpose, Utc::now(), lifetime),
        );
        log::info!("Issued {purpose:?} challenge for {identity}, valid for {seconds}s");
        Ok(value)
    }
}
