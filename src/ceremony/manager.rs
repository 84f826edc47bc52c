//! Credential ceremony manager
//!
//! Entry point for the four ceremony operations. Every operation for an
//! identity runs under that identity's lock, so a verification always observes
//! the challenge written by the most recent generation.

use std::sync::Arc;

use chrono::Utc;

use super::challenge_store::ChallengeStore;
use super::generator::CeremonyGenerator;
use super::locks::IdentityLocks;
use super::verifier::CeremonyVerifier;
use super::VerifiedResult;
use crate::errors::CeremonyError;
use crate::repository::{
    CredentialRepository, FileCredentialRepository, InMemoryCredentialRepository,
};
use crate::settings::{AuthServerSettings, StorageBackend};
use crate::webauthn::{
    AuthenticationOptions, AuthenticationResponse, RegistrationOptions, RegistrationResponse,
    WebAuthnService, WebAuthnSettings,
};

/// Shared handle to the ceremony subsystem; cloning is cheap
#[derive(Clone)]
pub struct CredentialCeremonyManager {
    webauthn: Arc<WebAuthnService>,
    challenges: Arc<ChallengeStore>,
    repository: Arc<dyn CredentialRepository>,
    generator: Arc<CeremonyGenerator>,
    verifier: Arc<CeremonyVerifier>,
    locks: Arc<IdentityLocks>,
}

impl CredentialCeremonyManager {
    /// Create a manager for the relying party backed by `repository`
    #[must_use]
    pub fn new(settings: WebAuthnSettings, repository: Arc<dyn CredentialRepository>) -> Self {
        let webauthn = Arc::new(WebAuthnService::new(settings));
        let challenges = Arc::new(ChallengeStore::new());
        let generator = Arc::new(CeremonyGenerator::new(
            Arc::clone(&webauthn),
            Arc::clone(&challenges),
            Arc::clone(&repository),
        ));
        let verifier = Arc::new(CeremonyVerifier::new(
            Arc::clone(&webauthn),
            Arc::clone(&challenges),
            Arc::clone(&repository),
        ));

        Self {
            webauthn,
            challenges,
            repository,
            generator,
            verifier,
            locks: Arc::new(IdentityLocks::new()),
        }
    }

    /// Create a manager with the repository backend selected in the settings
    ///
    /// # Errors
    /// Returns an error if the file backend cannot load its store
    pub async fn from_settings(settings: &AuthServerSettings) -> anyhow::Result<Self> {
        let repository: Arc<dyn CredentialRepository> = match settings.storage.backend {
            StorageBackend::Memory => {
                log::info!("Using in-memory credential store");
                Arc::new(InMemoryCredentialRepository::new())
            }
            StorageBackend::File => {
                log::info!("Using file credential store at {}", settings.storage.path);
                Arc::new(FileCredentialRepository::open(&settings.storage.path).await?)
            }
        };
        Ok(Self::new(settings.webauthn.clone(), repository))
    }

    /// Issue registration options, creating the account on first use
    ///
    /// # Errors
    /// Returns an infrastructure error if storage or the random source fails
    pub async fn generate_registration_options(
        &self,
        identity: &str,
    ) -> Result<RegistrationOptions, CeremonyError> {
        let _guard = self.locks.acquire(identity).await;
        self.generator.generate_registration(identity).await
    }

    /// Verify a registration response and store the new credential
    ///
    /// # Errors
    /// Returns an error only for infrastructure faults
    pub async fn verify_registration(
        &self,
        identity: &str,
        response: &RegistrationResponse,
    ) -> Result<VerifiedResult, CeremonyError> {
        let _guard = self.locks.acquire(identity).await;
        self.verifier.verify_registration(identity, response).await
    }

    /// Issue authentication options for an existing account
    ///
    /// # Errors
    /// Returns `UnknownUser` for an identity without an account, or an
    /// infrastructure error
    pub async fn generate_authentication_options(
        &self,
        identity: &str,
    ) -> Result<AuthenticationOptions, CeremonyError> {
        let _guard = self.locks.acquire(identity).await;
        self.generator.generate_authentication(identity).await
    }

    /// Verify an authentication response and advance the signature counter
    ///
    /// # Errors
    /// Returns an error only for infrastructure faults
    pub async fn verify_authentication(
        &self,
        identity: &str,
        response: &AuthenticationResponse,
    ) -> Result<VerifiedResult, CeremonyError> {
        let _guard = self.locks.acquire(identity).await;
        self.verifier.verify_authentication(identity, response).await
    }

    /// Drop challenges whose lifetime has passed
    pub fn purge_expired_challenges(&self) -> usize {
        self.challenges.purge_expired(Utc::now())
    }

    #[must_use]
    pub fn challenge_store(&self) -> &ChallengeStore {
        &self.challenges
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn CredentialRepository> {
        &self.repository
    }

    #[must_use]
    pub fn settings(&self) -> &WebAuthnSettings {
        self.webauthn.settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceremony::{Challenge, ChallengePurpose};
    use crate::errors::CeremonyFailure;
    use crate::repository::CredentialRecord;
    use crate::testing::{tamper, KeyAlgorithm, SoftAuthenticator};
    use crate::webauthn::{crypto, COSE_ALG_EDDSA, COSE_ALG_RS256};
    use chrono::Duration;

    const IDENTITY: &str = "reader@example.com";

    fn manager() -> CredentialCeremonyManager {
        CredentialCeremonyManager::new(
            WebAuthnSettings::default(),
            Arc::new(InMemoryCredentialRepository::new()),
        )
    }

    fn manager_requiring_user_verification() -> CredentialCeremonyManager {
        CredentialCeremonyManager::new(
            WebAuthnSettings {
                user_verification: "required".to_string(),
                ..Default::default()
            },
            Arc::new(InMemoryCredentialRepository::new()),
        )
    }

    fn authenticator(manager: &CredentialCeremonyManager) -> SoftAuthenticator {
        SoftAuthenticator::for_relying_party(manager.settings())
    }

    async fn registered(manager: &CredentialCeremonyManager) -> SoftAuthenticator {
        let mut authenticator = authenticator(manager);
        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let response = authenticator.register(&options);
        let result = manager.verify_registration(IDENTITY, &response).await.unwrap();
        assert!(result.verified, "registration failed: {result:?}");
        authenticator
    }

    fn reason(result: &VerifiedResult) -> Option<CeremonyFailure> {
        assert!(!result.verified);
        result.reason.clone()
    }

    #[tokio::test]
    async fn test_registration_round_trip_adds_one_record() {
        let manager = manager();
        let authenticator = registered(&manager).await;

        let records = manager.repository().list_credentials(IDENTITY).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].credential_id, authenticator.credential_id());
        assert_eq!(records[0].public_key, authenticator.public_key());
        assert_eq!(records[0].attestation_format, "none");
        assert!(manager.challenge_store().get(IDENTITY).is_none());
    }

    #[tokio::test]
    async fn test_second_generation_invalidates_first_challenge() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);

        let first = manager.generate_registration_options(IDENTITY).await.unwrap();
        let second = manager.generate_registration_options(IDENTITY).await.unwrap();
        assert_ne!(first.challenge, second.challenge);
        assert_eq!(first.user.id, second.user.id);

        let stale = authenticator.register(&first);
        let result = manager.verify_registration(IDENTITY, &stale).await.unwrap();
        assert!(matches!(
            reason(&result),
            Some(CeremonyFailure::ChallengeMismatch | CeremonyFailure::NoChallengePending)
        ));
        assert!(manager
            .repository()
            .list_credentials(IDENTITY)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_replayed_registration_has_no_challenge() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let response = authenticator.register(&options);

        assert!(manager.verify_registration(IDENTITY, &response).await.unwrap().verified);
        let replay = manager.verify_registration(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&replay), Some(CeremonyFailure::NoChallengePending));
    }

    #[tokio::test]
    async fn test_authentication_round_trip_updates_counter() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        assert_eq!(options.allow_credentials.len(), 1);
        let response = authenticator.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(result, VerifiedResult::verified());

        let records = manager.repository().list_credentials(IDENTITY).await.unwrap();
        assert_eq!(records[0].sign_count, 1);
        assert!(records[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_counter_regression_leaves_record_unchanged() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;
        authenticator.sign_count = 9;
        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = authenticator.authenticate(&options);
        assert!(manager.verify_authentication(IDENTITY, &response).await.unwrap().verified);
        let before = manager.repository().list_credentials(IDENTITY).await.unwrap();

        // A cloned authenticator reports an older counter.
        authenticator.sign_count = 3;
        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = authenticator.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();

        assert_eq!(reason(&result), Some(CeremonyFailure::CounterRegression));
        let after = manager.repository().list_credentials(IDENTITY).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after[0].sign_count, 10);
    }

    #[tokio::test]
    async fn test_equal_counter_is_accepted() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;
        authenticator.counter_step = 0;

        for _ in 0..2 {
            let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
            let response = authenticator.authenticate(&options);
            let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
            assert!(result.verified);
        }
    }

    #[tokio::test]
    async fn test_origin_mismatch() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        authenticator.origin = "https://evil.example".to_string();

        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let response = authenticator.register(&options);
        let result = manager.verify_registration(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::OriginMismatch));
        assert!(manager.challenge_store().get(IDENTITY).is_none());
    }

    #[tokio::test]
    async fn test_relying_party_mismatch() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        authenticator.rp_id = "evil.example".to_string();

        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let response = authenticator.register(&options);
        let result = manager.verify_registration(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::RelyingPartyMismatch));
    }

    #[tokio::test]
    async fn test_authentication_origin_mismatch() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;
        authenticator.origin = "https://evil.example".to_string();

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = authenticator.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::OriginMismatch));
        assert!(manager.challenge_store().get(IDENTITY).is_none());

        let records = manager.repository().list_credentials(IDENTITY).await.unwrap();
        assert_eq!(records[0].sign_count, 0);
    }

    #[tokio::test]
    async fn test_authentication_relying_party_mismatch() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;
        authenticator.rp_id = "evil.example".to_string();

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = authenticator.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::RelyingPartyMismatch));
        assert!(manager.challenge_store().get(IDENTITY).is_none());
    }

    #[tokio::test]
    async fn test_user_handle_mismatch() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let mut response = authenticator.authenticate(&options);
        response.response.user_handle = Some(crypto::encode(b"another-user"));

        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::UnknownCredential));
        assert!(manager.challenge_store().get(IDENTITY).is_none());

        let records = manager.repository().list_credentials(IDENTITY).await.unwrap();
        assert_eq!(records[0].sign_count, 0);
    }

    #[tokio::test]
    async fn test_required_user_verification_at_registration() {
        let manager = manager_requiring_user_verification();
        let mut authenticator = authenticator(&manager);
        authenticator.user_verified = false;

        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        assert_eq!(options.authenticator_selection.user_verification, "required");
        let response = authenticator.register(&options);
        let result = manager.verify_registration(IDENTITY, &response).await.unwrap();

        assert_eq!(
            reason(&result),
            Some(CeremonyFailure::malformed("user verification required"))
        );
        assert!(manager.challenge_store().get(IDENTITY).is_none());
        assert!(manager
            .repository()
            .list_credentials(IDENTITY)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_required_user_verification_at_authentication() {
        let manager = manager_requiring_user_verification();
        let mut authenticator = registered(&manager).await;

        authenticator.user_verified = false;
        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        assert_eq!(options.user_verification, "required");
        let response = authenticator.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(
            reason(&result),
            Some(CeremonyFailure::malformed("user verification required"))
        );
        assert!(manager.challenge_store().get(IDENTITY).is_none());

        authenticator.user_verified = true;
        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = authenticator.authenticate(&options);
        assert!(manager.verify_authentication(IDENTITY, &response).await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_preferred_user_verification_accepts_presence_only() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        authenticator.user_verified = false;

        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let response = authenticator.register(&options);
        assert!(manager.verify_registration(IDENTITY, &response).await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_eddsa_and_rs256_credentials() {
        for (algorithm, alg) in [
            (KeyAlgorithm::EdDsa, COSE_ALG_EDDSA),
            (KeyAlgorithm::Rs256, COSE_ALG_RS256),
        ] {
            let manager = manager();
            let mut authenticator = authenticator(&manager).with_key_algorithm(algorithm);

            let options = manager.generate_registration_options(IDENTITY).await.unwrap();
            assert!(options.public_key_params.iter().any(|param| param.alg == alg));
            let response = authenticator.register(&options);
            assert!(manager.verify_registration(IDENTITY, &response).await.unwrap().verified);

            let records = manager.repository().list_credentials(IDENTITY).await.unwrap();
            assert_eq!(records[0].algorithm, alg);
            assert_eq!(records[0].public_key, authenticator.public_key());

            let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
            let response = authenticator.authenticate(&options);
            let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
            assert_eq!(result, VerifiedResult::verified(), "algorithm {alg}");

            let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
            let mut response = authenticator.authenticate(&options);
            response.response.signature = tamper(&response.response.signature);
            let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
            assert_eq!(reason(&result), Some(CeremonyFailure::SignatureInvalid));
        }
    }

    #[tokio::test]
    async fn test_non_public_key_credential_type() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let mut response = authenticator.register(&options);
        response.r#type = "password".to_string();

        let result = manager.verify_registration(IDENTITY, &response).await.unwrap();
        assert!(matches!(
            reason(&result),
            Some(CeremonyFailure::MalformedResponse(_))
        ));
        assert!(manager.challenge_store().get(IDENTITY).is_none());
    }

    #[tokio::test]
    async fn test_unreadable_stored_key_is_a_fault() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;
        let stored = manager.repository().list_credentials(IDENTITY).await.unwrap();
        manager
            .repository()
            .put_credential(
                IDENTITY,
                CredentialRecord {
                    public_key: vec![0xff, 0x00],
                    ..stored[0].clone()
                },
            )
            .await
            .unwrap();

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = authenticator.authenticate(&options);
        let err = manager
            .verify_authentication(IDENTITY, &response)
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn test_unknown_user_does_not_touch_store() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;
        manager
            .generate_registration_options("other@example.com")
            .await
            .unwrap();
        let pending = manager.challenge_store().len();

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = authenticator.authenticate(&options);
        let pending_with_reader = manager.challenge_store().len();
        assert_eq!(pending_with_reader, pending + 1);

        let result = manager
            .verify_authentication("ghost@example.com", &response)
            .await
            .unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::UnknownUser));
        assert_eq!(manager.challenge_store().len(), pending_with_reader);

        let err = manager
            .generate_authentication_options("ghost@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.failure(), Some(&CeremonyFailure::UnknownUser));
        assert!(manager.challenge_store().get("ghost@example.com").is_none());
    }

    #[tokio::test]
    async fn test_verify_registration_for_unknown_user() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let response = authenticator.register(&options);

        let result = manager
            .verify_registration("ghost@example.com", &response)
            .await
            .unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::UnknownUser));
        assert!(manager.challenge_store().get(IDENTITY).is_some());
    }

    #[tokio::test]
    async fn test_expired_challenge() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        let options = manager.generate_registration_options(IDENTITY).await.unwrap();

        let pending = manager.challenge_store().get(IDENTITY).unwrap();
        manager.challenge_store().put(
            IDENTITY,
            Challenge::new(
                pending.value,
                pending.purpose,
                Utc::now() - Duration::minutes(5),
                Duration::seconds(60),
            ),
        );

        let response = authenticator.register(&options);
        let result = manager.verify_registration(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::ChallengeExpired));
        assert!(manager.challenge_store().get(IDENTITY).is_none());
    }

    #[tokio::test]
    async fn test_registration_challenge_cannot_authenticate() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;

        let registration = manager.generate_registration_options(IDENTITY).await.unwrap();
        let pending = manager.challenge_store().get(IDENTITY).unwrap();
        assert_eq!(pending.purpose, ChallengePurpose::Registration);

        let options = AuthenticationOptions {
            challenge: registration.challenge,
            timeout: registration.timeout,
            rp_id: registration.rp.id,
            allow_credentials: Vec::new(),
            user_verification: registration.authenticator_selection.user_verification,
        };
        let response = authenticator.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::NoChallengePending));
    }

    #[tokio::test]
    async fn test_unknown_credential() {
        let manager = manager();
        registered(&manager).await;
        let mut stranger = authenticator(&manager);

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let response = stranger.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::UnknownCredential));
        assert!(manager.challenge_store().get(IDENTITY).is_none());
    }

    #[tokio::test]
    async fn test_tampered_signature_clears_challenge() {
        let manager = manager();
        let mut authenticator = registered(&manager).await;

        let options = manager.generate_authentication_options(IDENTITY).await.unwrap();
        let mut response = authenticator.authenticate(&options);
        response.response.signature = tamper(&response.response.signature);

        let result = manager.verify_authentication(IDENTITY, &response).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::SignatureInvalid));
        assert!(manager.challenge_store().get(IDENTITY).is_none());

        // Retrying the untampered response cannot reuse the cleared challenge.
        let retry = authenticator.authenticate(&options);
        let result = manager.verify_authentication(IDENTITY, &retry).await.unwrap();
        assert_eq!(reason(&result), Some(CeremonyFailure::NoChallengePending));
        let records = manager.repository().list_credentials(IDENTITY).await.unwrap();
        assert_eq!(records[0].sign_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let manager = manager();
        let mut authenticator = authenticator(&manager);
        let options = manager.generate_registration_options(IDENTITY).await.unwrap();
        let mut response = authenticator.register(&options);
        response.response.attestation_object = "!!not-base64!!".to_string();

        let result = manager.verify_registration(IDENTITY, &response).await.unwrap();
        assert!(matches!(
            reason(&result),
            Some(CeremonyFailure::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired_challenges() {
        let manager = manager();
        manager.challenge_store().put(
            "stale@example.com",
            Challenge::new(
                vec![1; 32],
                ChallengePurpose::Registration,
                Utc::now() - Duration::hours(1),
                Duration::seconds(60),
            ),
        );
        manager.generate_registration_options(IDENTITY).await.unwrap();

        assert_eq!(manager.purge_expired_challenges(), 1);
        assert!(manager.challenge_store().get(IDENTITY).is_some());
    }

    #[tokio::test]
    async fn test_identities_run_concurrently() {
        let manager = manager();
        let identities: Vec<String> = (0..8).map(|i| format!("reader{i}@example.com")).collect();

        let tasks = identities.iter().cloned().map(|identity| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let mut authenticator = SoftAuthenticator::for_relying_party(manager.settings());
                let options = manager
                    .generate_registration_options(&identity)
                    .await
                    .unwrap();
                let response = authenticator.register(&options);
                manager
                    .verify_registration(&identity, &response)
                    .await
                    .unwrap()
            })
        });

        for task in tasks.collect::<Vec<_>>() {
            assert!(task.await.unwrap().verified);
        }
        assert!(manager.challenge_store().is_empty());
    }
}
