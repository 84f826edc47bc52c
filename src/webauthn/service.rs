//! `WebAuthn` service implementation
//!
//! Builds ceremony options and verifies client responses for a fixed relying
//! party. The service is stateless: challenges and credentials are supplied by
//! the caller.

use super::attestation::{self, TYPE_CREATE, TYPE_GET};
use super::authenticator_data::AuthenticatorData;
use super::cbor::{self, CosePublicKey};
use super::crypto;
use super::settings::WebAuthnSettings;
use super::types::{
    AuthenticationOptions, AuthenticationResponse, AuthenticatorSelectionCriteria,
    PublicKeyCredentialDescriptor, PublicKeyCredentialParameters, RegistrationOptions,
    RegistrationResponse, RelyingParty, UserEntity, PUBLIC_KEY_TYPE, SUPPORTED_ALGORITHMS,
};
use crate::errors::CeremonyFailure;

/// A credential extracted from a verified registration response
#[derive(Debug, Clone)]
pub struct RegisteredCredential {
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>, // Encoded COSE_Key
    pub algorithm: i64,      // COSE algorithm identifier
    pub sign_count: u32,
    pub attestation_format: String,
    pub user_verified: bool,
}

/// Outcome of a verified assertion
#[derive(Debug, Clone, Copy)]
pub struct VerifiedAssertion {
    pub sign_count: u32,
    pub user_verified: bool,
}

/// Core `WebAuthn` service
#[derive(Debug, Clone)]
pub struct WebAuthnService {
    settings: WebAuthnSettings,
    rp_id_hash: Vec<u8>,
}

impl WebAuthnService {
    /// Create a new `WebAuthnService` with the given settings
    #[must_use]
    pub fn new(settings: WebAuthnSettings) -> Self {
        let rp_id_hash = crypto::sha256(settings.rp_id.as_bytes());
        Self {
            settings,
            rp_id_hash,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &WebAuthnSettings {
        &self.settings
    }

    /// Create registration options for a new credential
    ///
    /// # Arguments
    /// * `user_handle` - Base64url user handle
    /// * `user_name` - User name (the identity)
    /// * `challenge` - Freshly generated challenge bytes
    #[must_use]
    pub fn registration_options(
        &self,
        user_handle: &str,
        user_name: &str,
        challenge: &[u8],
    ) -> RegistrationOptions {
        RegistrationOptions {
            challenge: crypto::encode(challenge),
            rp: RelyingParty {
                id: self.settings.rp_id.clone(),
                name: self.settings.rp_name.clone(),
            },
            user: UserEntity {
                id: user_handle.to_string(),
                name: user_name.to_string(),
                display_name: user_name.to_string(),
            },
            public_key_params: SUPPORTED_ALGORITHMS
                .iter()
                .map(|&alg| PublicKeyCredentialParameters {
                    r#type: PUBLIC_KEY_TYPE.to_string(),
                    alg,
                })
                .collect(),
            timeout: self.settings.timeout_millis(),
            attestation: self.settings.attestation.clone(),
            // Re-registering a known authenticator overwrites its record.
            exclude_credentials: Vec::new(),
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: self.settings.authenticator_attachment.clone(),
                require_resident_key: false,
                user_verification: self.settings.user_verification.clone(),
            },
        }
    }

    /// Create authentication options allowing the given credentials
    #[must_use]
    pub fn authentication_options<'a>(
        &self,
        credential_ids: impl IntoIterator<Item = &'a [u8]>,
        challenge: &[u8],
    ) -> AuthenticationOptions {
        AuthenticationOptions {
            challenge: crypto::encode(challenge),
            timeout: self.settings.timeout_millis(),
            rp_id: self.settings.rp_id.clone(),
            allow_credentials: credential_ids
                .into_iter()
                .map(|id| PublicKeyCredentialDescriptor::public_key(crypto::encode(id)))
                .collect(),
            user_verification: self.settings.user_verification.clone(),
        }
    }

    /// Verify a registration response against the issued challenge
    ///
    /// Checks, in order: credential type, client data type, challenge,
    /// origin, RP ID hash, flags, credential data and the attestation
    /// statement.
    ///
    /// # Errors
    /// Returns the `CeremonyFailure` of the first failing check
    pub fn finish_registration(
        &self,
        response: &RegistrationResponse,
        challenge: &[u8],
    ) -> Result<RegisteredCredential, CeremonyFailure> {
        check_credential_type(&response.r#type)?;
        let client_data_json = decode_field(&response.response.client_data_json, "clientDataJSON")?;
        let attestation_bytes =
            decode_field(&response.response.attestation_object, "attestationObject")?;
        let raw_id = decode_field(&response.raw_id, "rawId")?;

        attestation::verify_client_data(
            &client_data_json,
            TYPE_CREATE,
            challenge,
            &self.settings.rp_origin,
        )?;

        let attestation_object = cbor::parse_attestation_object(&attestation_bytes)?;
        let auth_data = AuthenticatorData::parse(&attestation_object.auth_data)?;
        self.verify_rp_id_hash(&auth_data)?;
        self.verify_user_flags(&auth_data)?;

        let Some(attested) = &auth_data.attested_credential else {
            return Err(CeremonyFailure::malformed("no attested credential data"));
        };
        if attested.credential_id != raw_id {
            return Err(CeremonyFailure::malformed(
                "credential ID does not match rawId",
            ));
        }
        let public_key = CosePublicKey::from_value(&attested.public_key)?;

        attestation::verify_attestation_statement(
            &attestation_object.format,
            &attestation_object.statement,
            &attestation_object.auth_data,
            &client_data_json,
            &public_key,
        )?;

        Ok(RegisteredCredential {
            credential_id: raw_id,
            public_key: public_key.to_bytes()?,
            algorithm: public_key.algorithm(),
            sign_count: auth_data.sign_count,
            attestation_format: attestation_object.format,
            user_verified: auth_data.user_verified(),
        })
    }

    /// Verify an authentication response for a known credential
    ///
    /// # Arguments
    /// * `response` - Assertion from the client
    /// * `challenge` - Issued challenge bytes
    /// * `public_key` - Decoded public key of the referenced credential
    /// * `stored_sign_count` - Stored signature counter
    ///
    /// # Errors
    /// Returns the `CeremonyFailure` of the first failing check
    pub fn finish_authentication(
        &self,
        response: &AuthenticationResponse,
        challenge: &[u8],
        public_key: &CosePublicKey,
        stored_sign_count: u32,
    ) -> Result<VerifiedAssertion, CeremonyFailure> {
        check_credential_type(&response.r#type)?;
        let client_data_json = decode_field(&response.response.client_data_json, "clientDataJSON")?;
        let auth_data_bytes =
            decode_field(&response.response.authenticator_data, "authenticatorData")?;
        let signature = decode_field(&response.response.signature, "signature")?;

        attestation::verify_client_data(
            &client_data_json,
            TYPE_GET,
            challenge,
            &self.settings.rp_origin,
        )?;

        let auth_data = AuthenticatorData::parse(&auth_data_bytes)?;
        self.verify_rp_id_hash(&auth_data)?;
        self.verify_user_flags(&auth_data)?;

        let signed = crypto::signed_data(&auth_data_bytes, &client_data_json);
        if !crypto::verify_signature(public_key, &signed, &signature) {
            return Err(CeremonyFailure::SignatureInvalid);
        }

        // Equal counters are allowed for authenticators that never increment.
        if auth_data.sign_count < stored_sign_count {
            return Err(CeremonyFailure::CounterRegression);
        }

        Ok(VerifiedAssertion {
            sign_count: auth_data.sign_count,
            user_verified: auth_data.user_verified(),
        })
    }

    fn verify_rp_id_hash(&self, auth_data: &AuthenticatorData) -> Result<(), CeremonyFailure> {
        if auth_data.rp_id_hash[..] == self.rp_id_hash[..] {
            Ok(())
        } else {
            Err(CeremonyFailure::RelyingPartyMismatch)
        }
    }

    fn verify_user_flags(&self, auth_data: &AuthenticatorData) -> Result<(), CeremonyFailure> {
        if !auth_data.user_present() {
            return Err(CeremonyFailure::malformed("user presence flag not set"));
        }
        if self.settings.user_verification_required() && !auth_data.user_verified() {
            return Err(CeremonyFailure::malformed("user verification required"));
        }
        Ok(())
    }
}

fn check_credential_type(credential_type: &str) -> Result<(), CeremonyFailure> {
    if credential_type == PUBLIC_KEY_TYPE {
        Ok(())
    } else {
        Err(CeremonyFailure::malformed(format!(
            "unsupported credential type {credential_type}"
        )))
    }
}

fn decode_field(value: &str, name: &str) -> Result<Vec<u8>, CeremonyFailure> {
    crypto::decode(value)
        .map_err(|_| CeremonyFailure::malformed(format!("invalid {name} encoding")))
}
