//! Software authenticator
//!
//! Produces real signed registration and authentication responses so the
//! ceremony code can be exercised end to end without a browser.

use ciborium::value::Value;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, RsaPublicKeyComponents,
    ECDSA_P256_SHA256_ASN1_SIGNING, RSA_PKCS1_SHA256,
};

use crate::webauthn::attestation::{TYPE_CREATE, TYPE_GET};
use crate::webauthn::authenticator_data::{
    FLAG_ATTESTED_CREDENTIAL_DATA, FLAG_USER_PRESENT, FLAG_USER_VERIFIED,
};
use crate::webauthn::{
    crypto, AuthenticationOptions, AuthenticationResponse, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, CollectedClientData, CosePublicKey, RegistrationOptions,
    RegistrationResponse, WebAuthnSettings, PUBLIC_KEY_TYPE,
};

/// Fixed 2048-bit RSA key; `ring` can load RSA keys but not generate them
pub const RSA_TEST_KEY_PKCS8: &[u8] = include_bytes!("rsa-2048-test-key.pk8");

/// Attestation statement the authenticator returns at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationMode {
    None,
    PackedSelf,
}

/// Credential algorithm of the authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Es256,
    EdDsa,
    /// Always uses [`RSA_TEST_KEY_PKCS8`]
    Rs256,
}

enum SigningKey {
    Es256(EcdsaKeyPair),
    EdDsa(Ed25519KeyPair),
    Rs256(RsaKeyPair),
}

impl SigningKey {
    fn generate(algorithm: KeyAlgorithm, rng: &SystemRandom) -> Self {
        match algorithm {
            KeyAlgorithm::Es256 => {
                let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, rng)
                    .expect("key generation");
                Self::Es256(
                    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), rng)
                        .expect("generated key is valid PKCS#8"),
                )
            }
            KeyAlgorithm::EdDsa => {
                let pkcs8 = Ed25519KeyPair::generate_pkcs8(rng).expect("key generation");
                Self::EdDsa(
                    Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                        .expect("generated key is valid PKCS#8"),
                )
            }
            KeyAlgorithm::Rs256 => Self::Rs256(
                RsaKeyPair::from_pkcs8(RSA_TEST_KEY_PKCS8).expect("RSA test key is valid PKCS#8"),
            ),
        }
    }

    fn public_key(&self) -> CosePublicKey {
        match self {
            Self::Es256(key) => CosePublicKey::Es256(key.public_key().as_ref().to_vec()),
            Self::EdDsa(key) => CosePublicKey::EdDsa(key.public_key().as_ref().to_vec()),
            Self::Rs256(key) => {
                let components: RsaPublicKeyComponents<Vec<u8>> = key.public().into();
                CosePublicKey::Rs256 {
                    n: components.n,
                    e: components.e,
                }
            }
        }
    }

    fn sign(&self, rng: &SystemRandom, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Es256(key) => key.sign(rng, message).expect("signing").as_ref().to_vec(),
            Self::EdDsa(key) => key.sign(message).as_ref().to_vec(),
            Self::Rs256(key) => {
                let mut signature = vec![0u8; key.public().modulus_len()];
                key.sign(&RSA_PKCS1_SHA256, rng, message, &mut signature)
                    .expect("signing");
                signature
            }
        }
    }
}

/// A platform authenticator held entirely in memory (ES256 unless changed)
pub struct SoftAuthenticator {
    /// RP ID hashed into authenticator data
    pub rp_id: String,
    /// Origin written into client data
    pub origin: String,
    /// Current signature counter
    pub sign_count: u32,
    /// Added to the counter before every assertion (0 never increments)
    pub counter_step: u32,
    pub attestation: AttestationMode,
    pub user_verified: bool,
    credential_id: Vec<u8>,
    key: SigningKey,
    user_handle: Option<String>,
    rng: SystemRandom,
}

impl SoftAuthenticator {
    /// Create an authenticator with a fresh ES256 key pair and credential ID
    ///
    /// # Panics
    /// Panics if the system random source fails
    #[must_use]
    pub fn new(rp_id: &str, origin: &str) -> Self {
        let rng = SystemRandom::new();
        let key = SigningKey::generate(KeyAlgorithm::Es256, &rng);
        let mut credential_id = vec![0u8; 16];
        rng.fill(&mut credential_id).expect("random credential ID");

        Self {
            rp_id: rp_id.to_string(),
            origin: origin.to_string(),
            sign_count: 0,
            counter_step: 1,
            attestation: AttestationMode::None,
            user_verified: true,
            credential_id,
            key,
            user_handle: None,
            rng,
        }
    }

    /// Create an authenticator matching the relying party settings
    #[must_use]
    pub fn for_relying_party(settings: &WebAuthnSettings) -> Self {
        Self::new(&settings.rp_id, &settings.rp_origin)
    }

    #[must_use]
    pub fn with_attestation(mut self, attestation: AttestationMode) -> Self {
        self.attestation = attestation;
        self
    }

    /// Replace the credential key with a fresh one of another algorithm
    #[must_use]
    pub fn with_key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.key = SigningKey::generate(algorithm, &self.rng);
        self
    }

    #[must_use]
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    #[must_use]
    pub fn cose_key(&self) -> CosePublicKey {
        self.key.public_key()
    }

    /// Encoded `COSE_Key`, as stored in the credential record
    ///
    /// # Panics
    /// Panics if the key cannot be encoded
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.cose_key().to_bytes().expect("COSE key encodes")
    }

    /// Answer `navigator.credentials.create()`
    ///
    /// # Panics
    /// Panics if signing or CBOR encoding fails
    pub fn register(&mut self, options: &RegistrationOptions) -> RegistrationResponse {
        self.user_handle = Some(options.user.id.clone());

        let client_data_json = self.client_data(TYPE_CREATE, &options.challenge);
        let auth_data = self.authenticator_data(true);

        let statement = match self.attestation {
            AttestationMode::None => Vec::new(),
            AttestationMode::PackedSelf => vec![
                (
                    Value::Text("alg".into()),
                    Value::Integer(self.cose_key().algorithm().into()),
                ),
                (
                    Value::Text("sig".into()),
                    Value::Bytes(self.sign(&auth_data, &client_data_json)),
                ),
            ],
        };
        let format = match self.attestation {
            AttestationMode::None => "none",
            AttestationMode::PackedSelf => "packed",
        };
        let attestation_object = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(format.into())),
            (Value::Text("attStmt".into()), Value::Map(statement)),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_bytes = Vec::new();
        ciborium::into_writer(&attestation_object, &mut attestation_bytes)
            .expect("attestation object encodes");

        RegistrationResponse {
            id: crypto::encode(&self.credential_id),
            raw_id: crypto::encode(&self.credential_id),
            response: AuthenticatorAttestationResponse {
                client_data_json: crypto::encode(&client_data_json),
                attestation_object: crypto::encode(&attestation_bytes),
            },
            client_extension_results: None,
            r#type: PUBLIC_KEY_TYPE.to_string(),
        }
    }

    /// Answer `navigator.credentials.get()`, advancing the counter first
    pub fn authenticate(&mut self, options: &AuthenticationOptions) -> AuthenticationResponse {
        self.sign_count = self.sign_count.wrapping_add(self.counter_step);

        let client_data_json = self.client_data(TYPE_GET, &options.challenge);
        let auth_data = self.authenticator_data(false);
        let signature = self.sign(&auth_data, &client_data_json);

        AuthenticationResponse {
            id: crypto::encode(&self.credential_id),
            raw_id: crypto::encode(&self.credential_id),
            response: AuthenticatorAssertionResponse {
                client_data_json: crypto::encode(&client_data_json),
                authenticator_data: crypto::encode(&auth_data),
                signature: crypto::encode(&signature),
                user_handle: self.user_handle.clone(),
            },
            client_extension_results: None,
            r#type: PUBLIC_KEY_TYPE.to_string(),
        }
    }

    fn client_data(&self, kind: &str, challenge: &str) -> Vec<u8> {
        serde_json::to_vec(&CollectedClientData {
            r#type: kind.to_string(),
            challenge: challenge.to_string(),
            origin: self.origin.clone(),
            cross_origin: Some(false),
        })
        .expect("client data serializes")
    }

    fn authenticator_data(&self, with_credential: bool) -> Vec<u8> {
        let mut flags = FLAG_USER_PRESENT;
        if self.user_verified {
            flags |= FLAG_USER_VERIFIED;
        }
        if with_credential {
            flags |= FLAG_ATTESTED_CREDENTIAL_DATA;
        }

        let mut data = crypto::sha256(self.rp_id.as_bytes());
        data.push(flags);
        data.extend_from_slice(&self.sign_count.to_be_bytes());
        if with_credential {
            data.extend_from_slice(&[0u8; 16]); // AAGUID
            let id_len = u16::try_from(self.credential_id.len()).expect("short credential ID");
            data.extend_from_slice(&id_len.to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            data.extend(self.public_key());
        }
        data
    }

    fn sign(&self, auth_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
        self.key
            .sign(&self.rng, &crypto::signed_data(auth_data, client_data_json))
    }
}

/// Flip the last byte of a base64url field
///
/// # Panics
/// Panics if the field is not valid base64url or is empty
#[must_use]
pub fn tamper(encoded: &str) -> String {
    let mut bytes = crypto::decode(encoded).expect("base64url field");
    let last = bytes.last_mut().expect("non-empty field");
    *last ^= 0x01;
    crypto::encode(&bytes)
}
