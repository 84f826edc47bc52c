//! `WebAuthn` cryptography operations
//!
//! Challenge and user handle generation, SHA-256 and credential signature
//! verification (ES256, `EdDSA`, RS256), all on top of `ring`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest;
use ring::error::Unspecified;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{
    RsaPublicKeyComponents, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1, ED25519,
    RSA_PKCS1_2048_8192_SHA256,
};

use super::cbor::CosePublicKey;

/// Challenge length in bytes (256 bits)
pub const CHALLENGE_LEN: usize = 32;

/// User handle length in bytes
pub const USER_HANDLE_LEN: usize = 16;

/// Generate a secure random challenge
///
/// # Errors
/// Returns an error if the system random source fails
pub fn generate_challenge() -> Result<Vec<u8>, Unspecified> {
    random_bytes(CHALLENGE_LEN)
}

/// Generate a user handle
///
/// # Returns
/// A base64url user handle that does not reveal the user's identity
///
/// # Errors
/// Returns an error if the system random source fails
pub fn generate_user_handle() -> Result<String, Unspecified> {
    Ok(encode(random_bytes(USER_HANDLE_LEN)?))
}

fn random_bytes(len: usize) -> Result<Vec<u8>, Unspecified> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new().fill(&mut bytes)?;
    Ok(bytes)
}

/// Hash data using SHA-256
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

/// Verify a credential signature with the algorithm of its key
///
/// ES256 signatures are ASN.1 DER encoded, `EdDSA` signatures are the raw
/// 64 bytes and RS256 signatures are PKCS#1 v1.5 over SHA-256.
#[must_use]
pub fn verify_signature(public_key: &CosePublicKey, data: &[u8], signature: &[u8]) -> bool {
    match public_key {
        CosePublicKey::Es256(point) => UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, point)
            .verify(data, signature)
            .is_ok(),
        CosePublicKey::EdDsa(key) => UnparsedPublicKey::new(&ED25519, key)
            .verify(data, signature)
            .is_ok(),
        CosePublicKey::Rs256 { n, e } => RsaPublicKeyComponents {
            n: strip_leading_zeros(n),
            e: strip_leading_zeros(e),
        }
        .verify(&RSA_PKCS1_2048_8192_SHA256, data, signature)
        .is_ok(),
    }
}

// ring rejects RSA integers with leading zero bytes
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// The bytes covered by an assertion or self-attestation signature
#[must_use]
pub fn signed_data(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(authenticator_data.len() + digest::SHA256_OUTPUT_LEN);
    data.extend_from_slice(authenticator_data);
    data.extend_from_slice(&sha256(client_data_json));
    data
}

/// Base64url encode without padding
#[must_use]
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base64url decode, tolerating trailing padding
///
/// # Errors
/// Returns an error if the input is not valid base64url
pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::authenticator::RSA_TEST_KEY_PKCS8;
    use ring::signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
        RSA_PKCS1_SHA256,
    };

    fn es256_key_pair() -> EcdsaKeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng).unwrap()
    }

    fn message() -> Vec<u8> {
        signed_data(b"authenticator-data", b"{\"type\":\"webauthn.get\"}")
    }

    #[test]
    fn test_challenges_are_unique() {
        let first = generate_challenge().unwrap();
        let second = generate_challenge().unwrap();
        assert_eq!(first.len(), CHALLENGE_LEN);
        assert_ne!(first, second);
    }

    #[test]
    fn test_user_handle_is_base64url() {
        let handle = generate_user_handle().unwrap();
        assert_eq!(decode(&handle).unwrap().len(), USER_HANDLE_LEN);
    }

    #[test]
    fn test_es256_verification() {
        let rng = SystemRandom::new();
        let key = es256_key_pair();
        let public_key = CosePublicKey::Es256(key.public_key().as_ref().to_vec());
        let message = message();
        let signature = key.sign(&rng, &message).unwrap();

        assert!(verify_signature(&public_key, &message, signature.as_ref()));
        assert!(!verify_signature(
            &public_key,
            b"other message",
            signature.as_ref()
        ));

        let other = CosePublicKey::Es256(es256_key_pair().public_key().as_ref().to_vec());
        assert!(!verify_signature(&other, &message, signature.as_ref()));
    }

    #[test]
    fn test_eddsa_verification() {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        let key = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let public_key = CosePublicKey::EdDsa(key.public_key().as_ref().to_vec());
        let message = message();
        let signature = key.sign(&message);

        assert!(verify_signature(&public_key, &message, signature.as_ref()));
        assert!(!verify_signature(
            &public_key,
            b"other message",
            signature.as_ref()
        ));
    }

    #[test]
    fn test_rs256_verification_tolerates_padded_modulus() {
        let key = RsaKeyPair::from_pkcs8(RSA_TEST_KEY_PKCS8).unwrap();
        let components: RsaPublicKeyComponents<Vec<u8>> = key.public().into();
        let message = message();
        let mut signature = vec![0u8; key.public().modulus_len()];
        key.sign(&RSA_PKCS1_SHA256, &SystemRandom::new(), &message, &mut signature)
            .unwrap();

        // COSE encoders commonly keep the sign byte in front of the modulus
        let mut padded_n = vec![0u8];
        padded_n.extend_from_slice(&components.n);
        let public_key = CosePublicKey::Rs256 {
            n: padded_n,
            e: components.e.clone(),
        };
        assert!(verify_signature(&public_key, &message, &signature));

        signature[0] ^= 0x01;
        assert!(!verify_signature(&public_key, &message, &signature));
    }

    #[test]
    fn test_decode_accepts_padding() {
        assert_eq!(decode("YQ==").unwrap(), b"a");
        assert_eq!(decode("YQ").unwrap(), b"a");
        assert!(decode("not base64!").is_err());
    }
}
