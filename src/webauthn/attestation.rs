//! `WebAuthn` client data and attestation verification
//!
//! Checks the browser-collected client data against the pending challenge and
//! the configured origin, and validates attestation statements returned at
//! registration.

use ciborium::value::Value;

use super::cbor::{as_int, text_member, CosePublicKey};
use super::crypto;
use super::types::CollectedClientData;
use crate::errors::CeremonyFailure;

/// Client data `type` for registration
pub const TYPE_CREATE: &str = "webauthn.create";
/// Client data `type` for authentication
pub const TYPE_GET: &str = "webauthn.get";

/// Verify client data JSON
///
/// # Arguments
/// * `client_data_json` - Decoded client data JSON bytes
/// * `expected_type` - `webauthn.create` or `webauthn.get`
/// * `expected_challenge` - Raw challenge bytes issued for this ceremony
/// * `expected_origin` - Exact origin (scheme, host and port)
///
/// # Errors
/// * `MalformedResponse` - not JSON, wrong ceremony type or a cross-origin call
/// * `ChallengeMismatch` - challenge differs from the issued one
/// * `OriginMismatch` - origin differs from the configured one
pub fn verify_client_data(
    client_data_json: &[u8],
    expected_type: &str,
    expected_challenge: &[u8],
    expected_origin: &str,
) -> Result<CollectedClientData, CeremonyFailure> {
    let client_data: CollectedClientData = serde_json::from_slice(client_data_json)
        .map_err(|_| CeremonyFailure::malformed("invalid client data JSON"))?;

    if client_data.r#type != expected_type {
        return Err(CeremonyFailure::malformed(format!(
            "invalid client data type, expected {expected_type}"
        )));
    }
    if client_data.cross_origin == Some(true) {
        return Err(CeremonyFailure::malformed(
            "cross-origin ceremonies are not accepted",
        ));
    }

    let challenge_matches = crypto::decode(&client_data.challenge)
        .is_ok_and(|challenge| challenge == expected_challenge);
    if !challenge_matches {
        return Err(CeremonyFailure::ChallengeMismatch);
    }

    if client_data.origin != expected_origin {
        return Err(CeremonyFailure::OriginMismatch);
    }

    Ok(client_data)
}

/// Validate an attestation statement
///
/// `packed` self attestation is verified cryptographically with the
/// credential key and must name that key's algorithm. Certificate-based
/// statements are checked for shape only: no trust anchors are configured, so
/// the certificate path is not evaluated.
///
/// # Errors
/// * `MalformedResponse` - unknown format or structurally invalid statement
/// * `SignatureInvalid` - self attestation signature does not verify
pub fn verify_attestation_statement(
    format: &str,
    statement: &[(Value, Value)],
    auth_data: &[u8],
    client_data_json: &[u8],
    credential_public_key: &CosePublicKey,
) -> Result<(), CeremonyFailure> {
    match format {
        "none" => {
            if statement.is_empty() {
                Ok(())
            } else {
                Err(CeremonyFailure::malformed(
                    "attestation format none must have an empty statement",
                ))
            }
        }
        "packed" => verify_packed(statement, auth_data, client_data_json, credential_public_key),
        "fido-u2f" => {
            signature_bytes(statement)?;
            let chain = certificate_chain(statement)?
                .ok_or_else(|| CeremonyFailure::malformed("fido-u2f attestation requires x5c"))?;
            if chain.len() == 1 {
                Ok(())
            } else {
                Err(CeremonyFailure::malformed(
                    "fido-u2f attestation requires exactly one certificate",
                ))
            }
        }
        // Statement is already known to be a map; the certificate path is not evaluated.
        "tpm" | "android-key" | "android-safetynet" | "apple" => Ok(()),
        other => Err(CeremonyFailure::malformed(format!(
            "unsupported attestation format {other}"
        ))),
    }
}

fn verify_packed(
    statement: &[(Value, Value)],
    auth_data: &[u8],
    client_data_json: &[u8],
    credential_public_key: &CosePublicKey,
) -> Result<(), CeremonyFailure> {
    let alg = text_member(statement, "alg").and_then(as_int);
    if alg.is_none() {
        return Err(CeremonyFailure::malformed("missing packed attestation algorithm"));
    }
    let signature = signature_bytes(statement)?;

    if certificate_chain(statement)?.is_some() {
        return Ok(());
    }

    // Self attestation signs with the credential key itself
    if alg != Some(i128::from(credential_public_key.algorithm())) {
        return Err(CeremonyFailure::malformed(
            "self attestation algorithm does not match the credential key",
        ));
    }

    let signed = crypto::signed_data(auth_data, client_data_json);
    if crypto::verify_signature(credential_public_key, &signed, signature) {
        Ok(())
    } else {
        Err(CeremonyFailure::SignatureInvalid)
    }
}

fn signature_bytes(statement: &[(Value, Value)]) -> Result<&[u8], CeremonyFailure> {
    text_member(statement, "sig")
        .and_then(Value::as_bytes)
        .filter(|sig| !sig.is_empty())
        .map(Vec::as_slice)
        .ok_or_else(|| CeremonyFailure::malformed("missing attestation signature"))
}

fn certificate_chain(
    statement: &[(Value, Value)],
) -> Result<Option<Vec<&[u8]>>, CeremonyFailure> {
    let Some(x5c) = text_member(statement, "x5c") else {
        return Ok(None);
    };
    let certificates = x5c
        .as_array()
        .filter(|chain| !chain.is_empty())
        .ok_or_else(|| CeremonyFailure::malformed("x5c must be a non-empty array"))?;

    certificates
        .iter()
        .map(|cert| {
            cert.as_bytes()
                .filter(|der| !der.is_empty())
                .map(Vec::as_slice)
                .ok_or_else(|| CeremonyFailure::malformed("x5c entries must be byte strings"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
