//! CBOR processing for `WebAuthn`
//!
//! Decodes the attestation object returned at registration and the COSE public
//! key embedded in attested credential data.

use ciborium::de::from_reader;
use ciborium::value::Value;

use super::types::{COSE_ALG_EDDSA, COSE_ALG_ES256, COSE_ALG_RS256};
use crate::errors::CeremonyFailure;

const COSE_KTY: i64 = 1;
const COSE_ALG: i64 = 3;
const COSE_KTY_OKP: i64 = 1;
const COSE_KTY_EC2: i64 = 2;
const COSE_KTY_RSA: i64 = 3;
// Key-type specific labels
const COSE_CRV: i64 = -1;
const COSE_X: i64 = -2;
const COSE_Y: i64 = -3;
const COSE_RSA_N: i64 = -1;
const COSE_RSA_E: i64 = -2;
const COSE_CRV_P256: i64 = 1;
const COSE_CRV_ED25519: i64 = 6;

/// Decoded attestation object (`fmt`, `attStmt`, `authData`)
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub format: String,
    pub statement: Vec<(Value, Value)>,
    pub auth_data: Vec<u8>,
}

/// Parse the CBOR attestation object
///
/// # Errors
/// Returns `MalformedResponse` if the bytes are not CBOR or a required
/// member is missing or has the wrong type.
pub fn parse_attestation_object(bytes: &[u8]) -> Result<AttestationObject, CeremonyFailure> {
    let value: Value = from_reader(bytes)
        .map_err(|_| CeremonyFailure::malformed("invalid CBOR attestation object"))?;
    let Some(map) = value.as_map() else {
        return Err(CeremonyFailure::malformed("attestation object is not a map"));
    };

    let format = text_member(map, "fmt")
        .and_then(Value::as_text)
        .ok_or_else(|| CeremonyFailure::malformed("missing fmt in attestation"))?
        .to_string();

    let statement = text_member(map, "attStmt")
        .and_then(Value::as_map)
        .ok_or_else(|| CeremonyFailure::malformed("missing attStmt in attestation"))?
        .clone();

    let auth_data = text_member(map, "authData")
        .and_then(Value::as_bytes)
        .ok_or_else(|| CeremonyFailure::malformed("missing authData in attestation"))?
        .clone();

    Ok(AttestationObject {
        format,
        statement,
        auth_data,
    })
}

/// Look up a text-keyed member of a CBOR map
pub fn text_member<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn int_member(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(i128::from(key)))
        .map(|(_, v)| v)
}

/// Read a CBOR integer as `i128`
pub fn as_int(value: &Value) -> Option<i128> {
    value.as_integer().map(i128::from)
}

fn int_value(value: i64) -> Value {
    Value::Integer(value.into())
}

/// A credential public key carried as a `COSE_Key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosePublicKey {
    /// ES256: uncompressed SEC1 P-256 point
    Es256(Vec<u8>),
    /// `EdDSA`: 32-byte Ed25519 public key
    EdDsa(Vec<u8>),
    /// RS256: big-endian modulus and public exponent
    Rs256 { n: Vec<u8>, e: Vec<u8> },
}

impl CosePublicKey {
    /// COSE algorithm identifier of this key
    #[must_use]
    pub fn algorithm(&self) -> i64 {
        match self {
            Self::Es256(_) => COSE_ALG_ES256,
            Self::EdDsa(_) => COSE_ALG_EDDSA,
            Self::Rs256 { .. } => COSE_ALG_RS256,
        }
    }

    /// Decode a `COSE_Key` map
    ///
    /// # Errors
    /// Returns `MalformedResponse` for key types, curves or algorithms other
    /// than ES256, `EdDSA` over Ed25519 and RS256.
    pub fn from_value(key: &Value) -> Result<Self, CeremonyFailure> {
        let Some(map) = key.as_map() else {
            return Err(CeremonyFailure::malformed("COSE key is not a map"));
        };
        let member = |label| {
            int_member(map, label)
                .and_then(as_int)
                .and_then(|value| i64::try_from(value).ok())
        };
        let bytes = |label, what: &str| {
            int_member(map, label)
                .and_then(Value::as_bytes)
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or_else(|| CeremonyFailure::malformed(format!("missing COSE {what}")))
        };

        match (member(COSE_KTY), member(COSE_ALG)) {
            (Some(COSE_KTY_EC2), Some(COSE_ALG_ES256)) => {
                if member(COSE_CRV) != Some(COSE_CRV_P256) {
                    return Err(CeremonyFailure::malformed("unsupported COSE curve"));
                }
                let x = bytes(COSE_X, "x coordinate")?;
                let y = bytes(COSE_Y, "y coordinate")?;
                if x.len() != 32 || y.len() != 32 {
                    return Err(CeremonyFailure::malformed("invalid P-256 coordinate"));
                }
                let mut point = Vec::with_capacity(65);
                point.push(0x04);
                point.extend_from_slice(&x);
                point.extend_from_slice(&y);
                Ok(Self::Es256(point))
            }
            (Some(COSE_KTY_OKP), Some(COSE_ALG_EDDSA)) => {
                if member(COSE_CRV) != Some(COSE_CRV_ED25519) {
                    return Err(CeremonyFailure::malformed("unsupported COSE curve"));
                }
                let x = bytes(COSE_X, "public key")?;
                if x.len() != 32 {
                    return Err(CeremonyFailure::malformed("invalid Ed25519 public key"));
                }
                Ok(Self::EdDsa(x))
            }
            (Some(COSE_KTY_RSA), Some(COSE_ALG_RS256)) => Ok(Self::Rs256 {
                n: bytes(COSE_RSA_N, "modulus")?,
                e: bytes(COSE_RSA_E, "exponent")?,
            }),
            (Some(COSE_KTY_OKP | COSE_KTY_EC2 | COSE_KTY_RSA), _) => {
                Err(CeremonyFailure::malformed("unsupported COSE algorithm"))
            }
            _ => Err(CeremonyFailure::malformed("unsupported COSE key type")),
        }
    }

    /// Decode an encoded `COSE_Key`
    ///
    /// # Errors
    /// Returns `MalformedResponse` if the bytes are not CBOR or not a supported key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CeremonyFailure> {
        let value: Value =
            from_reader(bytes).map_err(|_| CeremonyFailure::malformed("invalid COSE key"))?;
        Self::from_value(&value)
    }

    /// Encode as a `COSE_Key` CBOR map
    ///
    /// # Errors
    /// Returns an error if the key material has the wrong shape or CBOR
    /// encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CeremonyFailure> {
        let alg = (int_value(COSE_ALG), int_value(self.algorithm()));
        let map = match self {
            Self::Es256(point) => {
                if point.len() != 65 || point[0] != 0x04 {
                    return Err(CeremonyFailure::malformed("not an uncompressed P-256 point"));
                }
                vec![
                    (int_value(COSE_KTY), int_value(COSE_KTY_EC2)),
                    alg,
                    (int_value(COSE_CRV), int_value(COSE_CRV_P256)),
                    (int_value(COSE_X), Value::Bytes(point[1..33].to_vec())),
                    (int_value(COSE_Y), Value::Bytes(point[33..].to_vec())),
                ]
            }
            Self::EdDsa(x) => vec![
                (int_value(COSE_KTY), int_value(COSE_KTY_OKP)),
                alg,
                (int_value(COSE_CRV), int_value(COSE_CRV_ED25519)),
                (int_value(COSE_X), Value::Bytes(x.clone())),
            ],
            Self::Rs256 { n, e } => vec![
                (int_value(COSE_KTY), int_value(COSE_KTY_RSA)),
                alg,
                (int_value(COSE_RSA_N), Value::Bytes(n.clone())),
                (int_value(COSE_RSA_E), Value::Bytes(e.clone())),
            ],
        };

        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Map(map), &mut buf)
            .map_err(|_| CeremonyFailure::malformed("COSE key encoding failed"))?;
        Ok(buf)
    }
}
