//! Authenticator data parsing
//!
//! Layout:
//! - 32 bytes: RP ID hash
//! - 1 byte: flags
//! - 4 bytes: signature counter (big endian)
//! - variable: attested credential data (if the AT flag is set)
//!   - 16 bytes: AAGUID
//!   - 2 bytes: credential ID length (L)
//!   - L bytes: credential ID
//!   - variable: COSE public key
//! - variable: extensions (if the ED flag is set)

use std::io::Cursor;

use ciborium::de::from_reader;
use ciborium::value::Value;

use crate::errors::CeremonyFailure;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

/// Credential data present in registration authenticator data
#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    pub public_key: Value,
}

/// Parsed authenticator data
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    /// Parse raw authenticator data bytes
    ///
    /// # Errors
    /// Returns `MalformedResponse` when the data is truncated or the attested
    /// credential data is not valid.
    pub fn parse(bytes: &[u8]) -> Result<Self, CeremonyFailure> {
        if bytes.len() < HEADER_LEN {
            return Err(CeremonyFailure::malformed("authenticator data too short"));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
        let flags = bytes[RP_ID_HASH_LEN];
        let sign_count = u32::from_be_bytes([
            bytes[RP_ID_HASH_LEN + 1],
            bytes[RP_ID_HASH_LEN + 2],
            bytes[RP_ID_HASH_LEN + 3],
            bytes[RP_ID_HASH_LEN + 4],
        ]);

        let attested_credential = if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
            None
        } else {
            Some(Self::parse_attested_credential(&bytes[HEADER_LEN..])?)
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    fn parse_attested_credential(bytes: &[u8]) -> Result<AttestedCredentialData, CeremonyFailure> {
        if bytes.len() < AAGUID_LEN + 2 {
            return Err(CeremonyFailure::malformed(
                "authenticator data too short for credential ID length",
            ));
        }

        let mut aaguid = [0u8; AAGUID_LEN];
        aaguid.copy_from_slice(&bytes[..AAGUID_LEN]);

        let id_len = usize::from(u16::from_be_bytes([bytes[AAGUID_LEN], bytes[AAGUID_LEN + 1]]));
        let id_start = AAGUID_LEN + 2;
        let key_start = id_start + id_len;
        if id_len == 0 || bytes.len() <= key_start {
            return Err(CeremonyFailure::malformed(
                "authenticator data too short for public key",
            ));
        }
        let credential_id = bytes[id_start..key_start].to_vec();

        // The COSE key may be followed by extension data, so decode exactly one item.
        let mut cursor = Cursor::new(&bytes[key_start..]);
        let public_key: Value = from_reader(&mut cursor)
            .map_err(|_| CeremonyFailure::malformed("invalid COSE public key"))?;

        Ok(AttestedCredentialData {
            aaguid,
            credential_id,
            public_key,
        })
    }

    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }
}
