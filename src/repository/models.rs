//! Account and credential records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::webauthn::COSE_ALG_ES256;

/// A registered public-key credential
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    #[serde(with = "base64url")]
    pub credential_id: Vec<u8>, // Assigned by the authenticator
    #[serde(with = "base64url")]
    pub public_key: Vec<u8>, // Encoded COSE_Key
    #[serde(default = "default_algorithm")]
    pub algorithm: i64, // COSE algorithm identifier
    pub sign_count: u32,
    pub attestation_format: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

fn default_algorithm() -> i64 {
    COSE_ALG_ES256
}

/// A user and the credentials registered to them
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserAccount {
    pub identity: String,
    pub user_handle: String, // Base64URL-encoded WebAuthn user.id
    pub credentials: Vec<CredentialRecord>,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    #[must_use]
    pub fn new(identity: &str, user_handle: String) -> Self {
        Self {
            identity: identity.to_string(),
            user_handle,
            credentials: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn credential(&self, credential_id: &[u8]) -> Option<&CredentialRecord> {
        self.credentials
            .iter()
            .find(|c| c.credential_id == credential_id)
    }

    pub(crate) fn credential_mut(&mut self, credential_id: &[u8]) -> Option<&mut CredentialRecord> {
        self.credentials
            .iter_mut()
            .find(|c| c.credential_id == credential_id)
    }

    /// Insert a credential, replacing any record with the same credential ID
    pub(crate) fn upsert_credential(&mut self, record: CredentialRecord) {
        match self.credential_mut(&record.credential_id) {
            Some(existing) => *existing = record,
            None => self.credentials.push(record),
        }
    }

    /// Remove a credential, returning whether it existed
    pub(crate) fn remove_credential(&mut self, credential_id: &[u8]) -> bool {
        let before = self.credentials.len();
        self.credentials.retain(|c| c.credential_id != credential_id);
        self.credentials.len() != before
    }
}

mod base64url {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
