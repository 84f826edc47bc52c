//! `WebAuthn` wire types
//!
//! JSON shapes exchanged with the browser-side `WebAuthn` API, in the standard
//! JSON serialization (binary values are base64url without padding).

use serde::{Deserialize, Serialize};

/// The only credential type `WebAuthn` defines
pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// COSE algorithm identifier for ES256 (ECDSA P-256 with SHA-256)
pub const COSE_ALG_ES256: i64 = -7;

/// COSE algorithm identifier for `EdDSA` (Ed25519)
pub const COSE_ALG_EDDSA: i64 = -8;

/// COSE algorithm identifier for RS256 (RSASSA-PKCS1-v1_5 with SHA-256)
pub const COSE_ALG_RS256: i64 = -257;

/// Credential algorithms offered at registration, most preferred first
pub const SUPPORTED_ALGORITHMS: [i64; 3] = [COSE_ALG_EDDSA, COSE_ALG_ES256, COSE_ALG_RS256];

/// `WebAuthn` registration options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,  // Relying party information
    pub user: UserEntity,  // User information
    #[serde(rename = "pubKeyCredParams")]
    pub public_key_params: Vec<PublicKeyCredentialParameters>, // Allowed algorithms
    pub timeout: u32,      // Timeout in milliseconds
    pub attestation: String, // "none", "indirect", "direct"
    #[serde(rename = "excludeCredentials")]
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(rename = "authenticatorSelection")]
    pub authenticator_selection: AuthenticatorSelectionCriteria,
}

/// `WebAuthn` authentication options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub timeout: u32,      // Timeout in milliseconds
    #[serde(rename = "rpId")]
    pub rp_id: String, // Relying party ID
    #[serde(rename = "allowCredentials")]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(rename = "userVerification")]
    pub user_verification: String, // "required", "preferred", "discouraged"
}

/// `WebAuthn` relying party information
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingParty {
    pub id: String,   // Domain name (e.g., "example.com")
    pub name: String, // Display name
}

/// `WebAuthn` user entity
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserEntity {
    pub id: String,   // Base64URL-encoded user handle
    pub name: String, // Username (e.g., email)
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Public key credential parameters
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub r#type: String,
    pub alg: i64,
}

/// Authenticator selection criteria
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorSelectionCriteria {
    #[serde(
        rename = "authenticatorAttachment",
        skip_serializing_if = "Option::is_none"
    )]
    pub authenticator_attachment: Option<String>, // "platform", "cross-platform"
    #[serde(rename = "requireResidentKey")]
    pub require_resident_key: bool,
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

/// Public key credential descriptor
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub r#type: String,
    pub id: String, // Base64URL-encoded credential ID
}

impl PublicKeyCredentialDescriptor {
    #[must_use]
    pub fn public_key(id: String) -> Self {
        Self {
            r#type: PUBLIC_KEY_TYPE.to_string(),
            id,
        }
    }
}

/// Registration response from client (`navigator.credentials.create`)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,     // Base64URL-encoded credential ID
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAttestationResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_extension_results: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Authentication response from client (`navigator.credentials.get`)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub id: String,
    pub raw_id: String,
    pub response: AuthenticatorAssertionResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_extension_results: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Authenticator attestation response during registration
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
}

/// Authenticator assertion response during authentication
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    pub signature: String,
    #[serde(
        rename = "userHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub user_handle: Option<String>,
}

/// Client data collected by the browser and hashed into the signature
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub r#type: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<bool>,
}
