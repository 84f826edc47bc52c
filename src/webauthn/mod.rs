//! `WebAuthn` implementation
//!
//! This module provides core `WebAuthn` functionality independent of challenge
//! bookkeeping and credential storage. It implements the parts of W3C Web
//! Authentication Level 2 the ceremony server needs (ES256, `EdDSA` and RS256
//! credentials) using `ring` and `ciborium`.

pub mod attestation;
pub mod authenticator_data;
pub mod cbor;
pub mod crypto;
mod service;
mod settings;
mod types;

// Re-exports for public use
pub use cbor::CosePublicKey;
pub use service::{RegisteredCredential, VerifiedAssertion, WebAuthnService};
pub use settings::WebAuthnSettings;
pub use types::*;
