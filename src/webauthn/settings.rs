//! `WebAuthn` settings implementation
//!
//! This module defines the relying-party configuration for ceremonies. The
//! expected origin and RP ID are deployment configuration, never taken from
//! requests.

use serde::{Deserialize, Serialize};
use url::Url;

const USER_VERIFICATION_VALUES: &[&str] = &["required", "preferred", "discouraged"];
const ATTESTATION_VALUES: &[&str] = &["none", "indirect", "direct", "enterprise"];
const ATTACHMENT_VALUES: &[&str] = &["platform", "cross-platform"];

/// `WebAuthn` settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAuthnSettings {
    /// Relying Party ID (usually the domain)
    pub rp_id: String,
    /// Relying Party name (displayed to user)
    pub rp_name: String,
    /// Relying Party origin (e.g., <http://localhost:3000>)
    pub rp_origin: String,
    /// How long an issued challenge stays valid, in seconds
    pub timeout_seconds: u64,
    /// Interval of the expired-challenge sweeper, in seconds (0 disables it)
    pub challenge_sweep_seconds: u64,
    /// User verification preference ("required", "preferred", "discouraged")
    pub user_verification: String,
    /// Attestation conveyance preference ("none", "indirect", "direct", "enterprise")
    pub attestation: String,
    /// Optional authenticator attachment ("platform", "cross-platform")
    pub authenticator_attachment: Option<String>,
}

impl Default for WebAuthnSettings {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "Book Worm".to_string(),
            rp_origin: "http://localhost:3000".to_string(),
            timeout_seconds: 60,
            challenge_sweep_seconds: 30,
            user_verification: "preferred".to_string(),
            attestation: "direct".to_string(),
            authenticator_attachment: None,
        }
    }
}

impl WebAuthnSettings {
    /// Check that the relying party configuration is coherent
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The origin is not an absolute http(s) URL without a path
    /// - The origin is not written the way browsers serialize it
    /// - The RP ID is neither the origin host nor a parent domain of it
    /// - The timeout is zero
    /// - A preference is outside its `WebAuthn` value set
    pub fn validate(&self) -> anyhow::Result<()> {
        let origin = Url::parse(&self.rp_origin)
            .map_err(|e| anyhow::anyhow!("Invalid rp_origin {}: {e}", self.rp_origin))?;

        if !matches!(origin.scheme(), "http" | "https") {
            anyhow::bail!("rp_origin must use http or https: {}", self.rp_origin);
        }
        if origin.path() != "/" || origin.query().is_some() || origin.fragment().is_some() {
            anyhow::bail!("rp_origin must not contain a path: {}", self.rp_origin);
        }
        // Browsers report the serialized origin: lowercase host, no default port, no slash
        let serialized = origin.origin().ascii_serialization();
        if serialized != self.rp_origin {
            anyhow::bail!(
                "rp_origin {} is not in browser form, use {serialized}",
                self.rp_origin
            );
        }

        let host = origin
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("rp_origin has no host: {}", self.rp_origin))?;
        let rp_id = self.rp_id.to_ascii_lowercase();
        if rp_id.is_empty() || !(host == rp_id || host.ends_with(&format!(".{rp_id}"))) {
            anyhow::bail!(
                "rp_id {} is not a registrable suffix of origin host {host}",
                self.rp_id
            );
        }

        if self.timeout_seconds == 0 {
            anyhow::bail!("timeout_seconds must be greater than zero");
        }
        check_one_of("user_verification", &self.user_verification, USER_VERIFICATION_VALUES)?;
        check_one_of("attestation", &self.attestation, ATTESTATION_VALUES)?;
        if let Some(attachment) = &self.authenticator_attachment {
            check_one_of("authenticator_attachment", attachment, ATTACHMENT_VALUES)?;
        }

        Ok(())
    }

    /// Whether responses without the user-verified flag are rejected
    #[must_use]
    pub fn user_verification_required(&self) -> bool {
        self.user_verification == "required"
    }

    /// Challenge lifetime in milliseconds, as advertised to the client
    #[must_use]
    pub fn timeout_millis(&self) -> u32 {
        u32::try_from(self.timeout_seconds.saturating_mul(1000)).unwrap_or(u32::MAX)
    }
}

fn check_one_of(name: &str, value: &str, allowed: &[&str]) -> anyhow::Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        anyhow::bail!("{name} must be one of {allowed:?}, got {value}")
    }
}
