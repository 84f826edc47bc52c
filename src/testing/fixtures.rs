//! Test fixtures providing pre-built test objects

use std::path::Path;
use std::sync::Arc;

use crate::ceremony::CredentialCeremonyManager;
use crate::repository::{FileCredentialRepository, InMemoryCredentialRepository};
use crate::settings::{AuthServerSettings, StorageBackend};
use crate::webauthn::WebAuthnSettings;

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Relying party settings matching the local development server
    #[must_use]
    pub fn webauthn_settings() -> WebAuthnSettings {
        WebAuthnSettings::default()
    }

    /// Server settings using a file store at `path`
    #[must_use]
    pub fn file_settings(path: &Path) -> AuthServerSettings {
        let mut settings = AuthServerSettings::default();
        settings.storage.backend = StorageBackend::File;
        settings.storage.path = path.display().to_string();
        settings
    }

    /// Manager backed by the in-memory repository
    #[must_use]
    pub fn manager() -> CredentialCeremonyManager {
        CredentialCeremonyManager::new(
            Self::webauthn_settings(),
            Arc::new(InMemoryCredentialRepository::new()),
        )
    }

    /// Manager backed by a file repository at `path`
    ///
    /// # Panics
    /// Panics if the store exists but cannot be loaded
    pub async fn file_manager(path: &Path) -> CredentialCeremonyManager {
        let repository = FileCredentialRepository::open(path)
            .await
            .expect("credential store opens");
        CredentialCeremonyManager::new(Self::webauthn_settings(), Arc::new(repository))
    }
}
