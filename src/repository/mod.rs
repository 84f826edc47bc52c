//! Credential record repository
//!
//! Durable mapping from user identity to account and registered credentials.
//! Ceremony logic only sees the [`CredentialRepository`] trait so the backend
//! can be swapped without touching it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::RepositoryError;

mod file;
mod memory;
mod models;

pub use file::FileCredentialRepository;
pub use memory::InMemoryCredentialRepository;
pub use models::{CredentialRecord, UserAccount};

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Storage backend for accounts and their credentials
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Look up an account
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read
    async fn find_account(&self, identity: &str) -> RepositoryResult<Option<UserAccount>>;

    /// Return the existing account, or create one with no credentials
    ///
    /// `user_handle` is only used when the account is created.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read or written
    async fn upsert_account(&self, identity: &str, user_handle: String)
        -> RepositoryResult<UserAccount>;

    /// Credentials registered for the identity (empty for unknown identities)
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read
    async fn list_credentials(&self, identity: &str) -> RepositoryResult<Vec<CredentialRecord>> {
        Ok(self
            .find_account(identity)
            .await?
            .map(|account| account.credentials)
            .unwrap_or_default())
    }

    /// Store a credential, replacing a record with the same credential ID
    ///
    /// # Errors
    /// Returns `AccountNotFound` if the identity has no account, or a backend error
    async fn put_credential(&self, identity: &str, record: CredentialRecord)
        -> RepositoryResult<()>;

    /// Record a successful use of a credential
    ///
    /// # Errors
    /// Returns `AccountNotFound` / `CredentialNotFound`, or a backend error
    async fn update_sign_count(
        &self,
        identity: &str,
        credential_id: &[u8],
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    /// Remove a credential, returning whether it existed
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written
    async fn delete_credential(&self, identity: &str, credential_id: &[u8])
        -> RepositoryResult<bool>;
}

/// Apply a sign count update to an account held by a backend
pub(crate) fn apply_sign_count(
    account: &mut UserAccount,
    credential_id: &[u8],
    sign_count: u32,
    used_at: DateTime<Utc>,
) -> RepositoryResult<()> {
    let identity = account.identity.clone();
    let record = account
        .credential_mut(credential_id)
        .ok_or(RepositoryError::CredentialNotFound(identity))?;
    record.sign_count = sign_count;
    record.last_used_at = Some(used_at);
    Ok(())
}
