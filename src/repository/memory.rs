//! In-memory repository backend

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    apply_sign_count, CredentialRecord, CredentialRepository, RepositoryResult, UserAccount,
};
use crate::errors::RepositoryError;

/// Process-lifetime account map
#[derive(Debug, Default)]
pub struct InMemoryCredentialRepository {
    accounts: RwLock<HashMap<String, UserAccount>>,
}

impl InMemoryCredentialRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn find_account(&self, identity: &str) -> RepositoryResult<Option<UserAccount>> {
        Ok(self
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned())
    }

    async fn upsert_account(
        &self,
        identity: &str,
        user_handle: String,
    ) -> RepositoryResult<UserAccount> {
        Ok(self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identity.to_string())
            .or_insert_with(|| UserAccount::new(identity, user_handle))
            .clone())
    }

    async fn put_credential(
        &self,
        identity: &str,
        record: CredentialRecord,
    ) -> RepositoryResult<()> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let account = accounts
            .get_mut(identity)
            .ok_or_else(|| RepositoryError::AccountNotFound(identity.to_string()))?;
        account.upsert_credential(record);
        Ok(())
    }

    async fn update_sign_count(
        &self,
        identity: &str,
        credential_id: &[u8],
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let account = accounts
            .get_mut(identity)
            .ok_or_else(|| RepositoryError::AccountNotFound(identity.to_string()))?;
        apply_sign_count(account, credential_id, sign_count, used_at)
    }

    async fn delete_credential(
        &self,
        identity: &str,
        credential_id: &[u8],
    ) -> RepositoryResult<bool> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        Ok(accounts
            .get_mut(identity)
            .is_some_and(|account| account.remove_credential(credential_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::COSE_ALG_ES256;

    fn record(id: &[u8]) -> CredentialRecord {
        CredentialRecord {
            credential_id: id.to_vec(),
            public_key: vec![0x04; 65],
            algorithm: COSE_ALG_ES256,
            sign_count: 0,
            attestation_format: "none".to_string(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_account_keeps_existing() {
        let repo = InMemoryCredentialRepository::new();
        let first = repo
            .upsert_account("reader@example.com", "first".to_string())
            .await
            .unwrap();
        let second = repo
            .upsert_account("reader@example.com", "second".to_string())
            .await
            .unwrap();

        assert_eq!(first.user_handle, "first");
        assert_eq!(second.user_handle, "first");
    }

    #[tokio::test]
    async fn test_put_credential_requires_account() {
        let repo = InMemoryCredentialRepository::new();
        let err = repo
            .put_credential("ghost@example.com", record(b"key"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_credential_lifecycle() {
        let repo = InMemoryCredentialRepository::new();
        repo.upsert_account("reader@example.com", "h".to_string())
            .await
            .unwrap();
        repo.put_credential("reader@example.com", record(b"key"))
            .await
            .unwrap();
        repo.put_credential("reader@example.com", record(b"key"))
            .await
            .unwrap();
        assert_eq!(
            repo.list_credentials("reader@example.com").await.unwrap().len(),
            1
        );

        let used_at = Utc::now();
        repo.update_sign_count("reader@example.com", b"key", 7, used_at)
            .await
            .unwrap();
        let stored = repo.list_credentials("reader@example.com").await.unwrap();
        assert_eq!(stored[0].sign_count, 7);
        assert_eq!(stored[0].last_used_at, Some(used_at));

        assert!(repo
            .delete_credential("reader@example.com", b"key")
            .await
            .unwrap());
        assert!(repo
            .list_credentials("reader@example.com")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_credential() {
        let repo = InMemoryCredentialRepository::new();
        repo.upsert_account("reader@example.com", "h".to_string())
            .await
            .unwrap();
        let err = repo
            .update_sign_count("reader@example.com", b"missing", 1, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CredentialNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_unknown_identity_is_empty() {
        let repo = InMemoryCredentialRepository::new();
        assert!(repo
            .list_credentials("nobody@example.com")
            .await
            .unwrap()
            .is_empty());
    }
}
