//! JSON file repository backend
//!
//! The whole document is loaded at open and rewritten after every mutation
//! (temp file + rename, so a crash never leaves a half-written store).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{
    apply_sign_count, CredentialRecord, CredentialRepository, RepositoryResult, UserAccount,
};
use crate::errors::RepositoryError;

#[derive(Serialize, Deserialize, Default, Debug)]
struct CredentialDocument {
    accounts: BTreeMap<String, UserAccount>,
}

/// File-backed repository
#[derive(Debug)]
pub struct FileCredentialRepository {
    path: PathBuf,
    document: Mutex<CredentialDocument>,
}

impl FileCredentialRepository {
    /// Open the store at `path`, starting empty if the file does not exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub async fn open(path: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Credential store {} not found, starting empty", path.display());
                CredentialDocument::default()
            }
            Err(e) => return Err(e.into()),
        };
        log::info!(
            "Loaded {} account(s) from {}",
            document.accounts.len(),
            path.display()
        );

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &CredentialDocument) -> RepositoryResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for FileCredentialRepository {
    async fn find_account(&self, identity: &str) -> RepositoryResult<Option<UserAccount>> {
        Ok(self.document.lock().await.accounts.get(identity).cloned())
    }

    async fn upsert_account(
        &self,
        identity: &str,
        user_handle: String,
    ) -> RepositoryResult<UserAccount> {
        let mut document = self.document.lock().await;
        if let Some(account) = document.accounts.get(identity) {
            return Ok(account.clone());
        }

        let account = UserAccount::new(identity, user_handle);
        document
            .accounts
            .insert(identity.to_string(), account.clone());
        if let Err(e) = self.persist(&document).await {
            document.accounts.remove(identity);
            return Err(e);
        }
        Ok(account)
    }

    async fn put_credential(
        &self,
        identity: &str,
        record: CredentialRecord,
    ) -> RepositoryResult<()> {
        let mut document = self.document.lock().await;
        let account = document
            .accounts
            .get_mut(identity)
            .ok_or_else(|| RepositoryError::AccountNotFound(identity.to_string()))?;
        let previous = account.clone();
        account.upsert_credential(record);

        if let Err(e) = self.persist(&document).await {
            document.accounts.insert(identity.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn update_sign_count(
        &self,
        identity: &str,
        credential_id: &[u8],
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let mut document = self.document.lock().await;
        let account = document
            .accounts
            .get_mut(identity)
            .ok_or_else(|| RepositoryError::AccountNotFound(identity.to_string()))?;
        let previous = account.clone();
        apply_sign_count(account, credential_id, sign_count, used_at)?;

        if let Err(e) = self.persist(&document).await {
            document.accounts.insert(identity.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn delete_credential(
        &self,
        identity: &str,
        credential_id: &[u8],
    ) -> RepositoryResult<bool> {
        let mut document = self.document.lock().await;
        let Some(account) = document.accounts.get_mut(identity) else {
            return Ok(false);
        };
        let previous = account.clone();
        if !account.remove_credential(credential_id) {
            return Ok(false);
        }

        if let Err(e) = self.persist(&document).await {
            document.accounts.insert(identity.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }
}
