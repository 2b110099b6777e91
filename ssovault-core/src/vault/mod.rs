//! Credential vault - owns SSO entries and their encrypted secrets
//!
//! The vault is the only component that calls the [`SecretCipher`]. Entries
//! handed to callers never include the secret; the sealed blob only exists in
//! the stored record.

mod model;
mod validation;

pub use model::{EntryMetadata, EntryStatus, MetadataPatch, Provider, VaultEntry};

use crate::{
    audit::{AuditEvent, AuditEventKind, AuditLog},
    crypto::{CipherError, EncryptedSecret, KeyContext, KeyRing, SecretCipher, SecretString},
    store::{self, NewRecord, RecordStore, StoreError, VAULT_ENTRIES},
    ErrorKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument};
use uuid::Uuid;

/// Page size used when the vault drains an owner listing
const LIST_PAGE_SIZE: usize = 256;

/// Errors returned by vault operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Vault entry not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::VaultNotFound,
            Self::ValidationFailed(_) => ErrorKind::VaultValidationFailed,
            Self::Conflict(_) => ErrorKind::VaultConflict,
            Self::Unavailable(_) => ErrorKind::VaultUnavailable,
            Self::Cipher(e) => e.kind(),
        }
    }
}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => VaultError::NotFound(id),
            StoreError::Conflict(id) => VaultError::Conflict(format!("entry {} already exists", id)),
            other => VaultError::Unavailable(other.to_string()),
        }
    }
}

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Persisted form of an entry: public fields plus the sealed secret
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    #[serde(flatten)]
    entry: VaultEntry,
    secret: EncryptedSecret,
}

/// Per-entry write locks, keyed by `(owner, entry)`
///
/// Every read-modify-write of a stored entry runs under its lock, so a
/// rotation is never overwritten by a write that loaded the old ciphertext.
#[derive(Default)]
struct EntryLocks {
    locks: Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

impl EntryLocks {
    async fn acquire(&self, owner_id: &str, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // Drop locks nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((owner_id.to_string(), id.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Vault service over a record store
pub struct Vault {
    store: Arc<dyn RecordStore>,
    cipher: SecretCipher,
    audit: AuditLog,
    locks: EntryLocks,
}

impl Vault {
    pub fn new(store: Arc<dyn RecordStore>, keyring: Arc<KeyRing>, audit: AuditLog) -> Self {
        Self {
            store,
            cipher: SecretCipher::new(keyring),
            audit,
            locks: EntryLocks::default(),
        }
    }

    pub fn keyring(&self) -> &Arc<KeyRing> {
        self.cipher.keyring()
    }

    /// Create a new entry and seal its secret
    #[instrument(skip_all, fields(owner_id = %owner_id))]
    pub async fn create(
        &self,
        owner_id: &str,
        metadata: EntryMetadata,
        secret: SecretString,
    ) -> Result<VaultEntry> {
        let metadata = validation::validate_metadata(metadata)?;
        validation::validate_secret(&secret)?;

        let sealed = self
            .cipher
            .encrypt_secret(&secret, &KeyContext::for_owner(owner_id))?;
        drop(secret);

        let now = Utc::now();
        let entry = VaultEntry {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            display_name: metadata.display_name,
            target_url: metadata.target_url,
            provider: metadata.provider,
            username: metadata.username,
            icon_url: metadata.icon_url,
            status: EntryStatus::Active,
            key_version: sealed.key_version,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };

        let stored = StoredEntry {
            entry,
            secret: sealed,
        };
        self.store
            .create(
                VAULT_ENTRIES,
                NewRecord {
                    id: stored.entry.id.clone(),
                    owner_id: owner_id.to_string(),
                    created_at: now,
                    body: store::encode(&stored)?,
                },
            )
            .await?;

        let entry = stored.entry;
        info!(entry_id = %entry.id, provider = entry.provider.as_str(), "vault entry created");
        self.audit
            .record(AuditEvent::new(
                owner_id,
                Some(&entry.id),
                AuditEventKind::EntryCreated,
                json!({
                    "display_name": entry.display_name,
                    "provider": entry.provider,
                    "key_version": entry.key_version,
                }),
            ))
            .await;

        Ok(entry)
    }

    /// Fetch one entry; entries of other owners are reported as not found
    pub async fn get(&self, owner_id: &str, id: &str) -> Result<VaultEntry> {
        Ok(self.load(owner_id, id).await?.entry)
    }

    /// All entries of an owner, newest first
    pub async fn list(&self, owner_id: &str) -> Result<Vec<VaultEntry>> {
        let records =
            store::list_all(self.store.as_ref(), VAULT_ENTRIES, owner_id, LIST_PAGE_SIZE).await?;

        let mut entries = Vec::with_capacity(records.len());
        for record in records.into_iter().rev() {
            entries.push(record.decode::<StoredEntry>()?.entry);
        }
        Ok(entries)
    }

    /// Apply a partial metadata update
    #[instrument(skip_all, fields(owner_id = %owner_id, entry_id = %id))]
    pub async fn update(&self, owner_id: &str, id: &str, patch: MetadataPatch) -> Result<VaultEntry> {
        let _entry_lock = self.locks.acquire(owner_id, id).await;
        let mut stored = self.load(owner_id, id).await?;
        let changed = validation::apply_patch(&mut stored.entry, patch)?;
        stored.entry.updated_at = advance(stored.entry.updated_at);

        self.save(&stored).await?;

        info!(fields = ?changed, "vault entry updated");
        self.audit
            .record(AuditEvent::new(
                owner_id,
                Some(id),
                AuditEventKind::EntryUpdated,
                json!({ "fields": changed }),
            ))
            .await;

        Ok(stored.entry)
    }

    /// Replace the secret, sealing it under the current key version
    ///
    /// The previous ciphertext is overwritten, not retained.
    #[instrument(skip_all, fields(owner_id = %owner_id, entry_id = %id))]
    pub async fn rotate_secret(&self, owner_id: &str, id: &str, new_secret: SecretString) -> Result<()> {
        validation::validate_secret(&new_secret)?;
        let _entry_lock = self.locks.acquire(owner_id, id).await;
        let mut stored = self.load(owner_id, id).await?;

        stored.secret = self
            .cipher
            .encrypt_secret(&new_secret, &KeyContext::for_owner(owner_id))?;
        drop(new_secret);
        stored.entry.key_version = stored.secret.key_version;
        stored.entry.updated_at = advance(stored.entry.updated_at);

        self.save(&stored).await?;

        info!(key_version = stored.entry.key_version, "vault entry secret rotated");
        self.audit
            .record(AuditEvent::new(
                owner_id,
                Some(id),
                AuditEventKind::EntryUpdated,
                json!({ "fields": ["secret"], "key_version": stored.entry.key_version }),
            ))
            .await;

        Ok(())
    }

    /// Hard-delete an entry; deleting an absent entry succeeds
    #[instrument(skip_all, fields(owner_id = %owner_id, entry_id = %id))]
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<()> {
        let _entry_lock = self.locks.acquire(owner_id, id).await;
        if !self.store.delete(VAULT_ENTRIES, owner_id, id).await? {
            return Ok(());
        }

        info!("vault entry deleted");
        self.audit
            .record(AuditEvent::new(
                owner_id,
                Some(id),
                AuditEventKind::EntryDeleted,
                json!({}),
            ))
            .await;
        Ok(())
    }

    /// Re-seal every entry of an owner that is not on the current key version
    ///
    /// Returns the number of migrated entries. Run before purging an old
    /// master key version.
    #[instrument(skip_all, fields(owner_id = %owner_id))]
    pub async fn reencrypt_owner(&self, owner_id: &str) -> Result<usize> {
        let current = self
            .keyring()
            .current_version()
            .ok_or_else(|| CipherError::Unavailable("no master key registered".to_string()))?;
        let ctx = KeyContext::for_owner(owner_id);

        let records =
            store::list_all(self.store.as_ref(), VAULT_ENTRIES, owner_id, LIST_PAGE_SIZE).await?;

        let mut migrated = 0;
        for record in records {
            let _entry_lock = self.locks.acquire(owner_id, &record.id).await;
            // Reload under the lock; the listing may be stale by now
            let mut stored = match self.load(owner_id, &record.id).await {
                Ok(stored) => stored,
                Err(VaultError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if stored.secret.key_version == current {
                continue;
            }

            let from_version = stored.secret.key_version;
            let plaintext = self.cipher.decrypt(&stored.secret, &ctx)?;
            stored.secret = self.cipher.encrypt(&plaintext, &ctx)?;
            drop(plaintext);
            stored.entry.key_version = stored.secret.key_version;
            stored.entry.updated_at = advance(stored.entry.updated_at);

            self.save(&stored).await?;
            migrated += 1;

            self.audit
                .record(AuditEvent::new(
                    owner_id,
                    Some(&stored.entry.id),
                    AuditEventKind::EntryUpdated,
                    json!({
                        "fields": ["secret"],
                        "from_key_version": from_version,
                        "key_version": stored.entry.key_version,
                    }),
                ))
                .await;
        }

        info!(migrated, key_version = current, "owner entries re-encrypted");
        Ok(migrated)
    }

    /// Load an entry together with its decrypted secret
    ///
    /// Only the login orchestrator calls this; the secret must be dropped as
    /// soon as the driver call completes.
    pub(crate) async fn reveal(&self, owner_id: &str, id: &str) -> Result<(VaultEntry, SecretString)> {
        let stored = self.load(owner_id, id).await?;
        let secret = self
            .cipher
            .decrypt_secret(&stored.secret, &KeyContext::for_owner(owner_id))?;
        Ok((stored.entry, secret))
    }

    /// Record a successful login
    pub(crate) async fn mark_used(&self, owner_id: &str, id: &str, at: DateTime<Utc>) -> Result<()> {
        let _entry_lock = self.locks.acquire(owner_id, id).await;
        let mut stored = self.load(owner_id, id).await?;
        stored.entry.last_used_at = Some(at);
        self.save(&stored).await
    }

    async fn load(&self, owner_id: &str, id: &str) -> Result<StoredEntry> {
        let record = self
            .store
            .read(VAULT_ENTRIES, owner_id, id)
            .await?
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        Ok(record.decode()?)
    }

    async fn save(&self, stored: &StoredEntry) -> Result<()> {
        self.store
            .update(
                VAULT_ENTRIES,
                &stored.entry.owner_id,
                &stored.entry.id,
                store::encode(stored)?,
            )
            .await?;
        Ok(())
    }
}

/// Next `updated_at`, never earlier than the previous one
fn advance(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}
