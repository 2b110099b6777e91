//! Backing store contract shared by the vault, session tracking and audit log.
//!
//! Records are opaque JSON bodies addressed by `(collection, id)` and scoped
//! to an owner. Listing is ordered by `(created_at, seq)`, where `seq` is a
//! store-assigned, strictly increasing insertion number.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::ErrorKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Collection holding vault entries
pub const VAULT_ENTRIES: &str = "vault_entries";
/// Collection holding login sessions
pub const LOGIN_SESSIONS: &str = "login_sessions";
/// Collection holding audit events
pub const AUDIT_EVENTS: &str = "audit_events";

/// Errors raised by a backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::StoreConflict,
            Self::NotFound(_) => ErrorKind::StoreNotFound,
            Self::Unavailable(_) | Self::Serialization(_) => ErrorKind::StoreUnavailable,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A record to insert
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub body: Vec<u8>,
}

/// A record as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
    pub body: Vec<u8>,
}

impl StoredRecord {
    /// Position of this record in listing order
    pub fn token(&self) -> PageToken {
        PageToken {
            created_at_micros: self.created_at.timestamp_micros(),
            seq: self.seq,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        decode(&self.body)
    }
}

/// Resume position for `list_by_owner`; listing continues strictly after it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageToken {
    pub created_at_micros: i64,
    pub seq: u64,
}

/// One page of an owner listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<StoredRecord>,
    /// Set when the page was full and more records may follow
    pub next: Option<PageToken>,
}

impl Page {
    pub(crate) fn from_records(records: Vec<StoredRecord>, limit: usize) -> Self {
        let next = if records.len() >= limit {
            records.last().map(StoredRecord::token)
        } else {
            None
        };
        Self { records, next }
    }
}

/// Create/read/update/delete record store with ordered per-owner listing
///
/// Implementations must give read-your-writes consistency per owner. Reads,
/// updates and deletes only match records of the given owner.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record; fails with `Conflict` if the id is taken
    async fn create(&self, collection: &str, record: NewRecord) -> StoreResult<StoredRecord>;

    async fn read(&self, collection: &str, owner_id: &str, id: &str)
        -> StoreResult<Option<StoredRecord>>;

    /// Replace the body of an existing record; fails with `NotFound` if absent
    async fn update(&self, collection: &str, owner_id: &str, id: &str, body: Vec<u8>)
        -> StoreResult<()>;

    /// Remove a record, returning whether one was removed
    async fn delete(&self, collection: &str, owner_id: &str, id: &str) -> StoreResult<bool>;

    /// List up to `limit` records of an owner after `after`, ascending
    async fn list_by_owner(
        &self,
        collection: &str,
        owner_id: &str,
        after: Option<PageToken>,
        limit: usize,
    ) -> StoreResult<Page>;
}

/// Drain every page of an owner listing
pub async fn list_all(
    store: &dyn RecordStore,
    collection: &str,
    owner_id: &str,
    page_size: usize,
) -> StoreResult<Vec<StoredRecord>> {
    let mut records = Vec::new();
    let mut after = None;
    loop {
        let page = store
            .list_by_owner(collection, owner_id, after, page_size.max(1))
            .await?;
        records.extend(page.records);
        match page.next {
            Some(token) => after = Some(token),
            None => return Ok(records),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(body).map_err(|e| StoreError::Serialization(e.to_string()))
}
