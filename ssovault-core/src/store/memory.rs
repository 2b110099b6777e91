//! In-memory record store.
//!
//! Thread-safe through a single [`parking_lot::RwLock`]; records live in a
//! [`BTreeMap`] by id plus an ordered index for per-owner listing. Nothing is
//! persisted.

use super::{NewRecord, Page, PageToken, RecordStore, StoreError, StoreResult, StoredRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

type RecordKey = (String, String);
type OrderKey = (String, String, i64, u64);

#[derive(Default)]
struct Inner {
    next_seq: u64,
    records: BTreeMap<RecordKey, StoredRecord>,
    order: BTreeMap<OrderKey, String>,
}

/// Record store kept entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all collections
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn order_key(collection: &str, record: &StoredRecord) -> OrderKey {
    (
        collection.to_string(),
        record.owner_id.clone(),
        record.created_at.timestamp_micros(),
        record.seq,
    )
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, collection: &str, record: NewRecord) -> StoreResult<StoredRecord> {
        let mut inner = self.inner.write();
        let key = (collection.to_string(), record.id.clone());
        if inner.records.contains_key(&key) {
            return Err(StoreError::Conflict(record.id));
        }

        inner.next_seq += 1;
        let stored = StoredRecord {
            id: record.id,
            owner_id: record.owner_id,
            created_at: record.created_at,
            seq: inner.next_seq,
            body: record.body,
        };
        inner
            .order
            .insert(order_key(collection, &stored), stored.id.clone());
        inner.records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn read(
        &self,
        collection: &str,
        owner_id: &str,
        id: &str,
    ) -> StoreResult<Option<StoredRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(&(collection.to_string(), id.to_string()))
            .filter(|r| r.owner_id == owner_id)
            .cloned())
    }

    async fn update(
        &self,
        collection: &str,
        owner_id: &str,
        id: &str,
        body: Vec<u8>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        match inner
            .records
            .get_mut(&(collection.to_string(), id.to_string()))
        {
            Some(record) if record.owner_id == owner_id => {
                record.body = body;
                Ok(())
            }
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, collection: &str, owner_id: &str, id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        let key = (collection.to_string(), id.to_string());
        let owned = inner
            .records
            .get(&key)
            .is_some_and(|r| r.owner_id == owner_id);
        if !owned {
            return Ok(false);
        }

        if let Some(record) = inner.records.remove(&key) {
            inner.order.remove(&order_key(collection, &record));
        }
        Ok(true)
    }

    async fn list_by_owner(
        &self,
        collection: &str,
        owner_id: &str,
        after: Option<PageToken>,
        limit: usize,
    ) -> StoreResult<Page> {
        let inner = self.inner.read();
        let lower = match after {
            Some(token) => Bound::Excluded((
                collection.to_string(),
                owner_id.to_string(),
                token.created_at_micros,
                token.seq,
            )),
            None => Bound::Included((
                collection.to_string(),
                owner_id.to_string(),
                i64::MIN,
                0,
            )),
        };
        let upper = Bound::Included((
            collection.to_string(),
            owner_id.to_string(),
            i64::MAX,
            u64::MAX,
        ));

        let records: Vec<StoredRecord> = inner
            .order
            .range((lower, upper))
            .filter_map(|(_, id)| inner.records.get(&(collection.to_string(), id.clone())))
            .take(limit)
            .cloned()
            .collect();

        Ok(Page::from_records(records, limit))
    }
}
