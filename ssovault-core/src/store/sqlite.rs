//! SQLite record store.
//!
//! rusqlite is blocking, so every call runs on tokio's blocking pool with the
//! connection behind a mutex.

use super::{NewRecord, Page, PageToken, RecordStore, StoreError, StoreResult, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Thread-safe SQLite-backed record store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(unavailable)?;
        Self::with_connection(conn)
    }

    /// Create a new in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS store_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                record_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                body BLOB NOT NULL,
                UNIQUE (collection, record_id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_owner
                ON records (collection, owner_id, created_at, seq);",
        )
        .map_err(unavailable)?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM store_metadata WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(unavailable)?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO store_metadata (id, version) VALUES (1, ?1)",
                    [CURRENT_SCHEMA_VERSION],
                )
                .map_err(unavailable)?;
            }
            Some(v) if v > CURRENT_SCHEMA_VERSION => {
                return Err(StoreError::Unavailable(format!(
                    "store schema version {} is newer than supported version {}",
                    v, CURRENT_SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::Unavailable("store connection lock poisoned".to_string()))
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, i64, Vec<u8>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn into_record(
    (seq, id, owner_id, created_at, body): (i64, String, String, i64, Vec<u8>),
) -> StoreResult<StoredRecord> {
    let created_at = DateTime::<Utc>::from_timestamp_micros(created_at).ok_or_else(|| {
        StoreError::Serialization(format!("invalid timestamp on record {}", id))
    })?;
    Ok(StoredRecord {
        id,
        owner_id,
        created_at,
        seq: seq as u64,
        body,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create(&self, collection: &str, record: NewRecord) -> StoreResult<StoredRecord> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO records (collection, record_id, owner_id, created_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    collection,
                    record.id,
                    record.owner_id,
                    record.created_at.timestamp_micros(),
                    record.body
                ],
            );

            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::Conflict(record.id));
                }
                Err(e) => return Err(unavailable(e)),
            }

            Ok(StoredRecord {
                seq: conn.last_insert_rowid() as u64,
                id: record.id,
                owner_id: record.owner_id,
                created_at: record.created_at,
                body: record.body,
            })
        })
        .await
    }

    async fn read(
        &self,
        collection: &str,
        owner_id: &str,
        id: &str,
    ) -> StoreResult<Option<StoredRecord>> {
        let (collection, owner_id, id) = (collection.to_string(), owner_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT seq, record_id, owner_id, created_at, body FROM records
                     WHERE collection = ?1 AND record_id = ?2 AND owner_id = ?3",
                    params![collection, id, owner_id],
                    row_to_record,
                )
                .optional()
                .map_err(unavailable)?;

            row.map(into_record).transpose()
        })
        .await
    }

    async fn update(
        &self,
        collection: &str,
        owner_id: &str,
        id: &str,
        body: Vec<u8>,
    ) -> StoreResult<()> {
        let (collection, owner_id, id) = (collection.to_string(), owner_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE records SET body = ?4
                     WHERE collection = ?1 AND record_id = ?2 AND owner_id = ?3",
                    params![collection, id, owner_id, body],
                )
                .map_err(unavailable)?;

            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, owner_id: &str, id: &str) -> StoreResult<bool> {
        let (collection, owner_id, id) = (collection.to_string(), owner_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM records
                     WHERE collection = ?1 AND record_id = ?2 AND owner_id = ?3",
                    params![collection, id, owner_id],
                )
                .map_err(unavailable)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_by_owner(
        &self,
        collection: &str,
        owner_id: &str,
        after: Option<PageToken>,
        limit: usize,
    ) -> StoreResult<Page> {
        let (after_created, after_seq) = match after {
            Some(token) => (token.created_at_micros, token.seq as i64),
            None => (i64::MIN, -1),
        };

        let (collection, owner_id) = (collection.to_string(), owner_id.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT seq, record_id, owner_id, created_at, body FROM records
                     WHERE collection = ?1 AND owner_id = ?2
                       AND (created_at > ?3 OR (created_at = ?3 AND seq > ?4))
                     ORDER BY created_at ASC, seq ASC
                     LIMIT ?5",
                )
                .map_err(unavailable)?;

            let rows = stmt
                .query_map(
                    params![collection, owner_id, after_created, after_seq, limit as i64],
                    row_to_record,
                )
                .map_err(unavailable)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(into_record(row.map_err(unavailable)?)?);
            }

            Ok(Page::from_records(records, limit))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(id: &str, owner: &str) -> NewRecord {
        NewRecord {
            id: id.to_string(),
            owner_id: owner.to_string(),
            created_at: Utc::now(),
            body: format!("{{\"id\":\"{}\"}}", id).into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_create_read_update_delete() {
        let store = SqliteStore::in_memory().unwrap();

        let created = store.create("c", new_record("a", "alice")).await.unwrap();
        let read = store.read("c", "alice", "a").await.unwrap().unwrap();
        assert_eq!(read.seq, created.seq);
        assert_eq!(read.body, created.body);
        assert_eq!(
            read.created_at.timestamp_micros(),
            created.created_at.timestamp_micros()
        );

        store.update("c", "alice", "a", b"{}".to_vec()).await.unwrap();
        assert_eq!(
            store.read("c", "alice", "a").await.unwrap().unwrap().body,
            b"{}"
        );

        assert!(store.delete("c", "alice", "a").await.unwrap());
        assert!(!store.delete("c", "alice", "a").await.unwrap());
        assert!(store.read("c", "alice", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let store = SqliteStore::in_memory().unwrap();
        store.create("c", new_record("a", "alice")).await.unwrap();

        assert!(matches!(
            store.create("c", new_record("a", "alice")).await,
            Err(StoreError::Conflict(_))
        ));
        // Same id in another collection is fine
        store.create("d", new_record("a", "alice")).await.unwrap();
    }

    #[tokio::test]
    async fn test_owner_scoping() {
        let store = SqliteStore::in_memory().unwrap();
        store.create("c", new_record("a", "alice")).await.unwrap();

        assert!(store.read("c", "bob", "a").await.unwrap().is_none());
        assert!(matches!(
            store.update("c", "bob", "a", vec![]).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.delete("c", "bob", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_paged_listing() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        for id in ["one", "two", "three", "four", "five"] {
            let mut record = new_record(id, "alice");
            record.created_at = now;
            store.create("c", record).await.unwrap();
        }
        store.create("c", new_record("x", "bob")).await.unwrap();

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = store.list_by_owner("c", "alice", after, 2).await.unwrap();
            seen.extend(page.records.iter().map(|r| r.id.clone()));
            match page.next {
                Some(token) => after = Some(token),
                None => break,
            }
        }

        assert_eq!(seen, vec!["one", "two", "three", "four", "five"]);
    }

    #[tokio::test]
    async fn test_concurrent_writers_share_the_connection() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .create("c", new_record(&format!("r{}", i), "alice"))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let page = store.list_by_owner("c", "alice", None, 100).await.unwrap();
        assert_eq!(page.records.len(), 8);
        let mut seqs: Vec<_> = page.records.iter().map(|r| r.seq).collect();
        seqs.dedup();
        assert_eq!(seqs.len(), 8);
    }

    #[tokio::test]
    async fn test_reopen_preserves_records() {
        let dir = std::env::temp_dir()
            .join("ssovault_test_sqlite")
            .join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vault.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create("c", new_record("a", "alice")).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.read("c", "alice", "a").await.unwrap().is_some());

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
