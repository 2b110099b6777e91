//! Append-only audit log of vault mutations and login attempts

use crate::store::{
    self, NewRecord, PageToken, RecordStore, StoreError, AUDIT_EVENTS,
};
use crate::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default number of events fetched per page by an [`AuditCursor`]
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Audit event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    EntryCreated,
    EntryUpdated,
    EntryDeleted,
    LoginStarted,
    LoginSucceeded,
    LoginFailed,
}

impl AuditEventKind {
    /// Severity level for the event kind (0-5, where 5 is most critical)
    pub fn severity(&self) -> u8 {
        match self {
            AuditEventKind::EntryDeleted => 4,
            AuditEventKind::EntryUpdated | AuditEventKind::LoginFailed => 3,
            AuditEventKind::EntryCreated => 2,
            AuditEventKind::LoginSucceeded => 1,
            AuditEventKind::LoginStarted => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::EntryCreated => "entry_created",
            AuditEventKind::EntryUpdated => "entry_updated",
            AuditEventKind::EntryDeleted => "entry_deleted",
            AuditEventKind::LoginStarted => "login_started",
            AuditEventKind::LoginSucceeded => "login_succeeded",
            AuditEventKind::LoginFailed => "login_failed",
        }
    }
}

/// Audit log entry
///
/// `detail` must never carry secret material; callers redact before building it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub owner_id: String,
    /// None for account-level events
    pub entry_id: Option<String>,
    pub kind: AuditEventKind,
    pub timestamp: DateTime<Utc>,
    pub detail: Value,
}

impl AuditEvent {
    pub fn new(owner_id: &str, entry_id: Option<&str>, kind: AuditEventKind, detail: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            entry_id: entry_id.map(str::to_string),
            kind,
            timestamp: Utc::now(),
            detail,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("Audit storage unavailable: {0}")]
    Unavailable(String),
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::AuditUnavailable
    }
}

impl From<StoreError> for AuditError {
    fn from(e: StoreError) -> Self {
        AuditError::Unavailable(e.to_string())
    }
}

/// Query filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entry_id: Option<String>,
    pub kinds: HashSet<AuditEventKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_severity: Option<u8>,
}

impl AuditFilter {
    pub fn for_entry(entry_id: &str) -> Self {
        Self {
            entry_id: Some(entry_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: AuditEventKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(ref entry_id) = self.entry_id {
            if event.entry_id.as_deref() != Some(entry_id.as_str()) {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if self.since.is_some_and(|since| event.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.timestamp > until) {
            return false;
        }
        if self
            .min_severity
            .is_some_and(|min| event.kind.severity() < min)
        {
            return false;
        }
        true
    }
}

/// Audit log backed by a record store
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn RecordStore>,
    page_size: usize,
    failed_appends: Arc<AtomicU64>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_page_size(store, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(store: Arc<dyn RecordStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            failed_appends: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event
    ///
    /// Fails only when the backing store is unavailable.
    pub async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let body = store::encode(event)?;
        self.store
            .create(
                AUDIT_EVENTS,
                NewRecord {
                    id: event.event_id.to_string(),
                    owner_id: event.owner_id.clone(),
                    created_at: event.timestamp,
                    body,
                },
            )
            .await?;

        debug!(
            target: "audit",
            kind = event.kind.as_str(),
            owner_id = %event.owner_id,
            entry_id = event.entry_id.as_deref().unwrap_or("-"),
            "audit event recorded"
        );
        Ok(())
    }

    /// Append an event without failing the caller
    ///
    /// A failed write is logged as an operator warning and counted; the
    /// operation that produced the event is never rolled back.
    pub async fn record(&self, event: AuditEvent) {
        if let Err(err) = self.append(&event).await {
            self.failed_appends.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "audit",
                error = %err,
                kind = event.kind.as_str(),
                owner_id = %event.owner_id,
                "failed to persist audit event"
            );
        }
    }

    /// Number of best-effort appends that failed since startup
    pub fn failed_appends(&self) -> u64 {
        self.failed_appends.load(Ordering::Relaxed)
    }

    /// Lazily page through an owner's events, oldest first
    pub fn query(&self, owner_id: &str, filter: AuditFilter) -> AuditCursor {
        AuditCursor {
            store: self.store.clone(),
            owner_id: owner_id.to_string(),
            filter,
            page_size: self.page_size,
            buffer: VecDeque::new(),
            after: None,
            exhausted: false,
        }
    }
}

/// Restartable, finite cursor over audit events in timestamp order
pub struct AuditCursor {
    store: Arc<dyn RecordStore>,
    owner_id: String,
    filter: AuditFilter,
    page_size: usize,
    buffer: VecDeque<AuditEvent>,
    after: Option<PageToken>,
    exhausted: bool,
}

impl AuditCursor {
    /// Next matching event, or None once the log is exhausted
    ///
    /// A store failure is returned as an error and leaves the cursor where it
    /// was, so calling `next` again retries the same page.
    pub async fn next(&mut self) -> Option<Result<AuditEvent, AuditError>> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Some(Ok(event));
            }
            if self.exhausted {
                return None;
            }

            let page = match self
                .store
                .list_by_owner(AUDIT_EVENTS, &self.owner_id, self.after, self.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => return Some(Err(e.into())),
            };

            for record in &page.records {
                match record.decode::<AuditEvent>() {
                    Ok(event) if self.filter.matches(&event) => self.buffer.push_back(event),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "audit", record_id = %record.id, error = %e, "skipping unreadable audit record");
                    }
                }
            }

            match page.next {
                Some(token) => self.after = Some(token),
                None => self.exhausted = true,
            }
        }
    }

    /// Restart from the oldest event
    pub fn rewind(&mut self) {
        self.buffer.clear();
        self.after = None;
        self.exhausted = false;
    }

    /// Drain the remaining events
    pub async fn collect_all(&mut self) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use serde_json::json;

    fn log() -> AuditLog {
        AuditLog::with_page_size(Arc::new(MemoryStore::new()), 2)
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(AuditEventKind::EntryDeleted.severity(), 4);
        assert_eq!(AuditEventKind::EntryUpdated.severity(), 3);
        assert_eq!(AuditEventKind::LoginFailed.severity(), 3);
        assert_eq!(AuditEventKind::EntryCreated.severity(), 2);
        assert_eq!(AuditEventKind::LoginSucceeded.severity(), 1);
        assert_eq!(AuditEventKind::LoginStarted.severity(), 0);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventKind::LoginSucceeded).unwrap();
        assert_eq!(json, "\"login_succeeded\"");
        assert_eq!(AuditEventKind::LoginSucceeded.as_str(), "login_succeeded");
    }

    #[tokio::test]
    async fn test_append_and_query_in_order() {
        let log = log();
        let base = Utc::now();
        for (i, kind) in [
            AuditEventKind::EntryCreated,
            AuditEventKind::LoginStarted,
            AuditEventKind::LoginSucceeded,
            AuditEventKind::EntryDeleted,
            AuditEventKind::EntryCreated,
        ]
        .into_iter()
        .enumerate()
        {
            let mut event = AuditEvent::new("alice", Some("e1"), kind, json!({}));
            event.timestamp = base + Duration::milliseconds(i as i64);
            log.append(&event).await.unwrap();
        }
        log.append(&AuditEvent::new("bob", None, AuditEventKind::EntryCreated, json!({})))
            .await
            .unwrap();

        let events = log
            .query("alice", AuditFilter::default())
            .collect_all()
            .await
            .unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(events.iter().all(|e| e.owner_id == "alice"));
    }

    #[tokio::test]
    async fn test_filters() {
        let log = log();
        log.append(&AuditEvent::new("alice", Some("e1"), AuditEventKind::EntryCreated, json!({})))
            .await
            .unwrap();
        log.append(&AuditEvent::new("alice", Some("e2"), AuditEventKind::EntryCreated, json!({})))
            .await
            .unwrap();
        log.append(&AuditEvent::new("alice", Some("e1"), AuditEventKind::EntryDeleted, json!({})))
            .await
            .unwrap();
        log.append(&AuditEvent::new("alice", None, AuditEventKind::LoginFailed, json!({})))
            .await
            .unwrap();

        let e1 = log
            .query("alice", AuditFilter::for_entry("e1"))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(e1.len(), 2);

        let deletions = log
            .query(
                "alice",
                AuditFilter::default().with_kind(AuditEventKind::EntryDeleted),
            )
            .collect_all()
            .await
            .unwrap();
        assert_eq!(deletions.len(), 1);

        let severe = log
            .query(
                "alice",
                AuditFilter {
                    min_severity: Some(3),
                    ..AuditFilter::default()
                },
            )
            .collect_all()
            .await
            .unwrap();
        assert_eq!(severe.len(), 2);

        let future = log
            .query(
                "alice",
                AuditFilter {
                    since: Some(Utc::now() + Duration::seconds(60)),
                    ..AuditFilter::default()
                },
            )
            .collect_all()
            .await
            .unwrap();
        assert!(future.is_empty());
    }

    #[tokio::test]
    async fn test_cursor_is_lazy_and_restartable() {
        let log = log();
        for _ in 0..3 {
            log.append(&AuditEvent::new("alice", None, AuditEventKind::LoginStarted, json!({})))
                .await
                .unwrap();
        }

        let mut cursor = log.query("alice", AuditFilter::default());
        let first = cursor.next().await.unwrap().unwrap();

        // Appended after the cursor started; still visible because paging is lazy
        log.append(&AuditEvent::new("alice", None, AuditEventKind::LoginStarted, json!({})))
            .await
            .unwrap();

        let rest = cursor.collect_all().await.unwrap();
        assert_eq!(rest.len(), 3);
        assert!(cursor.next().await.is_none());

        cursor.rewind();
        let again = cursor.next().await.unwrap().unwrap();
        assert_eq!(again.event_id, first.event_id);
        assert_eq!(cursor.collect_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_event_roundtrip_through_store() {
        let log = log();
        let event = AuditEvent::new(
            "alice",
            Some("e1"),
            AuditEventKind::LoginFailed,
            json!({"reason": "rejected", "attempts": 2}),
        );
        log.append(&event).await.unwrap();

        let events = log
            .query("alice", AuditFilter::default())
            .collect_all()
            .await
            .unwrap();
        assert_eq!(events, vec![event]);
    }
}
