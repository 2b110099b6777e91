//! Shared fixtures: scripted automation drivers and a wired core.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use ssovault_core::store::{NewRecord, Page, PageToken, StoreResult, StoredRecord};
use ssovault_core::{
    AutomationDriver, CoreConfig, DriverOutcome, EntryMetadata, KeyRing, LoginPolicy, MasterKey,
    MemoryStore, Provider, RecordStore, SecretString, Services, VaultEntry,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One call as seen by a test driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target_url: String,
    pub username: String,
    pub secret: String,
}

/// Replays queued outcomes, then succeeds
#[derive(Default)]
pub struct ScriptedDriver {
    outcomes: Mutex<VecDeque<DriverOutcome>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedDriver {
    pub fn new(outcomes: impl IntoIterator<Item = DriverOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AutomationDriver for ScriptedDriver {
    async fn attempt(&self, target_url: &str, username: &str, secret: &str, _deadline: Instant) -> DriverOutcome {
        self.calls.lock().push(Call {
            target_url: target_url.to_string(),
            username: username.to_string(),
            secret: secret.to_string(),
        });
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or(DriverOutcome::Success)
    }
}

/// Always reports a transient failure and signals each attempt
#[derive(Default)]
pub struct FlakyDriver {
    pub attempted: Notify,
    pub attempts: Mutex<u32>,
}

#[async_trait]
impl AutomationDriver for FlakyDriver {
    async fn attempt(&self, _target_url: &str, _username: &str, _secret: &str, _deadline: Instant) -> DriverOutcome {
        *self.attempts.lock() += 1;
        self.attempted.notify_one();
        DriverOutcome::TransientFailure("login form not loaded yet".to_string())
    }
}

/// Never returns from an attempt
pub struct HangingDriver;

#[async_trait]
impl AutomationDriver for HangingDriver {
    async fn attempt(&self, _target_url: &str, _username: &str, _secret: &str, _deadline: Instant) -> DriverOutcome {
        std::future::pending().await
    }
}

/// Holds every attempt until released, then succeeds
#[derive(Default)]
pub struct GatedDriver {
    pub entered: Notify,
    pub release: Notify,
    secrets: Mutex<Vec<String>>,
}

impl GatedDriver {
    pub fn secrets(&self) -> Vec<String> {
        self.secrets.lock().clone()
    }
}

#[async_trait]
impl AutomationDriver for GatedDriver {
    async fn attempt(&self, _target_url: &str, _username: &str, secret: &str, _deadline: Instant) -> DriverOutcome {
        self.secrets.lock().push(secret.to_string());
        self.entered.notify_one();
        self.release.notified().await;
        DriverOutcome::Success
    }
}

/// Rejects the login, echoing the credentials back in its reason
pub struct EchoingRejectDriver;

#[async_trait]
impl AutomationDriver for EchoingRejectDriver {
    async fn attempt(&self, _target_url: &str, username: &str, secret: &str, _deadline: Instant) -> DriverOutcome {
        DriverOutcome::PermanentFailure(format!(
            "server rejected password '{}' for user {}",
            secret, username
        ))
    }
}

/// Store call that [`StallingStore`] can hold open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallOn {
    Create(&'static str),
    Read(&'static str),
}

/// Memory store that parks the next armed call until resumed
///
/// A stalled `create` has already inserted its record when it parks.
#[derive(Default)]
pub struct StallingStore {
    inner: MemoryStore,
    armed: Mutex<Option<StallOn>>,
    pub stalled: Notify,
    pub resume: Notify,
}

impl StallingStore {
    pub fn arm(&self, on: StallOn) {
        *self.armed.lock() = Some(on);
    }

    async fn checkpoint(&self, hit_on: impl Fn(StallOn) -> bool) {
        let hit = {
            let mut armed = self.armed.lock();
            if armed.is_some_and(&hit_on) {
                *armed = None;
                true
            } else {
                false
            }
        };
        if hit {
            self.stalled.notify_one();
            self.resume.notified().await;
        }
    }
}

#[async_trait]
impl RecordStore for StallingStore {
    async fn create(&self, collection: &str, record: NewRecord) -> StoreResult<StoredRecord> {
        let created = self.inner.create(collection, record).await;
        self.checkpoint(|on| matches!(on, StallOn::Create(c) if c == collection))
            .await;
        created
    }

    async fn read(&self, collection: &str, owner_id: &str, id: &str) -> StoreResult<Option<StoredRecord>> {
        self.checkpoint(|on| matches!(on, StallOn::Read(c) if c == collection))
            .await;
        self.inner.read(collection, owner_id, id).await
    }

    async fn update(&self, collection: &str, owner_id: &str, id: &str, body: Vec<u8>) -> StoreResult<()> {
        self.inner.update(collection, owner_id, id, body).await
    }

    async fn delete(&self, collection: &str, owner_id: &str, id: &str) -> StoreResult<bool> {
        self.inner.delete(collection, owner_id, id).await
    }

    async fn list_by_owner(
        &self,
        collection: &str,
        owner_id: &str,
        after: Option<PageToken>,
        limit: usize,
    ) -> StoreResult<Page> {
        self.inner.list_by_owner(collection, owner_id, after, limit).await
    }
}

pub fn services_with(driver: Arc<dyn AutomationDriver>, policy: LoginPolicy) -> Services {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    services_on(store, driver, policy)
}

pub fn services_on(
    store: Arc<dyn RecordStore>,
    driver: Arc<dyn AutomationDriver>,
    policy: LoginPolicy,
) -> Services {
    let config = CoreConfig {
        login: policy,
        ..CoreConfig::default()
    };
    let keyring = Arc::new(KeyRing::with_master_key(MasterKey::generate()));
    Services::build(&config, keyring, store, driver).unwrap()
}

pub fn mail_metadata() -> EntryMetadata {
    EntryMetadata::new(
        "Mail",
        "https://mail.example.com",
        Provider::Google,
        "me@example.com",
    )
}

pub async fn create_mail(services: &Services, owner: &str, secret: &str) -> VaultEntry {
    services
        .vault
        .create(owner, mail_metadata(), SecretString::from(secret))
        .await
        .unwrap()
}
