//! Login session orchestrator
//!
//! Drives automated logins against a vault entry's target through an
//! [`AutomationDriver`]. The orchestrator owns retry, backoff, the overall
//! deadline and cancellation; the driver only makes single attempts.
//!
//! At most one live session exists per entry. The plaintext secret is revealed
//! for one driver call at a time and dropped as soon as that call returns.

mod driver;
mod retry;
mod session;

pub use driver::{AutomationDriver, DriverOutcome};
pub use retry::LoginPolicy;
pub use session::{FailureKind, LoginFailure, LoginSession, OrchestratorError, SessionState};

use crate::{
    audit::{AuditEvent, AuditEventKind, AuditLog},
    crypto::{redact, redact_word, SecretString},
    store::{self, NewRecord, RecordStore, LOGIN_SESSIONS},
    vault::{EntryStatus, Vault, VaultEntry, VaultError},
    Result,
};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

const LIST_PAGE_SIZE: usize = 256;

/// Live session occupying an entry
struct ActiveSlot {
    session_id: String,
    cancel: CancellationToken,
}

/// Live sessions, keyed by owner then entry
///
/// Each owner has its own lock; the outer map is only touched to find or
/// create an owner's table.
#[derive(Default)]
struct ActiveSessions {
    owners: RwLock<HashMap<String, Arc<Mutex<HashMap<String, ActiveSlot>>>>>,
}

impl ActiveSessions {
    fn owner_table(&self, owner_id: &str) -> Arc<Mutex<HashMap<String, ActiveSlot>>> {
        if let Some(table) = self.owners.read().get(owner_id) {
            return table.clone();
        }
        self.owners
            .write()
            .entry(owner_id.to_string())
            .or_default()
            .clone()
    }

    /// Claim the entry for a new session; fails if one is already live
    fn claim(&self, owner_id: &str, entry_id: &str, slot: ActiveSlot) -> std::result::Result<(), VaultError> {
        let table = self.owner_table(owner_id);
        let mut table = table.lock();
        if let Some(existing) = table.get(entry_id) {
            return Err(VaultError::Conflict(format!(
                "login session {} already active for entry {}",
                existing.session_id, entry_id
            )));
        }
        table.insert(entry_id.to_string(), slot);
        Ok(())
    }

    /// Release the entry if it is still held by `session_id`
    fn release(&self, owner_id: &str, entry_id: &str, session_id: &str) {
        let Some(table) = self.owners.read().get(owner_id).cloned() else {
            return;
        };
        let mut table = table.lock();
        if table
            .get(entry_id)
            .is_some_and(|slot| slot.session_id == session_id)
        {
            table.remove(entry_id);
        }
    }

    fn find(&self, owner_id: &str, session_id: &str) -> Option<CancellationToken> {
        let table = self.owners.read().get(owner_id).cloned()?;
        let table = table.lock();
        table
            .values()
            .find(|slot| slot.session_id == session_id)
            .map(|slot| slot.cancel.clone())
    }
}

/// Holds an entry's slot; dropping it frees the slot
///
/// Until the session task takes it over, `unlaunched` keeps the stored
/// record so an abandoned `start_login` can close it out as cancelled.
struct SlotGuard {
    inner: Arc<Inner>,
    owner_id: String,
    entry_id: String,
    session_id: String,
    unlaunched: Option<LoginSession>,
}

impl SlotGuard {
    fn launched(mut self) -> Self {
        self.unlaunched = None;
        self
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.unlaunched.take() {
            warn!(session_id = %self.session_id, "login start abandoned before launch");
            session.last_error = Some(LoginFailure::new(
                FailureKind::Cancelled,
                "start abandoned by caller",
            ));
            advance(&mut session, SessionState::Cancelled);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let inner = self.inner.clone();
                runtime.spawn(async move { persist(&inner, &session).await });
            }
        }
        self.inner
            .active
            .release(&self.owner_id, &self.entry_id, &self.session_id);
    }
}

struct Inner {
    vault: Arc<Vault>,
    store: Arc<dyn RecordStore>,
    audit: AuditLog,
    driver: Arc<dyn AutomationDriver>,
    policy: LoginPolicy,
    active: ActiveSessions,
}

/// How the attempt loop ended, short of the deadline
enum Finish {
    Succeeded,
    Failed(LoginFailure),
    Cancelled,
}

/// Login orchestrator; cheap to clone
#[derive(Clone)]
pub struct LoginOrchestrator {
    inner: Arc<Inner>,
}

impl LoginOrchestrator {
    pub fn new(
        vault: Arc<Vault>,
        store: Arc<dyn RecordStore>,
        audit: AuditLog,
        driver: Arc<dyn AutomationDriver>,
        policy: LoginPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                vault,
                store,
                audit,
                driver,
                policy,
                active: ActiveSessions::default(),
            }),
        }
    }

    pub fn policy(&self) -> &LoginPolicy {
        &self.inner.policy
    }

    /// Start a login against an entry's target
    ///
    /// Fails fast with the vault's `NotFound`, cipher errors unchanged,
    /// `ValidationFailed` for a non-active entry, and `Conflict` when the
    /// entry already has a live session. The session itself runs in the
    /// background; use the returned handle to wait for or cancel it.
    #[instrument(skip_all, fields(owner_id = %owner_id, entry_id = %entry_id))]
    pub async fn start_login(&self, owner_id: &str, entry_id: &str) -> Result<SessionHandle> {
        let inner = &self.inner;
        let (entry, secret) = inner.vault.reveal(owner_id, entry_id).await?;
        if entry.status != EntryStatus::Active {
            return Err(VaultError::ValidationFailed(format!(
                "entry {} is not active",
                entry_id
            ))
            .into());
        }

        let session = LoginSession::new(Uuid::new_v4().to_string(), owner_id, entry_id);
        let body = store::encode(&session)?;
        let cancel = CancellationToken::new();
        inner.active.claim(
            owner_id,
            entry_id,
            ActiveSlot {
                session_id: session.session_id.clone(),
                cancel: cancel.clone(),
            },
        )?;
        let mut guard = SlotGuard {
            inner: inner.clone(),
            owner_id: owner_id.to_string(),
            entry_id: entry_id.to_string(),
            session_id: session.session_id.clone(),
            unlaunched: Some(session.clone()),
        };

        let created = inner
            .store
            .create(
                LOGIN_SESSIONS,
                NewRecord {
                    id: session.session_id.clone(),
                    owner_id: owner_id.to_string(),
                    created_at: session.started_at,
                    body,
                },
            )
            .await;
        if let Err(e) = created {
            guard.unlaunched = None;
            return Err(e.into());
        }

        info!(session_id = %session.session_id, "login session started");
        let session_id = session.session_id.clone();
        let span = info_span!("login_session", session_id = %session_id, entry_id = %entry_id);
        let task = tokio::spawn(
            run_session(guard.launched(), session, entry, secret, cancel.clone()).instrument(span),
        );

        Ok(SessionHandle {
            session_id,
            entry_id: entry_id.to_string(),
            cancel,
            task,
        })
    }

    /// Cancel a live session by id
    ///
    /// The session observes cancellation at its next retry boundary.
    pub fn cancel(&self, owner_id: &str, session_id: &str) -> Result<()> {
        match self.inner.active.find(owner_id, session_id) {
            Some(token) => {
                debug!(session_id, "login session cancellation requested");
                token.cancel();
                Ok(())
            }
            None => Err(OrchestratorError::SessionNotFound(session_id.to_string()).into()),
        }
    }

    /// Read back a session record
    pub async fn session(&self, owner_id: &str, session_id: &str) -> Result<LoginSession> {
        let record = self
            .inner
            .store
            .read(LOGIN_SESSIONS, owner_id, session_id)
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
        Ok(record.decode()?)
    }

    /// Every session recorded for an entry, oldest first
    pub async fn sessions_for_entry(&self, owner_id: &str, entry_id: &str) -> Result<Vec<LoginSession>> {
        let records =
            store::list_all(self.inner.store.as_ref(), LOGIN_SESSIONS, owner_id, LIST_PAGE_SIZE)
                .await?;

        let mut sessions = Vec::new();
        for record in records {
            let session: LoginSession = record.decode()?;
            if session.entry_id == entry_id {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

/// Handle to a running login session
pub struct SessionHandle {
    session_id: String,
    entry_id: String,
    cancel: CancellationToken,
    task: JoinHandle<LoginSession>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Request cancellation; takes effect at the next retry boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session to reach a terminal state
    ///
    /// Returns the terminal record whatever the outcome; use
    /// [`LoginSession::outcome`] to turn it into a result.
    pub async fn wait(self) -> Result<LoginSession> {
        self.task
            .await
            .map_err(|e| OrchestratorError::Aborted(e.to_string()).into())
    }
}

async fn run_session(
    slot: SlotGuard,
    mut session: LoginSession,
    entry: VaultEntry,
    secret: SecretString,
    cancel: CancellationToken,
) -> LoginSession {
    let inner = slot.inner.clone();
    let deadline = inner.policy.deadline_from(Instant::now());

    inner
        .audit
        .record(AuditEvent::new(
            &session.owner_id,
            Some(&session.entry_id),
            AuditEventKind::LoginStarted,
            json!({ "session_id": session.session_id }),
        ))
        .await;

    if cancel.is_cancelled() {
        drop(secret);
        return finish(&inner, session, Finish::Cancelled).await;
    }

    advance(&mut session, SessionState::InProgress);
    persist(&inner, &session).await;

    let mut first_secret = Some(secret);
    let finished = tokio::time::timeout_at(
        deadline,
        attempt_loop(&inner, &mut session, &entry, &mut first_secret, &cancel, deadline),
    )
    .await;
    drop(first_secret);

    match finished {
        Ok(outcome) => finish(&inner, session, outcome).await,
        Err(_) => {
            warn!(attempts = session.attempt, "login session timed out");
            session.last_error = Some(LoginFailure::new(
                FailureKind::Timeout,
                format!("deadline of {}s exceeded", inner.policy.timeout_secs),
            ));
            advance(&mut session, SessionState::TimedOut);
            conclude(&inner, session).await
        }
    }
}

async fn attempt_loop(
    inner: &Inner,
    session: &mut LoginSession,
    entry: &VaultEntry,
    first_secret: &mut Option<SecretString>,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Finish {
    let max_attempts = inner.policy.max_attempts;
    let mut last_reason = String::new();

    for retry_index in 0..max_attempts {
        if retry_index > 0 {
            let delay = inner.policy.backoff_delay(retry_index - 1);
            debug!(
                attempt = session.attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %last_reason,
                "transient login failure, retrying after backoff"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Finish::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Finish::Cancelled;
        }

        session.attempt += 1;
        persist(inner, session).await;

        let secret = match first_secret.take() {
            Some(secret) => secret,
            None => match inner.vault.reveal(&session.owner_id, &entry.id).await {
                Ok((_, secret)) => secret,
                Err(e) => {
                    return Finish::Failed(LoginFailure::new(
                        FailureKind::Permanent,
                        format!("credential unavailable: {}", e),
                    ))
                }
            },
        };

        let outcome = inner
            .driver
            .attempt(&entry.target_url, &entry.username, secret.expose(), deadline)
            .await;
        let scrub = |reason: String| {
            redact_word(&redact(&reason, &[secret.expose()]), &entry.username)
        };
        let outcome = match outcome {
            DriverOutcome::Success => DriverOutcome::Success,
            DriverOutcome::TransientFailure(reason) => DriverOutcome::TransientFailure(scrub(reason)),
            DriverOutcome::PermanentFailure(reason) => DriverOutcome::PermanentFailure(scrub(reason)),
        };
        drop(secret);

        match outcome {
            DriverOutcome::Success => return Finish::Succeeded,
            DriverOutcome::PermanentFailure(reason) => {
                return Finish::Failed(LoginFailure::new(FailureKind::Permanent, reason));
            }
            DriverOutcome::TransientFailure(reason) => {
                session.last_error = Some(LoginFailure::new(FailureKind::Transient, reason.clone()));
                last_reason = reason;
            }
        }
    }

    Finish::Failed(LoginFailure::new(
        FailureKind::Transient,
        format!(
            "retry budget of {} attempts exhausted: {}",
            max_attempts, last_reason
        ),
    ))
}

async fn finish(inner: &Inner, mut session: LoginSession, outcome: Finish) -> LoginSession {
    match outcome {
        Finish::Succeeded => {
            session.last_error = None;
            advance(&mut session, SessionState::Succeeded);
        }
        Finish::Failed(failure) => {
            session.last_error = Some(failure);
            advance(&mut session, SessionState::Failed);
        }
        Finish::Cancelled => {
            session.last_error = Some(LoginFailure::new(
                FailureKind::Cancelled,
                "cancelled by caller",
            ));
            advance(&mut session, SessionState::Cancelled);
        }
    }
    conclude(inner, session).await
}

/// Persist the terminal record, update the entry and audit
///
/// The slot itself is freed when the session task drops its [`SlotGuard`].
async fn conclude(inner: &Inner, session: LoginSession) -> LoginSession {
    persist(inner, &session).await;

    if session.state == SessionState::Succeeded {
        let used_at = session.ended_at.unwrap_or(session.started_at);
        if let Err(e) = inner
            .vault
            .mark_used(&session.owner_id, &session.entry_id, used_at)
            .await
        {
            warn!(error = %e, "failed to record last use of vault entry");
        }
        info!(attempts = session.attempt, "login succeeded");
        inner
            .audit
            .record(AuditEvent::new(
                &session.owner_id,
                Some(&session.entry_id),
                AuditEventKind::LoginSucceeded,
                json!({
                    "session_id": session.session_id,
                    "attempts": session.attempt,
                }),
            ))
            .await;
    } else {
        let (kind, reason) = session
            .last_error
            .as_ref()
            .map(|f| (Some(f.kind), f.reason.as_str()))
            .unwrap_or((None, ""));
        info!(state = session.state.as_str(), attempts = session.attempt, "login failed");
        inner
            .audit
            .record(AuditEvent::new(
                &session.owner_id,
                Some(&session.entry_id),
                AuditEventKind::LoginFailed,
                json!({
                    "session_id": session.session_id,
                    "state": session.state,
                    "attempts": session.attempt,
                    "kind": kind,
                    "reason": reason,
                }),
            ))
            .await;
    }

    session
}

/// Apply a transition the orchestrator itself sequences
fn advance(session: &mut LoginSession, next: SessionState) {
    if let Err(e) = session.transition(next) {
        warn!(error = %e, "ignoring out-of-order session transition");
    }
}

/// Write the session record; failures are logged and the session carries on
async fn persist(inner: &Inner, session: &LoginSession) {
    let result = match store::encode(session) {
        Ok(body) => {
            inner
                .store
                .update(LOGIN_SESSIONS, &session.owner_id, &session.session_id, body)
                .await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(
            error = %e,
            state = session.state.as_str(),
            "failed to persist login session"
        );
    }
}
