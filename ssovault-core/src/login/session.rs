//! Login session records and their state machine

use crate::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session state
///
/// ```text
/// pending -> in_progress -> succeeded | failed | timed_out
/// pending | in_progress -> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Succeeded
                | SessionState::Failed
                | SessionState::TimedOut
                | SessionState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Succeeded)
                | (InProgress, Failed)
                | (InProgress, TimedOut)
                | (InProgress, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::InProgress => "in_progress",
            SessionState::Succeeded => "succeeded",
            SessionState::Failed => "failed",
            SessionState::TimedOut => "timed_out",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// Classification of a session's last error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    Timeout,
    Cancelled,
}

/// Redacted failure detail carried by a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl LoginFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors returned by the login orchestrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Login timed out")]
    Timeout,

    #[error("Login cancelled")]
    Cancelled,

    #[error("Login driver failure ({}): {reason}", failure_class(.transient))]
    DriverFailure { transient: bool, reason: String },

    #[error("Login session not found: {0}")]
    SessionNotFound(String),

    #[error("Login session aborted: {0}")]
    Aborted(String),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

fn failure_class(transient: &bool) -> &'static str {
    if *transient {
        "transient"
    } else {
        "permanent"
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::LoginTimeout,
            Self::Cancelled => ErrorKind::LoginCancelled,
            Self::DriverFailure { transient: true, .. } => ErrorKind::LoginDriverTransient,
            Self::DriverFailure { transient: false, .. } => ErrorKind::LoginDriverPermanent,
            Self::SessionNotFound(_) => ErrorKind::LoginSessionNotFound,
            Self::Aborted(_) => ErrorKind::LoginAborted,
            Self::InvalidTransition { .. } => ErrorKind::LoginInvalidTransition,
        }
    }
}

/// One tracked login attempt against a vault entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub session_id: String,
    pub owner_id: String,
    pub entry_id: String,
    pub state: SessionState,
    /// Driver attempts made so far
    pub attempt: u32,
    pub last_error: Option<LoginFailure>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl LoginSession {
    pub(crate) fn new(session_id: String, owner_id: &str, entry_id: &str) -> Self {
        Self {
            session_id,
            owner_id: owner_id.to_string(),
            entry_id: entry_id.to_string(),
            state: SessionState::Pending,
            attempt: 0,
            last_error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `next`, stamping `ended_at` when it is terminal
    pub(crate) fn transition(&mut self, next: SessionState) -> Result<(), OrchestratorError> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now().max(self.started_at));
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Outcome of a terminal session as a result
    ///
    /// Returns `Ok` for a success; in-flight sessions report `Aborted`.
    pub fn outcome(&self) -> Result<(), OrchestratorError> {
        let reason = || {
            self.last_error
                .as_ref()
                .map(|f| f.reason.clone())
                .unwrap_or_default()
        };
        match self.state {
            SessionState::Succeeded => Ok(()),
            SessionState::TimedOut => Err(OrchestratorError::Timeout),
            SessionState::Cancelled => Err(OrchestratorError::Cancelled),
            SessionState::Failed => match self.last_error.as_ref().map(|f| f.kind) {
                Some(FailureKind::Transient) => Err(OrchestratorError::DriverFailure {
                    transient: true,
                    reason: reason(),
                }),
                _ => Err(OrchestratorError::DriverFailure {
                    transient: false,
                    reason: reason(),
                }),
            },
            SessionState::Pending | SessionState::InProgress => Err(OrchestratorError::Aborted(
                format!("session is still {}", self.state.as_str()),
            )),
        }
    }
}
