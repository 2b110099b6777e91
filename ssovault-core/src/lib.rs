//! SSO Vault Core Library
//!
//! Custody of SSO credentials and orchestration of automated logins:
//! - Authenticated encryption of secrets under versioned, per-owner keys
//! - Vault of login targets whose secrets never leave in clear form
//! - Login sessions driven through a pluggable automation driver with
//!   retry, backoff, timeout and cancellation
//! - Append-only audit trail of vault mutations and login attempts

pub mod audit;
pub mod config;
pub mod crypto;
pub mod login;
pub mod services;
pub mod store;
pub mod vault;

pub use audit::{AuditCursor, AuditError, AuditEvent, AuditEventKind, AuditFilter, AuditLog};
pub use config::{ConfigError, CoreConfig, KeyConfig, StorageConfig};
pub use crypto::{CipherError, EncryptedSecret, KeyContext, KeyRing, MasterKey, SecretCipher, SecretString};
pub use login::{
    AutomationDriver, DriverOutcome, FailureKind, LoginFailure, LoginOrchestrator, LoginPolicy,
    LoginSession, OrchestratorError, SessionHandle, SessionState,
};
pub use services::Services;
pub use store::{MemoryStore, RecordStore, SqliteStore, StoreError};
pub use vault::{EntryMetadata, EntryStatus, MetadataPatch, Provider, Vault, VaultEntry, VaultError};

use thiserror::Error;

/// Stable, machine-readable error codes
///
/// Codes never change once published; callers may match on [`ErrorKind::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CipherKeyMismatch,
    CipherIntegrityFailure,
    CipherUnavailable,
    VaultNotFound,
    VaultValidationFailed,
    VaultConflict,
    VaultUnavailable,
    LoginTimeout,
    LoginCancelled,
    LoginDriverTransient,
    LoginDriverPermanent,
    LoginSessionNotFound,
    LoginAborted,
    LoginInvalidTransition,
    AuditUnavailable,
    StoreConflict,
    StoreNotFound,
    StoreUnavailable,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CipherKeyMismatch => "cipher.key_mismatch",
            ErrorKind::CipherIntegrityFailure => "cipher.integrity_failure",
            ErrorKind::CipherUnavailable => "cipher.unavailable",
            ErrorKind::VaultNotFound => "vault.not_found",
            ErrorKind::VaultValidationFailed => "vault.validation_failed",
            ErrorKind::VaultConflict => "vault.conflict",
            ErrorKind::VaultUnavailable => "vault.unavailable",
            ErrorKind::LoginTimeout => "login.timeout",
            ErrorKind::LoginCancelled => "login.cancelled",
            ErrorKind::LoginDriverTransient => "login.driver_failure.transient",
            ErrorKind::LoginDriverPermanent => "login.driver_failure.permanent",
            ErrorKind::LoginSessionNotFound => "login.session_not_found",
            ErrorKind::LoginAborted => "login.aborted",
            ErrorKind::LoginInvalidTransition => "login.invalid_transition",
            ErrorKind::AuditUnavailable => "audit.unavailable",
            ErrorKind::StoreConflict => "store.conflict",
            ErrorKind::StoreNotFound => "store.not_found",
            ErrorKind::StoreUnavailable => "store.unavailable",
            ErrorKind::Config => "config.invalid",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Vault(VaultError),

    #[error(transparent)]
    Login(#[from] OrchestratorError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<VaultError> for Error {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Cipher(c) => Error::Cipher(c),
            other => Error::Vault(other),
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Cipher(e) => e.kind(),
            Error::Vault(e) => e.kind(),
            Error::Login(e) => e.kind(),
            Error::Audit(e) => e.kind(),
            Error::Store(e) => e.kind(),
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_cipher_errors_surface_unchanged() {
        let err: Error = VaultError::Cipher(CipherError::IntegrityFailure).into();
        assert!(matches!(err, Error::Cipher(CipherError::IntegrityFailure)));
        assert_eq!(err.kind().as_str(), "cipher.integrity_failure");

        let err: Error = VaultError::NotFound("e1".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::VaultNotFound);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorKind::LoginTimeout.as_str(), "login.timeout");
        assert_eq!(ErrorKind::VaultNotFound.to_string(), "vault.not_found");
        assert_eq!(
            Error::from(OrchestratorError::Cancelled).kind().as_str(),
            "login.cancelled"
        );
    }
}
