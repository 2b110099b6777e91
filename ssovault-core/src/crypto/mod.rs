//! Cryptographic primitives for the credential vault.
//!
//! This module provides:
//! - HKDF-SHA256 per-owner key derivation from a versioned master key ring
//! - AES-256-GCM authenticated encryption of entry secrets
//! - Zeroizing containers for plaintext credential material

pub mod cipher;
pub mod keyring;
pub mod zero;

pub use cipher::{EncryptedSecret, KeyContext, SecretCipher};
pub use keyring::{KeyRing, MasterKey};
pub use zero::{redact, redact_word, SecretString};

use crate::ErrorKind;
use thiserror::Error;

/// Errors that can occur in cryptographic operations
///
/// Messages never carry key bytes, ciphertext or plaintext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Key version {0} is unknown or has been purged")]
    KeyMismatch(u32),

    #[error("Authentication failed - secret may have been tampered with")]
    IntegrityFailure,

    #[error("Key material unavailable: {0}")]
    Unavailable(String),
}

impl CipherError {
    /// Stable error kind for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyMismatch(_) => ErrorKind::CipherKeyMismatch,
            Self::IntegrityFailure => ErrorKind::CipherIntegrityFailure,
            Self::Unavailable(_) => ErrorKind::CipherUnavailable,
        }
    }
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CipherError>;
