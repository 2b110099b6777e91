//! Versioned master keys and per-owner key derivation.
//!
//! Master Key (version N) → HKDF-SHA256(salt = owner id) → owner data key
//!
//! New writes always use the highest registered version. Older versions stay
//! registered, and therefore decryptable, until they are purged.

use crate::crypto::{CipherError, Result};
use aes_gcm::aead::{rand_core::RngCore, OsRng};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of master and derived keys in bytes.
pub const KEY_LENGTH: usize = 32;

/// HKDF info string for entry secret keys.
const HKDF_INFO: &[u8] = b"ssovault-entry-secret-v1";

/// A master key from which per-owner keys are derived
///
/// Never persisted by this crate; zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Generate a new random master key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Decode a base64-encoded 256-bit key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut bytes = STANDARD
            .decode(encoded.trim().as_bytes())
            .map_err(|_| CipherError::Unavailable("master key is not valid base64".to_string()))?;

        if bytes.len() != KEY_LENGTH {
            let got = bytes.len();
            bytes.zeroize();
            return Err(CipherError::Unavailable(format!(
                "master key must be {} bytes, got {}",
                KEY_LENGTH, got
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key })
    }

    fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

/// An owner-scoped data key derived from one master key version
#[derive(ZeroizeOnDrop)]
pub(crate) struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

/// Ordered set of master key versions
///
/// Shared behind an `Arc` so operators can rotate while the vault is serving.
#[derive(Default)]
pub struct KeyRing {
    keys: RwLock<BTreeMap<u32, MasterKey>>,
}

impl KeyRing {
    /// Create an empty key ring; encryption fails until a key is added
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a key ring whose version 1 is `key`
    pub fn with_master_key(key: MasterKey) -> Self {
        let ring = Self::new();
        ring.keys.write().insert(1, key);
        ring
    }

    /// Load version 1 from a base64 master key held in an environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        let mut encoded = std::env::var(var)
            .map_err(|_| CipherError::Unavailable(format!("{} is not set", var)))?;
        let result = MasterKey::from_base64(&encoded);
        encoded.zeroize();
        Ok(Self::with_master_key(result?))
    }

    /// Highest registered version, if any
    pub fn current_version(&self) -> Option<u32> {
        self.keys.read().keys().next_back().copied()
    }

    /// All registered versions in ascending order
    pub fn versions(&self) -> Vec<u32> {
        self.keys.read().keys().copied().collect()
    }

    /// Register `key` as the next version and make it current
    pub fn rotate(&self, key: MasterKey) -> u32 {
        let mut keys = self.keys.write();
        let version = keys.keys().next_back().map_or(1, |v| v + 1);
        keys.insert(version, key);
        tracing::info!(version, "master key rotated");
        version
    }

    /// Remove an old key version
    ///
    /// Anything still encrypted under `version` becomes undecryptable.
    pub fn purge(&self, version: u32) -> Result<()> {
        let mut keys = self.keys.write();
        if keys.keys().next_back() == Some(&version) {
            return Err(CipherError::Unavailable(
                "the current key version cannot be purged".to_string(),
            ));
        }
        keys.remove(&version)
            .map(|_| tracing::info!(version, "master key version purged"))
            .ok_or(CipherError::KeyMismatch(version))
    }

    /// Derive the data key for `owner_id` under the current version
    pub(crate) fn derive_current(&self, owner_id: &str) -> Result<(u32, DerivedKey)> {
        let keys = self.keys.read();
        let (version, master) = keys
            .iter()
            .next_back()
            .ok_or_else(|| CipherError::Unavailable("no master key registered".to_string()))?;
        Ok((*version, derive(master, owner_id)?))
    }

    /// Derive the data key for `owner_id` under a specific version
    pub(crate) fn derive(&self, version: u32, owner_id: &str) -> Result<DerivedKey> {
        let keys = self.keys.read();
        let master = keys.get(&version).ok_or(CipherError::KeyMismatch(version))?;
        derive(master, owner_id)
    }
}

fn derive(master: &MasterKey, owner_id: &str) -> Result<DerivedKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(owner_id.as_bytes()), master.as_bytes());
    let mut key = [0u8; KEY_LENGTH];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|_| CipherError::Unavailable("key derivation failed".to_string()))?;
    Ok(DerivedKey { key })
}
