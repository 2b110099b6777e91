//! AES-256-GCM encryption and decryption of entry secrets.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key derived per owner and key version
//! - 96-bit (12 byte) random nonce per encryption
//! - 128-bit authentication tag appended to the ciphertext
//! - Associated data binding the owner id and key version

use crate::crypto::{keyring::KeyRing, zero::SecretString, CipherError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Length of the GCM nonce in bytes.
pub const NONCE_LENGTH: usize = 12;

/// Owner scope for a cipher operation
#[derive(Debug, Clone, Copy)]
pub struct KeyContext<'a> {
    owner_id: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn for_owner(owner_id: &'a str) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> &str {
        self.owner_id
    }
}

/// Ciphertext (with tag), nonce and the key version it was sealed under
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,

    #[serde(with = "b64_nonce")]
    pub nonce: [u8; NONCE_LENGTH],

    pub key_version: u32,
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("ciphertext", &format_args!("<{} bytes>", self.ciphertext.len()))
            .field("key_version", &self.key_version)
            .finish()
    }
}

/// Authenticated encryption keyed per owner
#[derive(Clone)]
pub struct SecretCipher {
    keyring: Arc<KeyRing>,
}

impl SecretCipher {
    pub fn new(keyring: Arc<KeyRing>) -> Self {
        Self { keyring }
    }

    pub fn keyring(&self) -> &Arc<KeyRing> {
        &self.keyring
    }

    /// Encrypt `plaintext` under the current key version
    ///
    /// Each call draws a fresh random nonce, so sealing the same secret twice
    /// yields different ciphertexts.
    pub fn encrypt(&self, plaintext: &[u8], ctx: &KeyContext<'_>) -> Result<EncryptedSecret> {
        let (key_version, key) = self.keyring.derive_current(ctx.owner_id())?;
        let cipher = Aes256Gcm::new(key.as_bytes().into());

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = associated_data(ctx.owner_id(), key_version);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CipherError::Unavailable("encryption failed".to_string()))?;

        Ok(EncryptedSecret {
            ciphertext,
            nonce: nonce.into(),
            key_version,
        })
    }

    /// Decrypt and verify a sealed secret
    ///
    /// The returned bytes are zeroized on drop; callers must not persist or
    /// log them.
    pub fn decrypt(
        &self,
        sealed: &EncryptedSecret,
        ctx: &KeyContext<'_>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.keyring.derive(sealed.key_version, ctx.owner_id())?;
        let cipher = Aes256Gcm::new(key.as_bytes().into());

        let nonce = Nonce::from(sealed.nonce);
        let aad = associated_data(ctx.owner_id(), sealed.key_version);

        let plaintext = cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: &sealed.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CipherError::IntegrityFailure)?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Encrypt a string secret
    pub fn encrypt_secret(
        &self,
        secret: &SecretString,
        ctx: &KeyContext<'_>,
    ) -> Result<EncryptedSecret> {
        self.encrypt(secret.expose().as_bytes(), ctx)
    }

    /// Decrypt to a string secret
    pub fn decrypt_secret(
        &self,
        sealed: &EncryptedSecret,
        ctx: &KeyContext<'_>,
    ) -> Result<SecretString> {
        let mut bytes = self.decrypt(sealed, ctx)?;
        SecretString::from_utf8(std::mem::take(&mut *bytes)).ok_or(CipherError::IntegrityFailure)
    }
}

fn associated_data(owner_id: &str, key_version: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(owner_id.len() + 5);
    aad.extend_from_slice(owner_id.as_bytes());
    aad.push(0);
    aad.extend_from_slice(&key_version.to_be_bytes());
    aad
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod b64_nonce {
    use super::NONCE_LENGTH;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        nonce: &[u8; NONCE_LENGTH],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::b64::serialize(nonce, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; NONCE_LENGTH], D::Error> {
        let bytes = super::b64::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid nonce length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keyring::MasterKey;

    fn cipher() -> SecretCipher {
        SecretCipher::new(Arc::new(KeyRing::with_master_key(MasterKey::generate())))
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");

        let sealed = cipher.encrypt(b"Hello, World!", &ctx).unwrap();
        let opened = cipher.decrypt(&sealed, &ctx).unwrap();

        assert_eq!(opened.as_slice(), b"Hello, World!");
        assert_eq!(sealed.key_version, 1);
    }

    #[test]
    fn test_secret_string_roundtrip() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");

        let sealed = cipher
            .encrypt_secret(&SecretString::from("s3cr3t"), &ctx)
            .unwrap();
        let opened = cipher.decrypt_secret(&sealed, &ctx).unwrap();

        assert_eq!(opened.expose(), "s3cr3t");
    }

    #[test]
    fn test_different_nonces() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");

        let first = cipher.encrypt(b"Same data", &ctx).unwrap();
        let second = cipher.encrypt(b"Same data", &ctx).unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_every_single_bit_flip_is_detected() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");
        let sealed = cipher.encrypt(b"pw", &ctx).unwrap();

        for byte in 0..sealed.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert_eq!(
                    cipher.decrypt(&tampered, &ctx).unwrap_err(),
                    CipherError::IntegrityFailure
                );
            }
        }
    }

    #[test]
    fn test_tampered_nonce_detected() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");
        let mut sealed = cipher.encrypt(b"secret", &ctx).unwrap();

        sealed.nonce[0] ^= 0x01;
        assert_eq!(
            cipher.decrypt(&sealed, &ctx).unwrap_err(),
            CipherError::IntegrityFailure
        );
    }

    #[test]
    fn test_other_owner_cannot_decrypt() {
        let cipher = cipher();
        let sealed = cipher
            .encrypt(b"secret", &KeyContext::for_owner("alice"))
            .unwrap();

        assert_eq!(
            cipher
                .decrypt(&sealed, &KeyContext::for_owner("mallory"))
                .unwrap_err(),
            CipherError::IntegrityFailure
        );
    }

    #[test]
    fn test_old_version_decrypts_until_purged() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");
        let old = cipher.encrypt(b"before rotation", &ctx).unwrap();

        cipher.keyring().rotate(MasterKey::generate());
        let new = cipher.encrypt(b"after rotation", &ctx).unwrap();
        assert_eq!(new.key_version, 2);

        assert_eq!(
            cipher.decrypt(&old, &ctx).unwrap().as_slice(),
            b"before rotation"
        );

        cipher.keyring().purge(1).unwrap();
        assert_eq!(
            cipher.decrypt(&old, &ctx).unwrap_err(),
            CipherError::KeyMismatch(1)
        );
        assert!(cipher.decrypt(&new, &ctx).is_ok());
    }

    #[test]
    fn test_relabelled_version_fails_integrity() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");
        cipher.keyring().rotate(MasterKey::generate());

        let mut sealed = cipher.encrypt(b"secret", &ctx).unwrap();
        sealed.key_version = 1;

        assert_eq!(
            cipher.decrypt(&sealed, &ctx).unwrap_err(),
            CipherError::IntegrityFailure
        );
    }

    #[test]
    fn test_empty_keyring_is_unavailable() {
        let cipher = SecretCipher::new(Arc::new(KeyRing::new()));
        let result = cipher.encrypt(b"secret", &KeyContext::for_owner("alice"));
        assert!(matches!(result, Err(CipherError::Unavailable(_))));
    }

    #[test]
    fn test_serialization_and_debug_hide_plaintext() {
        let cipher = cipher();
        let ctx = KeyContext::for_owner("alice");
        let sealed = cipher.encrypt(b"hunter2", &ctx).unwrap();

        let json = serde_json::to_string(&sealed).unwrap();
        assert!(!json.contains("hunter2"));
        let restored: EncryptedSecret = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, sealed);

        let debug = format!("{:?}", sealed);
        assert!(debug.contains("bytes"));
        assert!(!debug.contains("nonce"));
    }
}
