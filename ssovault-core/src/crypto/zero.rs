//! Zeroization utilities for plaintext credential material.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Replacement text for redacted secret material.
pub const REDACTED: &str = "[REDACTED]";

/// A plaintext secret that is zeroized when dropped
///
/// `Debug` never prints the contents. There is deliberately no `Display`,
/// `Clone` or `Serialize`.
#[derive(ZeroizeOnDrop)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    pub fn new(inner: String) -> Self {
        Self { inner }
    }

    /// Build from UTF-8 bytes, zeroizing the input if it is not valid UTF-8
    pub fn from_utf8(bytes: Vec<u8>) -> Option<Self> {
        match String::from_utf8(bytes) {
            Ok(inner) => Some(Self { inner }),
            Err(err) => {
                err.into_bytes().zeroize();
                None
            }
        }
    }

    /// Borrow the plaintext (use sparingly)
    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(inner: String) -> Self {
        Self::new(inner)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", REDACTED)
    }
}

/// Replace every occurrence of each non-empty needle in `text`
pub fn redact(text: &str, needles: &[&str]) -> String {
    let mut out = text.to_string();
    for needle in needles.iter().filter(|n| !n.is_empty()) {
        if out.contains(needle) {
            let mut replaced = out.replace(needle, REDACTED);
            std::mem::swap(&mut out, &mut replaced);
            replaced.zeroize();
        }
    }
    out
}

/// Replace occurrences of `word` that are not part of a longer word
///
/// Used for identifiers such as usernames, where a short value would
/// otherwise blank out unrelated text.
pub fn redact_word(text: &str, word: &str) -> String {
    let Some(first) = word.chars().next() else {
        return text.to_string();
    };
    let last = word.chars().next_back().unwrap_or(first);
    let separated = |edge: char, neighbour: Option<char>| {
        !edge.is_alphanumeric() || neighbour.map_or(true, |c| !c.is_alphanumeric())
    };

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut from = 0;
    while let Some(offset) = text[from..].find(word) {
        let at = from + offset;
        let end = at + word.len();
        if separated(first, text[..at].chars().next_back())
            && separated(last, text[end..].chars().next())
        {
            out.push_str(&text[copied..at]);
            out.push_str(REDACTED);
            copied = end;
            from = end;
        } else {
            from = at + first.len_utf8();
        }
    }
    out.push_str(&text[copied..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_accessors() {
        let secret = SecretString::from("secret data");
        assert_eq!(secret.expose(), "secret data");
        assert_eq!(secret.len(), 11);
        assert!(!secret.is_empty());
        assert!(SecretString::from("").is_empty());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains(REDACTED));
    }

    #[test]
    fn test_redact_word_keeps_embedded_matches() {
        assert_eq!(
            redact_word("bad password for a", "a"),
            format!("bad password for {}", REDACTED)
        );
        assert_eq!(
            redact_word("user me@example.com locked, retry me@example.com.", "me@example.com"),
            format!("user {} locked, retry {}.", REDACTED, REDACTED)
        );
        assert_eq!(redact_word("anna and hannah", "ann"), "anna and hannah");
        assert_eq!(redact_word("unchanged", ""), "unchanged");
    }

    #[test]
    fn test_from_utf8() {
        assert_eq!(
            SecretString::from_utf8(b"pw".to_vec()).unwrap().expose(),
            "pw"
        );
        assert!(SecretString::from_utf8(vec![0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("login as bob with s3cr3t failed", &["s3cr3t", "bob"]),
            "login as [REDACTED] with [REDACTED] failed"
        );
        assert_eq!(redact("nothing here", &["s3cr3t"]), "nothing here");
        assert_eq!(redact("empty needle", &[""]), "empty needle");
    }
}
