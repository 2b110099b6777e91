//! Vault entry types

use crate::vault::VaultError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity provider behind a login target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Google,
    Github,
    Microsoft,
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Github => "github",
            Provider::Microsoft => "microsoft",
            Provider::Custom => "custom",
        }
    }

    /// Well-known icon for the provider, if it has one
    pub fn default_icon_url(&self) -> Option<&'static str> {
        match self {
            Provider::Google => Some(
                "https://upload.wikimedia.org/wikipedia/commons/thumb/c/c1/Google_%22G%22_logo.svg/2048px-Google_%22G%22_logo.svg.png",
            ),
            Provider::Github => Some(
                "https://upload.wikimedia.org/wikipedia/commons/thumb/9/91/Octicons-mark-github.svg/640px-Octicons-mark-github.svg.png",
            ),
            Provider::Microsoft => Some(
                "https://upload.wikimedia.org/wikipedia/commons/thumb/4/44/Microsoft_logo.svg/480px-Microsoft_logo.svg.png",
            ),
            Provider::Custom => None,
        }
    }
}

impl FromStr for Provider {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "github" => Ok(Provider::Github),
            "microsoft" => Ok(Provider::Microsoft),
            "custom" => Ok(Provider::Custom),
            other => Err(VaultError::ValidationFailed(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Inactive,
    Revoked,
}

/// Caller-supplied descriptive fields of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub display_name: String,
    pub target_url: String,
    pub provider: Provider,
    /// Login identifier handed to the automation driver; not secret
    pub username: String,
    pub icon_url: Option<String>,
}

impl EntryMetadata {
    pub fn new(
        display_name: impl Into<String>,
        target_url: impl Into<String>,
        provider: Provider,
        username: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            target_url: target_url.into(),
            provider,
            username: username.into(),
            icon_url: None,
        }
    }

    pub fn with_icon_url(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }
}

/// Partial update of an entry's mutable fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub display_name: Option<String>,
    pub target_url: Option<String>,
    pub provider: Option<Provider>,
    pub username: Option<String>,
    pub icon_url: Option<String>,
    pub status: Option<EntryStatus>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A vault entry as returned to callers; carries no secret material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    pub target_url: String,
    pub provider: Provider,
    pub username: String,
    pub icon_url: Option<String>,
    pub status: EntryStatus,
    /// Master key version the secret is currently sealed under
    pub key_version: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultEntry {
    /// Explicit icon, else the provider's well-known icon
    pub fn effective_icon_url(&self) -> Option<&str> {
        self.icon_url
            .as_deref()
            .or_else(|| self.provider.default_icon_url())
    }

    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            display_name: self.display_name.clone(),
            target_url: self.target_url.clone(),
            provider: self.provider,
            username: self.username.clone(),
            icon_url: self.icon_url.clone(),
        }
    }
}
