//! Input validation for vault entries

use crate::crypto::SecretString;
use crate::vault::{EntryMetadata, EntryStatus, MetadataPatch, Result, VaultEntry, VaultError};
use url::Url;

/// Maximum length of a display name, in characters
pub const MAX_DISPLAY_NAME_CHARS: usize = 128;

fn invalid(msg: impl Into<String>) -> VaultError {
    VaultError::ValidationFailed(msg.into())
}

pub(crate) fn validate_display_name(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(invalid("display name must not be empty"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(invalid(format!(
            "display name must be at most {} characters",
            MAX_DISPLAY_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

pub(crate) fn validate_username(username: &str) -> Result<String> {
    if username.trim().is_empty() {
        return Err(invalid("username must not be empty"));
    }
    Ok(username.to_string())
}

/// Absolute http(s) URL with a host
pub(crate) fn validate_url(raw: &str, field: &str) -> Result<String> {
    let url = Url::parse(raw)
        .map_err(|_| invalid(format!("{} is not a valid absolute URL", field)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("{} must use http or https", field)));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid(format!("{} must include a host", field)));
    }
    Ok(raw.to_string())
}

pub(crate) fn validate_secret(secret: &SecretString) -> Result<()> {
    if secret.is_empty() {
        return Err(invalid("secret must not be empty"));
    }
    Ok(())
}

/// Check caller metadata; accepted values are stored exactly as given
pub(crate) fn validate_metadata(metadata: EntryMetadata) -> Result<EntryMetadata> {
    let icon_url = match metadata.icon_url {
        Some(ref icon) => Some(validate_url(icon, "icon URL")?),
        None => None,
    };

    Ok(EntryMetadata {
        display_name: validate_display_name(&metadata.display_name)?,
        target_url: validate_url(&metadata.target_url, "target URL")?,
        provider: metadata.provider,
        username: validate_username(&metadata.username)?,
        icon_url,
    })
}

/// Apply a patch in place and return the names of the fields it touched
///
/// Nothing is modified when validation fails.
pub(crate) fn apply_patch(entry: &mut VaultEntry, patch: MetadataPatch) -> Result<Vec<&'static str>> {
    if patch.is_empty() {
        return Err(invalid("update contains no fields"));
    }

    let mut next = entry.clone();
    let mut changed = Vec::new();

    if let Some(ref name) = patch.display_name {
        next.display_name = validate_display_name(name)?;
        changed.push("display_name");
    }
    if let Some(ref url) = patch.target_url {
        next.target_url = validate_url(url, "target URL")?;
        changed.push("target_url");
    }
    if let Some(provider) = patch.provider {
        next.provider = provider;
        changed.push("provider");
    }
    if let Some(ref username) = patch.username {
        next.username = validate_username(username)?;
        changed.push("username");
    }
    if let Some(ref icon) = patch.icon_url {
        next.icon_url = Some(validate_url(icon, "icon URL")?);
        changed.push("icon_url");
    }
    if let Some(status) = patch.status {
        if entry.status == EntryStatus::Revoked && status != EntryStatus::Revoked {
            return Err(invalid("revoked entries cannot be reactivated"));
        }
        next.status = status;
        changed.push("status");
    }

    *entry = next;
    Ok(changed)
}
