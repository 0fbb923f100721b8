//! Secrets kept in the system keyring via Secret Service.

use std::collections::HashMap;

use crate::error::KeyringError;

pub(crate) const SERVICE_NAME: &str = "scribble";

/// The secrets the client keeps outside its config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    GeminiApiKey,
    /// Supabase refresh token of the signed-in session.
    SupabaseSession,
}

impl Secret {
    fn kind(self) -> &'static str {
        match self {
            Secret::GeminiApiKey => "gemini-api-key",
            Secret::SupabaseSession => "supabase-session",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Secret::GeminiApiKey => "Scribble Gemini API key",
            Secret::SupabaseSession => "Scribble Supabase session",
        }
    }

    fn attributes(self) -> HashMap<&'static str, &'static str> {
        let mut attrs = HashMap::new();
        attrs.insert("service", SERVICE_NAME);
        attrs.insert("kind", self.kind());
        attrs
    }
}

async fn connect() -> Result<oo7::Keyring, KeyringError> {
    oo7::Keyring::new()
        .await
        .map_err(|e| KeyringError::Connect(e.to_string()))
}

/// Store (or replace) a secret.
pub async fn store(secret: Secret, value: &str) -> Result<(), KeyringError> {
    let keyring = connect().await?;
    keyring
        .create_item(secret.label(), &secret.attributes(), value.as_bytes(), true)
        .await
        .map_err(|e| KeyringError::Operation(e.to_string()))?;
    log::info!("Stored {} in keyring", secret.kind());
    Ok(())
}

pub async fn load(secret: Secret) -> Result<Option<String>, KeyringError> {
    let keyring = connect().await?;
    let items = keyring
        .search_items(&secret.attributes())
        .await
        .map_err(|e| KeyringError::Operation(e.to_string()))?;

    let Some(item) = items.first() else {
        return Ok(None);
    };
    let bytes = item
        .secret()
        .await
        .map_err(|e| KeyringError::Operation(e.to_string()))?;
    let value = String::from_utf8(bytes.to_vec()).map_err(|_| KeyringError::InvalidUtf8)?;
    Ok(Some(value).filter(|v| !v.is_empty()))
}

pub async fn delete(secret: Secret) -> Result<(), KeyringError> {
    let keyring = connect().await?;
    let items = keyring
        .search_items(&secret.attributes())
        .await
        .map_err(|e| KeyringError::Operation(e.to_string()))?;
    for item in items {
        item.delete()
            .await
            .map_err(|e| KeyringError::Operation(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_told_apart_by_kind() {
        let key = Secret::GeminiApiKey.attributes();
        let session = Secret::SupabaseSession.attributes();
        assert_eq!(key["service"], SERVICE_NAME);
        assert_eq!(session["service"], SERVICE_NAME);
        assert_ne!(key["kind"], session["kind"]);
    }
}
