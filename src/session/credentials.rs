//! Bearer access token cache, used when cookie auth is unavailable.
//! Credentials are replaced as a whole; the token is kept as a
//! [`SecretString`] and is never logged.

use crate::storage::KeyValueStore;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub access_token: Option<SecretString>,
}

impl Credentials {
    #[must_use]
    pub fn bearer(token: &str) -> Self {
        let token = token.trim();
        Self {
            access_token: (!token.is_empty()).then(|| SecretString::from(token.to_string())),
        }
    }
}

pub struct CredentialStore {
    current: RwLock<Credentials>,
    durable: Arc<dyn KeyValueStore>,
    key: String,
}

impl CredentialStore {
    /// Builds the store and restores a persisted access token, if any.
    pub fn new(durable: Arc<dyn KeyValueStore>, key: &str) -> Self {
        let restored = match durable.get(key) {
            Ok(Some(token)) => Credentials::bearer(&token),
            Ok(None) => Credentials::default(),
            Err(err) => {
                warn!("Failed to read persisted access token: {err}");
                Credentials::default()
            }
        };

        Self {
            current: RwLock::new(restored),
            durable,
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn get(&self) -> Credentials {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.get().access_token
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .is_some()
    }

    /// Replaces the credentials and persists the token.
    pub fn replace(&self, credentials: Credentials) {
        let result = match &credentials.access_token {
            Some(token) => self.durable.set(&self.key, token.expose_secret()),
            None => self.durable.remove(&self.key),
        };
        if let Err(err) = result {
            warn!("Failed to persist access token: {err}");
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    pub fn clear(&self) {
        self.replace(Credentials::default());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn replace_persists_and_clear_removes() {
        let durable = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(durable.clone(), "token");
        assert!(!store.has_token());

        store.replace(Credentials::bearer("abc"));
        assert_eq!(durable.get("token").unwrap().as_deref(), Some("abc"));
        assert_eq!(
            store.access_token().map(|t| t.expose_secret().to_string()),
            Some("abc".to_string())
        );

        let restored = CredentialStore::new(durable.clone(), "token");
        assert!(restored.has_token());

        store.clear();
        assert!(!store.has_token());
        assert_eq!(durable.get("token").unwrap(), None);
    }

    #[test]
    fn blank_bearer_is_no_token() {
        assert!(Credentials::bearer("  ").access_token.is_none());
    }
}
