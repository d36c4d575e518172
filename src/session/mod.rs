//! Process-wide session state shared by every API client.
//!
//! A [`SessionContext`] is built once at bootstrap, restores persisted tokens,
//! and is injected into [`crate::api::ApiClient`]. Tests build isolated
//! instances with their own stores and clock. [`SessionContext::reset`] is the
//! logout step.

pub mod credentials;
pub mod csrf;
pub mod detect;
pub mod events;

use crate::{
    clock::{Clock, SystemClock},
    config::SessionConfig,
    notify::{Notice, NoticeSink, Notifier, TracingSink},
    storage::{KeyValueStore, MemoryStore},
};
use credentials::{CredentialStore, Credentials};
use csrf::{CsrfSetOptions, CsrfStore};
use detect::CookieMap;
use events::{AuthEvents, AuthLost};
use reqwest::header::HeaderMap;
use secrecy::SecretString;
use serde_json::Value;
use std::{
    env,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, warn};

/// Body fields that may carry a CSRF token on login and refresh responses.
const BODY_TOKEN_FIELDS: [&str; 3] = ["csrf_token", "csrfToken", "csrf"];

pub struct SessionContext {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    session_store: Arc<dyn KeyValueStore>,
    durable_store: Arc<dyn KeyValueStore>,
    csrf: CsrfStore,
    credentials: CredentialStore,
    events: AuthEvents,
    notifier: Notifier,
    admin_key: RwLock<Option<SecretString>>,
}

pub struct SessionContextBuilder {
    config: SessionConfig,
    clock: Option<Arc<dyn Clock>>,
    session_store: Option<Arc<dyn KeyValueStore>>,
    durable_store: Option<Arc<dyn KeyValueStore>>,
    sink: Option<Arc<dyn NoticeSink>>,
}

impl SessionContextBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn session_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    #[must_use]
    pub fn durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable_store = Some(store);
        self
    }

    #[must_use]
    pub fn notice_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the context and restores persisted CSRF and bearer state.
    #[must_use]
    pub fn build(self) -> Arc<SessionContext> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let session_store = self
            .session_store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let durable_store = self
            .durable_store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));

        let csrf = CsrfStore::new(
            &self.config,
            clock.clone(),
            session_store.clone(),
            durable_store.clone(),
        );
        let credentials =
            CredentialStore::new(durable_store.clone(), &self.config.access_token_key);
        let notifier = Notifier::new(sink, clock.clone(), self.config.notice_window);

        Arc::new(SessionContext {
            config: self.config,
            clock,
            session_store,
            durable_store,
            csrf,
            credentials,
            events: AuthEvents::new(),
            notifier,
            admin_key: RwLock::new(None),
        })
    }
}

impl SessionContext {
    #[must_use]
    pub fn builder(config: SessionConfig) -> SessionContextBuilder {
        SessionContextBuilder {
            config,
            clock: None,
            session_store: None,
            durable_store: None,
            sink: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfStore {
        &self.csrf
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Store that survives restarts, shared with collaborators such as the
    /// cookie-persisting transport.
    #[must_use]
    pub fn durable(&self) -> &Arc<dyn KeyValueStore> {
        &self.durable_store
    }

    #[must_use]
    pub fn events(&self) -> &AuthEvents {
        &self.events
    }

    /// Emits a de-duplicated notice. Returns whether it reached the sink.
    pub fn notify(&self, notice: Notice) -> bool {
        self.notifier.notify(notice)
    }

    /// Refreshes the CSRF store from a response's headers and cookies.
    pub fn sync_from_response(&self, headers: &HeaderMap, cookies: &CookieMap) -> Option<String> {
        self.csrf.observe(headers, cookies)
    }

    /// Adopts a CSRF token carried in a JSON response body, if any.
    pub fn sync_from_body(&self, body: &[u8]) -> Option<String> {
        let value: Value = serde_json::from_slice(body).ok()?;
        let token = BODY_TOKEN_FIELDS
            .iter()
            .find_map(|field| value.get(field).and_then(Value::as_str))
            .map(str::trim)
            .filter(|token| !token.is_empty())?
            .to_string();

        if self.csrf.get().as_deref() != Some(token.as_str()) {
            debug!("csrf token adopted from response body");
            self.csrf.set(&token, CsrfSetOptions::default());
        }
        Some(token)
    }

    /// Clears local auth state and notifies auth-lost observers.
    pub fn auth_lost(&self, event: &AuthLost) {
        self.credentials.clear();
        self.csrf.clear();
        self.events.emit(event);
    }

    /// Logout lifecycle step: forgets the CSRF token and bearer credentials.
    pub fn reset(&self) {
        self.csrf.clear();
        self.credentials.replace(Credentials::default());
    }

    /// Sets or clears the runtime admin key, which takes precedence over
    /// environment variables and stored keys.
    pub fn set_admin_key(&self, key: Option<&str>) {
        let key = key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| SecretString::from(key.to_string()));
        *self.admin_key.write().unwrap_or_else(PoisonError::into_inner) = key;
    }

    /// Discovers the admin key: runtime value, then environment, then storage.
    #[must_use]
    pub fn admin_key(&self) -> Option<SecretString> {
        if let Some(key) = self
            .admin_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Some(key);
        }

        let from_env = self.config.admin_key_env.iter().find_map(|name| {
            env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        });

        from_env
            .or_else(|| {
                self.config.admin_key_storage_keys.iter().find_map(|key| {
                    [&self.session_store, &self.durable_store]
                        .into_iter()
                        .find_map(|store| match store.get(key) {
                            Ok(value) => value
                                .map(|value| value.trim().to_string())
                                .filter(|value| !value.is_empty()),
                            Err(err) => {
                                warn!("Failed to read admin key from storage: {err}");
                                None
                            }
                        })
                })
            })
            .map(SecretString::from)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use secrecy::ExposeSecret;

    fn exposed(key: Option<SecretString>) -> Option<String> {
        key.map(|key| key.expose_secret().to_string())
    }

    #[test]
    fn admin_key_discovery_order() {
        let durable = Arc::new(MemoryStore::new());
        let context = SessionContext::builder(SessionConfig::default())
            .durable_store(durable.clone())
            .build();

        temp_env::with_vars(
            [
                ("ADMIN_SESSION_ADMIN_KEY", None::<&str>),
                ("ADMIN_KEY", None::<&str>),
            ],
            || {
                assert_eq!(exposed(context.admin_key()), None);

                durable.set("adminKey", "stored").unwrap();
                assert_eq!(exposed(context.admin_key()).as_deref(), Some("stored"));
            },
        );

        temp_env::with_vars([("ADMIN_KEY", Some("from-env"))], || {
            assert_eq!(exposed(context.admin_key()).as_deref(), Some("from-env"));

            context.set_admin_key(Some("runtime"));
            assert_eq!(exposed(context.admin_key()).as_deref(), Some("runtime"));

            context.set_admin_key(None);
            assert_eq!(exposed(context.admin_key()).as_deref(), Some("from-env"));
        });
    }

    #[test]
    fn body_token_is_adopted() {
        let context = SessionContext::builder(SessionConfig::default()).build();

        assert_eq!(
            context.sync_from_body(br#"{"ok":true,"csrf_token":"from-body"}"#).as_deref(),
            Some("from-body")
        );
        assert_eq!(context.csrf().get().as_deref(), Some("from-body"));

        assert_eq!(context.sync_from_body(b"not json"), None);
        assert_eq!(context.sync_from_body(br#"{"csrf_token":""}"#), None);
        assert_eq!(context.csrf().get().as_deref(), Some("from-body"));
    }

    #[test]
    fn reset_clears_tokens() {
        let context = SessionContext::builder(SessionConfig::default()).build();
        context.csrf().set("tok", CsrfSetOptions::default());
        context.credentials().replace(Credentials::bearer("bearer"));

        context.reset();

        assert_eq!(context.csrf().get(), None);
        assert!(!context.credentials().has_token());
    }

    #[test]
    fn auth_lost_clears_state_and_emits() {
        let context = SessionContext::builder(SessionConfig::default()).build();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = seen.clone();
        context.events().subscribe(move |event| {
            seen_clone.write().unwrap().push(event.status);
        });
        context.csrf().set("tok", CsrfSetOptions::default());
        context.credentials().replace(Credentials::bearer("bearer"));

        context.auth_lost(&AuthLost {
            status: 401,
            code: None,
            path: None,
        });

        assert_eq!(context.csrf().get(), None);
        assert!(!context.credentials().has_token());
        assert_eq!(*seen.read().unwrap(), vec![401]);
    }
}
