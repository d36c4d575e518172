//! CSRF token store with lazy expiry and two-scope persistence.
//!
//! The token is written to the session-scoped store and to the durable store on
//! every successful `set`, and restored from the first of the two that holds a
//! valid, unexpired blob. Expiry is compared against the clock when the token is
//! read; no timer is ever scheduled.

use super::detect::{self, CookieMap};
use crate::{clock::Clock, config::SessionConfig, storage::KeyValueStore};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use tracing::{debug, warn};

/// Persisted CSRF state. `expires_at` is epoch milliseconds; `None` never expires.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfState {
    pub token: String,
    #[serde(rename = "expiresAt", default)]
    pub expires_at: Option<i64>,
    #[serde(rename = "header")]
    pub header_name: String,
    #[serde(rename = "cookie")]
    pub cookie_name: String,
}

impl CsrfState {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now_ms >= expires_at)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ttl {
    Seconds(u64),
    Millis(u64),
}

impl Ttl {
    #[must_use]
    pub fn as_duration(self) -> Duration {
        match self {
            Self::Seconds(seconds) => Duration::from_secs(seconds),
            Self::Millis(millis) => Duration::from_millis(millis),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CsrfSetOptions {
    /// Lifetime of this token; falls back to the store's TTL policy.
    pub ttl: Option<Ttl>,
    /// Header name to send and detect from now on.
    pub header_name: Option<String>,
    /// Cookie name to detect from now on.
    pub cookie_name: Option<String>,
}

struct Inner {
    state: Option<CsrfState>,
    header_name: String,
    cookie_name: String,
    ttl_policy: Option<Duration>,
}

pub struct CsrfStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    session: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    session_key: String,
    durable_key: String,
}

impl CsrfStore {
    /// Builds the store and restores any persisted, unexpired token.
    pub fn new(
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
        session: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
    ) -> Self {
        let store = Self {
            inner: RwLock::new(Inner {
                state: None,
                header_name: config.csrf_header_name.clone(),
                cookie_name: config.csrf_cookie_name.clone(),
                ttl_policy: config.csrf_ttl,
            }),
            clock,
            session,
            durable,
            session_key: config.csrf_session_key.clone(),
            durable_key: config.csrf_durable_key.clone(),
        };
        store.restore();
        store
    }

    /// Cached token, or `None` when absent or expired.
    pub fn get(&self) -> Option<String> {
        self.state().map(|state| state.token)
    }

    /// Cached state, dropping it first if it has expired.
    pub fn state(&self) -> Option<CsrfState> {
        let now = self.clock.now_ms();
        let expired = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            match &inner.state {
                None => return None,
                Some(state) if !state.is_expired(now) => return Some(state.clone()),
                Some(state) => state.clone(),
            }
        };

        if self.clear_if_current(&expired) {
            debug!("csrf token expired");
        }
        None
    }

    /// Clears `expected` only if it is still the stored state; a token set in
    /// the meantime is kept.
    fn clear_if_current(&self, expected: &CsrfState) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.state.as_ref() != Some(expected) {
            return false;
        }
        inner.state = None;
        self.remove_persisted();
        true
    }

    #[must_use]
    pub fn header_name(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .header_name
            .clone()
    }

    #[must_use]
    pub fn cookie_name(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cookie_name
            .clone()
    }

    /// Stores a token. Empty tokens are ignored and `false` is returned.
    pub fn set(&self, token: &str, options: CsrfSetOptions) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }

        let now = self.clock.now_ms();
        let state = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(name) = options.header_name.filter(|n| !n.trim().is_empty()) {
                inner.header_name = name.trim().to_string();
            }
            if let Some(name) = options.cookie_name.filter(|n| !n.trim().is_empty()) {
                inner.cookie_name = name.trim().to_string();
            }
            let ttl = options.ttl.map(Ttl::as_duration).or(inner.ttl_policy);
            let state = CsrfState {
                token: token.to_string(),
                expires_at: ttl.map(|ttl| expires_at(now, ttl)),
                header_name: inner.header_name.clone(),
                cookie_name: inner.cookie_name.clone(),
            };
            inner.state = Some(state.clone());
            // Persisted under the lock so a concurrent clear cannot interleave.
            self.persist(&state);
            state
        };

        debug!(expires_at = ?state.expires_at, "csrf token stored");
        true
    }

    /// Drops the token from memory and from both stores. Learned names are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.state = None;
        self.remove_persisted();
    }

    fn remove_persisted(&self) {
        for (store, key) in [
            (&self.session, &self.session_key),
            (&self.durable, &self.durable_key),
        ] {
            if let Err(err) = store.remove(key) {
                warn!("Failed to remove persisted csrf state: {err}");
            }
        }
    }

    /// Synchronizes the store from a response. Returns the token when one was detected.
    ///
    /// A header token wins over a cookie token. A fallback match adopts the matched
    /// name for future requests. A TTL header replaces the store's TTL policy.
    pub fn observe(&self, headers: &HeaderMap, cookies: &CookieMap) -> Option<String> {
        let header_name = self.header_name();
        let cookie_name = self.cookie_name();
        let ttl = detect::ttl_from_headers(headers);

        let mut options = CsrfSetOptions::default();
        let token = if let Some((name, value)) = detect::detect_header(headers, &header_name) {
            if !name.eq_ignore_ascii_case(&header_name) {
                debug!(header = %name, "adopting csrf header name");
                options.header_name = Some(name);
            }
            value
        } else if let Some((name, value)) = detect::detect_cookie(cookies, &cookie_name) {
            if !name.eq_ignore_ascii_case(&cookie_name) {
                debug!(cookie = %name, "adopting csrf cookie name");
                options.cookie_name = Some(name);
            }
            value
        } else {
            if let Some(ttl) = ttl {
                self.set_ttl_policy(Some(ttl));
            }
            return None;
        };

        if let Some(ttl) = ttl {
            self.set_ttl_policy(Some(ttl));
        } else if options.header_name.is_none()
            && options.cookie_name.is_none()
            && self.get().as_deref() == Some(token.as_str())
        {
            // Same token seen again; keep its original expiry.
            return Some(token);
        }

        self.set(&token, options);
        Some(token)
    }

    fn set_ttl_policy(&self, ttl: Option<Duration>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .ttl_policy = ttl;
    }

    fn persist(&self, state: &CsrfState) {
        let encoded = match serde_json::to_string(state) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!("Failed to encode csrf state: {err}");
                return;
            }
        };

        for (store, key) in [
            (&self.session, &self.session_key),
            (&self.durable, &self.durable_key),
        ] {
            if let Err(err) = store.set(key, &encoded) {
                warn!("Failed to persist csrf state: {err}");
            }
        }
    }

    fn restore(&self) {
        let now = self.clock.now_ms();
        let restored = [
            (&self.session, &self.session_key),
            (&self.durable, &self.durable_key),
        ]
        .into_iter()
        .find_map(|(store, key)| {
            let raw = match store.get(key) {
                Ok(raw) => raw?,
                Err(err) => {
                    warn!("Failed to read persisted csrf state: {err}");
                    return None;
                }
            };
            match decode_state(&raw) {
                Some(state) if !state.is_expired(now) => Some(state),
                Some(_) => None,
                None => {
                    warn!(key = %key, "ignoring malformed persisted csrf state");
                    None
                }
            }
        });

        if let Some(state) = restored {
            debug!("restored persisted csrf token");
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if !state.header_name.trim().is_empty() {
                inner.header_name.clone_from(&state.header_name);
            }
            if !state.cookie_name.trim().is_empty() {
                inner.cookie_name.clone_from(&state.cookie_name);
            }
            inner.state = Some(state);
        }
    }
}

fn decode_state(raw: &str) -> Option<CsrfState> {
    serde_json::from_str::<CsrfState>(raw)
        .ok()
        .filter(|state| !state.token.trim().is_empty())
}

fn expires_at(now_ms: i64, ttl: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}
