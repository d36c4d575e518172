//! Network seam for the session layer.
//!
//! [`Transport`] sends one fully-built request and returns the raw response; it
//! never retries or inspects status codes. [`ReqwestTransport`] is the default
//! implementation and keeps a cookie jar so cookie-based sessions work the way
//! they do in a browser. With [`ReqwestTransport::with_cookie_store`] the
//! `Set-Cookie` values it receives are also written to a [`KeyValueStore`] and
//! replayed into the jar on the next start.

use crate::{
    config::SessionConfig, errors::SessionError, session::detect, storage::KeyValueStore,
    APP_USER_AGENT,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, SET_COOKIE},
    Method, StatusCode,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{debug, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request once.
    /// # Errors
    /// Returns `Network` or `Timeout` when no response was received.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionError>;

    /// Cookies the transport would send to `url`.
    fn cookies(&self, _url: &str) -> detect::CookieMap {
        detect::CookieMap::new()
    }
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
    persisted: Option<PersistedCookies>,
}

/// Raw `Set-Cookie` values by cookie name, kept in a key/value store.
struct PersistedCookies {
    store: Arc<dyn KeyValueStore>,
    key: String,
    lock: Mutex<()>,
}

impl PersistedCookies {
    fn load(&self) -> BTreeMap<String, String> {
        let raw = match self.store.get(&self.key) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Failed to read persisted cookies: {err}");
                None
            }
        };
        raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(saved) => Some(saved),
            Err(err) => {
                warn!("Ignoring malformed persisted cookies: {err}");
                None
            }
        })
        .unwrap_or_default()
    }

    fn remember(&self, headers: &HeaderMap) {
        let received: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if received.is_empty() {
            return;
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut saved = self.load();
        for raw in received {
            if let Some((name, _)) = detect::parse_set_cookie(raw) {
                saved.insert(name, raw.trim().to_string());
            }
        }
        let result = serde_json::to_string(&saved)
            .map_err(|err| err.to_string())
            .and_then(|encoded| {
                self.store
                    .set(&self.key, &encoded)
                    .map_err(|err| err.to_string())
            });
        if let Err(err) = result {
            warn!("Failed to persist cookies: {err}");
        }
    }
}

impl ReqwestTransport {
    /// Build a transport with a fresh cookie jar.
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_provider(jar.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SessionError::Config(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            jar,
            persisted: None,
        })
    }

    /// Build a transport whose cookies survive restarts: the jar is seeded from
    /// `store` for the configured base URL and every `Set-Cookie` received is
    /// written back under `config.cookie_jar_key`.
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_cookie_store(
        config: &SessionConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, SessionError> {
        let mut transport = Self::new(config)?;
        let persisted = PersistedCookies {
            store,
            key: config.cookie_jar_key.clone(),
            lock: Mutex::new(()),
        };

        let saved = persisted.load();
        if !saved.is_empty() {
            let base_url = config.url_for("/");
            for raw in saved.values() {
                transport.add_cookie(&base_url, raw);
            }
            debug!(cookies = saved.len(), "restored persisted cookies");
        }
        transport.persisted = Some(persisted);
        Ok(transport)
    }

    /// Seeds the jar, e.g. with cookies restored from a previous run.
    pub fn add_cookie(&self, url: &str, cookie: &str) {
        if let Ok(url) = Url::parse(url) {
            self.jar.add_cookie_str(cookie, &url);
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_request_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        if let Some(persisted) = &self.persisted {
            persisted.remember(&headers);
        }
        let body = response.bytes().await.map_err(map_request_error)?;
        debug!(%status, bytes = body.len(), "response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn cookies(&self, url: &str) -> detect::CookieMap {
        let Ok(url) = Url::parse(url) else {
            return detect::CookieMap::new();
        };
        self.jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(detect::parse_cookie_header))
            .unwrap_or_default()
    }
}

/// Maps reqwest failures into `Timeout` or `Network`.
fn map_request_error(err: reqwest::Error) -> SessionError {
    if err.is_timeout() {
        SessionError::Timeout("Request timed out. Please try again.".to_string())
    } else {
        SessionError::Network(format!("Unable to reach the server: {err}"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::storage::MemoryStore;
    use reqwest::header::HeaderValue;

    const BASE_URL: &str = "https://api.example.tld";

    fn config() -> SessionConfig {
        SessionConfig::default().with_base_url(BASE_URL)
    }

    #[test]
    fn persisted_cookies_seed_the_jar() {
        let store = Arc::new(MemoryStore::new());
        let saved = serde_json::json!({
            "access_token": "access_token=s1; Path=/; HttpOnly",
            "XSRF-TOKEN": "XSRF-TOKEN=c1; Path=/",
        });
        store
            .set("admin_session.cookies", &saved.to_string())
            .unwrap();

        let transport = ReqwestTransport::with_cookie_store(&config(), store).unwrap();
        let cookies = transport.cookies(&format!("{BASE_URL}/users/me"));
        assert_eq!(cookies.get("access_token").map(String::as_str), Some("s1"));
        assert_eq!(cookies.get("XSRF-TOKEN").map(String::as_str), Some("c1"));
    }

    #[test]
    fn received_set_cookie_values_replace_saved_ones_by_name() {
        let store = Arc::new(MemoryStore::new());
        let transport = ReqwestTransport::with_cookie_store(&config(), store.clone()).unwrap();
        let persisted = transport.persisted.as_ref().unwrap();

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("access_token=s1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark"));
        persisted.remember(&headers);

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("access_token=s2; Path=/"));
        persisted.remember(&headers);

        let saved = persisted.load();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved["access_token"], "access_token=s2; Path=/");
        assert_eq!(saved["theme"], "theme=dark");
    }

    #[test]
    fn malformed_saved_cookies_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.set("admin_session.cookies", "{nope").unwrap();

        let transport = ReqwestTransport::with_cookie_store(&config(), store).unwrap();
        assert!(transport.cookies(BASE_URL).is_empty());
    }
}
