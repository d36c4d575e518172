//! Request description and final header assembly.
//!
//! Header precedence, first writer wins:
//! 1. caller-supplied headers;
//! 2. `Accept: application/json`;
//! 3. `Content-Type: application/json` when a JSON payload is present;
//! 4. `If-None-Match` for conditional requests;
//! 5. the CSRF header, unsafe methods only, when a token is cached;
//! 6. `Authorization: Bearer`, skipped on safe methods when an access-token cookie exists;
//! 7. the admin-scope key, admin paths only, when a key is discoverable.

use crate::{
    config::SessionConfig,
    errors::SessionError,
    session::{detect::CookieMap, SessionContext},
};
use bytes::Bytes;
use reqwest::{
    header::{
        HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH,
    },
    Method,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const JSON: &str = "application/json";

/// One logical API call. Built fluently and consumed by [`super::ApiClient::execute`].
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
    pub body: Option<Bytes>,
    pub if_none_match: Option<String>,
    /// Whether a 401 may trigger the refresh round-trip.
    pub retry: bool,
    pub cancel: Option<CancellationToken>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            json: None,
            body: None,
            if_none_match: None,
            retry: true,
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json_value(mut self, value: Value) -> Self {
        self.json = Some(value);
        self
    }

    /// Serializes `payload` as the JSON body.
    /// # Errors
    /// Returns `Serialization` if the payload cannot be encoded.
    pub fn json<B: Serialize>(self, payload: &B) -> Result<Self, SessionError> {
        let value = serde_json::to_value(payload).map_err(|err| {
            SessionError::Serialization(format!("Failed to encode request: {err}"))
        })?;
        Ok(self.json_value(value))
    }

    /// Raw body, e.g. media uploads; set a `Content-Type` header alongside it.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    /// Disables the 401 refresh round-trip for this request.
    #[must_use]
    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn is_safe(&self) -> bool {
        is_safe_method(&self.method)
    }

    /// Rejects requests that can never be sent.
    /// # Errors
    /// Returns `InvalidRequest` when both a JSON payload and a raw body are set.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.json.is_some() && self.body.is_some() {
            return Err(SessionError::InvalidRequest(
                "a request cannot carry both a JSON payload and a raw body".to_string(),
            ));
        }
        Ok(())
    }

    /// Encoded request body.
    /// # Errors
    /// Returns `Serialization` if the JSON payload cannot be encoded.
    pub fn encoded_body(&self) -> Result<Option<Bytes>, SessionError> {
        match (&self.json, &self.body) {
            (Some(value), _) => serde_json::to_vec(value)
                .map(|bytes| Some(Bytes::from(bytes)))
                .map_err(|err| {
                    SessionError::Serialization(format!("Failed to encode request: {err}"))
                }),
            (None, body) => Ok(body.clone()),
        }
    }
}

/// GET and HEAD are treated as side-effect free and never carry the CSRF header.
#[must_use]
pub fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Whether `path` addresses an admin-scoped endpoint.
#[must_use]
pub fn is_admin_path(config: &SessionConfig, path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path
        .strip_prefix("http://")
        .or_else(|| path.strip_prefix("https://"))
        .map_or(path, |rest| rest.find('/').map_or("", |index| &rest[index..]));

    if path
        .split('/')
        .any(|segment| segment.eq_ignore_ascii_case("admin"))
    {
        return true;
    }

    config
        .admin_prefixes
        .iter()
        .filter(|prefix| !prefix.trim().is_empty())
        .any(|prefix| path.starts_with(prefix.trim()))
}

/// Assembles the final header set for one attempt of `request`.
/// `cookies` are the cookies the transport will send with it.
/// # Errors
/// Returns `InvalidRequest` if a caller-supplied header is not a valid header.
pub fn build_headers(
    context: &SessionContext,
    request: &ApiRequest,
    cookies: &CookieMap,
) -> Result<HeaderMap, SessionError> {
    let config = context.config();
    let mut headers = HeaderMap::new();

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|err| {
            SessionError::InvalidRequest(format!("invalid header name {name:?}: {err}"))
        })?;
        let value = HeaderValue::from_str(value.trim()).map_err(|err| {
            SessionError::InvalidRequest(format!("invalid value for header {name}: {err}"))
        })?;
        headers.append(name, value);
    }

    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static(JSON));
    }

    if request.json.is_some() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    }

    if let Some(etag) = &request.if_none_match {
        if !headers.contains_key(IF_NONE_MATCH) {
            insert_generated(&mut headers, IF_NONE_MATCH, etag);
        }
    }

    if !request.is_safe() {
        if let Some(token) = context.csrf().get() {
            match HeaderName::from_bytes(context.csrf().header_name().as_bytes()) {
                Ok(name) if !headers.contains_key(&name) => {
                    insert_generated(&mut headers, name, &token);
                }
                Ok(_) => {}
                Err(err) => warn!("Configured csrf header name is invalid: {err}"),
            }
        }
    }

    if !headers.contains_key(AUTHORIZATION) {
        let cookie_auth = cookies
            .keys()
            .any(|name| name.eq_ignore_ascii_case(&config.access_token_cookie));
        if !(request.is_safe() && cookie_auth) {
            if let Some(token) = context.credentials().access_token() {
                insert_generated(
                    &mut headers,
                    AUTHORIZATION,
                    &format!("Bearer {}", token.expose_secret()),
                );
            }
        }
    }

    if is_admin_path(config, &request.path) {
        match HeaderName::from_bytes(config.admin_header_name.as_bytes()) {
            Ok(name) if !headers.contains_key(&name) => {
                if let Some(key) = context.admin_key() {
                    insert_generated(&mut headers, name, key.expose_secret());
                }
            }
            Ok(_) => {}
            Err(err) => warn!("Configured admin header name is invalid: {err}"),
        }
    }

    Ok(headers)
}

/// Inserts a header produced from session state; unusable values are skipped.
fn insert_generated(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(mut value) => {
            if name == AUTHORIZATION || name.as_str().contains("key") {
                value.set_sensitive(true);
            }
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, "skipping header with an unencodable value"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::session::{credentials::Credentials, csrf::CsrfSetOptions};
    use std::sync::Arc;

    fn context() -> Arc<SessionContext> {
        SessionContext::builder(SessionConfig::default()).build()
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).and_then(|value| value.to_str().ok())
    }

    #[test]
    fn defaults_and_caller_overrides() {
        let context = context();
        let request = ApiRequest::post("/v1/items")
            .json_value(serde_json::json!({"name": "a"}))
            .header("Accept", "text/csv");

        let headers = build_headers(&context, &request, &CookieMap::new()).unwrap();
        assert_eq!(header(&headers, "accept"), Some("text/csv"));
        assert_eq!(header(&headers, "content-type"), Some(JSON));

        let request = ApiRequest::post("/v1/upload")
            .body(Bytes::from_static(b"\x89PNG"))
            .header("Content-Type", "image/png");
        let headers = build_headers(&context, &request, &CookieMap::new()).unwrap();
        assert_eq!(header(&headers, "accept"), Some(JSON));
        assert_eq!(header(&headers, "content-type"), Some("image/png"));
    }

    #[test]
    fn csrf_header_only_on_unsafe_methods() {
        let context = context();
        context.csrf().set("tok", CsrfSetOptions::default());

        for method in [Method::GET, Method::HEAD] {
            let headers =
                build_headers(&context, &ApiRequest::new(method, "/v1/x"), &CookieMap::new())
                    .unwrap();
            assert_eq!(header(&headers, "x-csrf-token"), None);
        }
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let headers =
                build_headers(&context, &ApiRequest::new(method, "/v1/x"), &CookieMap::new())
                    .unwrap();
            assert_eq!(header(&headers, "x-csrf-token"), Some("tok"));
        }
    }

    #[test]
    fn bearer_skipped_on_safe_methods_with_cookie_auth() {
        let context = context();
        context.credentials().replace(Credentials::bearer("bearer"));
        let cookies = CookieMap::from([("access_token".to_string(), "c".to_string())]);

        let get = build_headers(&context, &ApiRequest::get("/users/me"), &cookies).unwrap();
        assert_eq!(header(&get, "authorization"), None);

        let no_cookies = CookieMap::new();
        let get = build_headers(&context, &ApiRequest::get("/users/me"), &no_cookies).unwrap();
        assert_eq!(header(&get, "authorization"), Some("Bearer bearer"));

        let post = build_headers(&context, &ApiRequest::post("/v1/x"), &cookies).unwrap();
        assert_eq!(header(&post, "authorization"), Some("Bearer bearer"));

        let explicit = ApiRequest::post("/v1/x").header("Authorization", "Bearer caller");
        let post = build_headers(&context, &explicit, &cookies).unwrap();
        assert_eq!(header(&post, "authorization"), Some("Bearer caller"));
    }

    #[test]
    fn conditional_get_sends_if_none_match() {
        let headers = build_headers(
            &context(),
            &ApiRequest::get("/v1/report").if_none_match("\"v1\""),
            &CookieMap::new(),
        )
        .unwrap();
        assert_eq!(header(&headers, "if-none-match"), Some("\"v1\""));
    }

    #[test]
    fn admin_path_predicate() {
        let config = SessionConfig::default();
        assert!(is_admin_path(&config, "/admin/metrics"));
        assert!(is_admin_path(&config, "/v1/auth/admin/infra?x=1"));
        assert!(is_admin_path(&config, "https://api.local/admin"));
        assert!(is_admin_path(&config, "/internal/jobs"));
        assert!(is_admin_path(&config, "/ops/flags"));
        assert!(!is_admin_path(&config, "/public/metrics"));
        assert!(!is_admin_path(&config, "/administrators"));
        assert!(!is_admin_path(&config, "/v1/internal"));
    }

    #[test]
    fn admin_key_only_on_admin_paths() {
        let context = context();
        context.set_admin_key(Some("secret"));

        let headers =
            build_headers(&context, &ApiRequest::get("/admin/metrics"), &CookieMap::new()).unwrap();
        assert_eq!(header(&headers, "x-admin-key"), Some("secret"));
        assert!(headers.get("x-admin-key").unwrap().is_sensitive());

        let public = ApiRequest::get("/public/metrics");
        let headers = build_headers(&context, &public, &CookieMap::new()).unwrap();
        assert_eq!(header(&headers, "x-admin-key"), None);
    }

    #[test]
    fn invalid_caller_header_is_rejected() {
        let request = ApiRequest::get("/v1/x").header("bad header", "v");
        assert!(matches!(
            build_headers(&context(), &request, &CookieMap::new()),
            Err(SessionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn json_and_raw_body_together_is_invalid() {
        let request = ApiRequest::post("/v1/x")
            .json_value(serde_json::json!({}))
            .body("raw");
        assert!(matches!(request.validate(), Err(SessionError::InvalidRequest(_))));
        assert!(ApiRequest::post("/v1/x").body("raw").validate().is_ok());
    }
}
