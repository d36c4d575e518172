//! Session layer configuration with compiled-in defaults and optional
//! environment overrides. `ADMIN_SESSION_*` variables let deployments change
//! endpoints and header names without rebuilding. Blank values are ignored.
//! Configuration values are public; do not store secrets here.

use std::{env, time::Duration};

pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";
pub const DEFAULT_CSRF_COOKIE: &str = "XSRF-TOKEN";
pub const DEFAULT_ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const DEFAULT_ADMIN_HEADER: &str = "X-Admin-Key";

/// Default request timeout applied by the reqwest transport.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Window in which identical notices are collapsed into one.
const DEFAULT_NOTICE_WINDOW: Duration = Duration::from_millis(1_500);

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub csrf_header_name: String,
    pub csrf_cookie_name: String,
    pub access_token_cookie: String,
    /// Storage key of the session-scoped CSRF blob.
    pub csrf_session_key: String,
    /// Storage key of the long-lived CSRF blob.
    pub csrf_durable_key: String,
    pub access_token_key: String,
    /// Storage key of the persisted `Set-Cookie` values.
    pub cookie_jar_key: String,
    /// TTL applied to tokens that arrive without a TTL header.
    pub csrf_ttl: Option<Duration>,
    pub refresh_path: String,
    pub login_path: String,
    pub logout_path: String,
    pub me_path: String,
    pub admin_header_name: String,
    /// Privileged path prefixes that are admin-scoped even without an `admin` segment.
    pub admin_prefixes: Vec<String>,
    /// Environment variables consulted, in order, for the admin key.
    pub admin_key_env: Vec<String>,
    /// Storage keys consulted, in order, for the admin key.
    pub admin_key_storage_keys: Vec<String>,
    pub notice_window: Duration,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            csrf_header_name: DEFAULT_CSRF_HEADER.to_string(),
            csrf_cookie_name: DEFAULT_CSRF_COOKIE.to_string(),
            access_token_cookie: DEFAULT_ACCESS_TOKEN_COOKIE.to_string(),
            csrf_session_key: "admin_session.csrf".to_string(),
            csrf_durable_key: "admin_session.csrf.persist".to_string(),
            access_token_key: "admin_session.access_token".to_string(),
            cookie_jar_key: "admin_session.cookies".to_string(),
            csrf_ttl: None,
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/login".to_string(),
            logout_path: "/auth/logout".to_string(),
            me_path: "/users/me".to_string(),
            admin_header_name: DEFAULT_ADMIN_HEADER.to_string(),
            admin_prefixes: vec!["/internal/".to_string(), "/ops/".to_string()],
            admin_key_env: vec![
                "ADMIN_SESSION_ADMIN_KEY".to_string(),
                "ADMIN_KEY".to_string(),
            ],
            admin_key_storage_keys: vec![
                "admin_session.admin_key".to_string(),
                "adminKey".to_string(),
            ],
            notice_window: DEFAULT_NOTICE_WINDOW,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Loads defaults and applies `ADMIN_SESSION_*` environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_overrides(&mut config, env_overrides());
        config
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = base_url.into();
        self
    }

    /// Builds a URL from the configured API base URL and the provided path.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        build_url_with_base(&self.api_base_url, path)
    }

    /// Whether `path` addresses the refresh endpoint, ignoring query and trailing slash.
    #[must_use]
    pub fn is_refresh_path(&self, path: &str) -> bool {
        normalize_path(path) == normalize_path(&self.refresh_path)
    }
}

/// Builds a URL from an explicit base URL and the provided path.
#[must_use]
pub fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() || path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path
        .strip_prefix("http://")
        .or_else(|| path.strip_prefix("https://"))
        .map_or(path, |rest| rest.find('/').map_or("/", |index| &rest[index..]));
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

#[derive(Default)]
struct Overrides {
    api_base_url: Option<String>,
    csrf_header_name: Option<String>,
    csrf_cookie_name: Option<String>,
    csrf_ttl_seconds: Option<u64>,
    refresh_path: Option<String>,
    login_path: Option<String>,
    logout_path: Option<String>,
    me_path: Option<String>,
    admin_header_name: Option<String>,
    admin_prefixes: Option<Vec<String>>,
}

fn env_overrides() -> Overrides {
    let read = |key: &str| env::var(key).ok().and_then(|value| normalize_value(&value));

    Overrides {
        api_base_url: read("ADMIN_SESSION_BASE_URL"),
        csrf_header_name: read("ADMIN_SESSION_CSRF_HEADER"),
        csrf_cookie_name: read("ADMIN_SESSION_CSRF_COOKIE"),
        csrf_ttl_seconds: read("ADMIN_SESSION_CSRF_TTL").and_then(|value| value.parse().ok()),
        refresh_path: read("ADMIN_SESSION_REFRESH_PATH"),
        login_path: read("ADMIN_SESSION_LOGIN_PATH"),
        logout_path: read("ADMIN_SESSION_LOGOUT_PATH"),
        me_path: read("ADMIN_SESSION_ME_PATH"),
        admin_header_name: read("ADMIN_SESSION_ADMIN_HEADER"),
        admin_prefixes: read("ADMIN_SESSION_ADMIN_PREFIXES").map(|value| split_list(&value)),
    }
}

fn apply_overrides(config: &mut SessionConfig, overrides: Overrides) {
    if let Some(value) = overrides.api_base_url {
        config.api_base_url = value;
    }
    if let Some(value) = overrides.csrf_header_name {
        config.csrf_header_name = value;
    }
    if let Some(value) = overrides.csrf_cookie_name {
        config.csrf_cookie_name = value;
    }
    if let Some(seconds) = overrides.csrf_ttl_seconds {
        config.csrf_ttl = (seconds > 0).then(|| Duration::from_secs(seconds));
    }
    if let Some(value) = overrides.refresh_path {
        config.refresh_path = value;
    }
    if let Some(value) = overrides.login_path {
        config.login_path = value;
    }
    if let Some(value) = overrides.logout_path {
        config.logout_path = value;
    }
    if let Some(value) = overrides.me_path {
        config.me_path = value;
    }
    if let Some(value) = overrides.admin_header_name {
        config.admin_header_name = value;
    }
    if let Some(value) = overrides.admin_prefixes {
        config.admin_prefixes = value;
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').filter_map(normalize_value).collect()
}

fn normalize_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
