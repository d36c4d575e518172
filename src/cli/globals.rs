use crate::{
    api::{ApiClient, ReqwestTransport},
    config::SessionConfig,
    notify::{Notice, NoticeLevel, NoticeSink},
    session::SessionContext,
    storage::{FileStore, MemoryStore},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{path::PathBuf, sync::Arc};
use tracing::warn;

/// State file used when `--state-file` is not given.
pub const DEFAULT_STATE_FILE: &str = ".admin-session.json";

#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub base_url: String,
    pub state_file: PathBuf,
    pub admin_key: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            state_file: default_state_file(),
            admin_key: None,
        }
    }

    pub fn set_admin_key(&mut self, key: SecretString) {
        self.admin_key = Some(key);
    }

    /// Builds a session context whose durable scope is the state file.
    #[must_use]
    pub fn context(&self) -> Arc<SessionContext> {
        let config = SessionConfig::from_env().with_base_url(self.base_url.clone());
        let context = SessionContext::builder(config)
            .session_store(Arc::new(MemoryStore::new()))
            .durable_store(Arc::new(FileStore::new(self.state_file.clone())))
            .notice_sink(Arc::new(TerminalSink))
            .build();

        if let Some(key) = &self.admin_key {
            context.set_admin_key(Some(key.expose_secret()));
        }
        context.events().subscribe(|event| {
            warn!(status = event.status, code = ?event.code, "session lost, run `login` again");
        });
        context
    }

    /// Client whose cookie jar is restored from, and saved to, the state file.
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn client(&self) -> Result<ApiClient> {
        let context = self.context();
        let transport =
            ReqwestTransport::with_cookie_store(context.config(), context.durable().clone())
                .context("failed to build HTTP client")?;
        Ok(ApiClient::new(context, Arc::new(transport)))
    }
}

/// `$HOME/.admin-session.json`, or the working directory when `HOME` is unset.
#[must_use]
pub fn default_state_file() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(DEFAULT_STATE_FILE)
}

/// Prints notices to stderr so they are visible regardless of the log level.
struct TerminalSink;

impl NoticeSink for TerminalSink {
    fn notify(&self, notice: &Notice) {
        let label = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        eprintln!("{label}: {}", notice.message);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::storage::KeyValueStore;

    #[test]
    fn test_global_args() {
        let mut args = GlobalArgs::new("https://admin.tld".to_string());
        assert_eq!(args.base_url, "https://admin.tld");
        assert!(args.admin_key.is_none());
        assert!(args.state_file.ends_with(DEFAULT_STATE_FILE));

        args.set_admin_key(SecretString::from("k-1"));
        assert_eq!(args.admin_key.unwrap().expose_secret(), "k-1");
    }

    #[test]
    fn test_context_uses_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = GlobalArgs::new("https://admin.tld".to_string());
        args.state_file = dir.path().join("state.json");
        args.set_admin_key(SecretString::from("k-2"));

        let context = args.context();
        assert_eq!(context.config().api_base_url, "https://admin.tld");
        assert_eq!(context.admin_key().unwrap().expose_secret(), "k-2");
        assert_eq!(context.events().subscriber_count(), 1);

        context
            .credentials()
            .replace(crate::session::credentials::Credentials::bearer("t"));
        assert!(args.state_file.exists());
    }

    #[test]
    fn test_client_restores_cookies_from_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = GlobalArgs::new("https://admin.tld".to_string());
        args.state_file = dir.path().join("state.json");

        let saved = serde_json::json!({"access_token": "access_token=sess-1; Path=/"});
        FileStore::new(&args.state_file)
            .set("admin_session.cookies", &saved.to_string())
            .unwrap();

        let client = args.client().unwrap();
        let cookies = client.transport().cookies("https://admin.tld/users/me");
        assert_eq!(cookies.get("access_token").map(String::as_str), Some("sess-1"));
    }
}
