//! Client wrappers for the backend auth endpoints. Login stores whatever
//! credentials the server hands back; logout always resets local state, even
//! when the server call fails.

use super::{ApiClient, ApiRequest};
use crate::{
    errors::SessionError,
    session::{credentials::Credentials, csrf::CsrfSetOptions},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Body of a `POST /auth/login` response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl LoginResponse {
    /// A missing `ok` field counts as success; the status code already said 2xx.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.ok.unwrap_or(true)
    }
}

impl ApiClient {
    /// Logs in and caches the returned CSRF and bearer tokens.
    /// A 401 here is a rejected login, so no refresh is attempted.
    /// # Errors
    /// Returns the classified error when the server rejects the login.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, SessionError> {
        let payload = json!({
            "username": username,
            "password": password.expose_secret(),
        });
        let request = ApiRequest::post(self.context.config().login_path.clone())
            .json_value(payload)
            .without_retry();

        let response = self.execute(request).await?;
        let login: LoginResponse = response.json::<Option<LoginResponse>>()?.unwrap_or_default();

        if let Some(token) = login.csrf_token.as_deref() {
            self.context.csrf().set(token, CsrfSetOptions::default());
        }
        if let Some(token) = login.access_token.as_deref() {
            self.context.credentials().replace(Credentials::bearer(token));
        }
        info!(ok = login.is_ok(), "login completed");
        Ok(login)
    }

    /// Logs out on the server and resets local session state.
    /// # Errors
    /// Returns the server error, after local state has been reset anyway.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<(), SessionError> {
        let request = ApiRequest::post(self.context.config().logout_path.clone()).without_retry();
        let result = self.execute(request).await.map(|_| ());
        self.context.reset();
        result
    }

    /// Fetches the current user.
    /// # Errors
    /// See [`ApiClient::execute`].
    pub async fn me<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        let path = self.context.config().me_path.clone();
        self.get_json(&path).await
    }

    /// Runs one refresh round-trip outside the 401 flow, e.g. at startup.
    /// # Errors
    /// Returns the refresh endpoint's error without touching session state.
    pub async fn refresh(&self, cancel: Option<CancellationToken>) -> Result<(), SessionError> {
        self.refresh_round_trip(&cancel.unwrap_or_default()).await
    }
}
