//! API client with CSRF synchronization, one-shot auth refresh and bounded
//! rate-limit retry.
//!
//! Flow Overview:
//! 1) Validate the request and assemble headers from the session context.
//! 2) Send through the [`Transport`], racing the caller's cancellation token.
//! 3) Synchronize the CSRF store from the response headers and cookies.
//! 4) On 429 with a usable `Retry-After`, wait once and re-send.
//! 5) On 401 (first attempt, not the refresh endpoint), POST the refresh
//!    endpoint once and re-send once on success.
//! 6) Classify whatever non-2xx response remains and apply its side effects.
//!
//! Concurrent requests do not coordinate: two simultaneous 401s each make their
//! own refresh call.

pub mod auth;
pub mod classify;
pub mod request;
pub mod response;
pub mod retry_after;
pub mod transport;

pub use request::ApiRequest;
pub use response::ApiResponse;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use crate::{
    errors::SessionError,
    notify::Notice,
    session::{detect, SessionContext},
};
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Rate-limit retries allowed per logical request.
const MAX_RATE_LIMIT_RETRIES: u32 = 1;

pub const RATE_LIMIT_GIVE_UP_MESSAGE: &str = "Too many requests. Please try again later.";

/// Lifecycle of one logical request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Init,
    Sent,
    Refreshing,
    RetrySent,
    Done,
    Failed,
}

impl RequestState {
    #[must_use]
    pub fn on_dispatch(self) -> Self {
        match self {
            Self::Init => Self::Sent,
            other => other,
        }
    }

    /// Transition for a terminal response, or a 401 eligible for refresh.
    #[must_use]
    pub fn on_response(self, status: StatusCode, refresh_allowed: bool) -> Self {
        let ok = status.is_success() || status == StatusCode::NOT_MODIFIED;
        match self {
            Self::Sent if status == StatusCode::UNAUTHORIZED && refresh_allowed => Self::Refreshing,
            Self::Sent => Self::Done,
            Self::RetrySent if ok => Self::Done,
            Self::RetrySent => Self::Failed,
            other => other,
        }
    }

    #[must_use]
    pub fn on_refresh(self, refreshed: bool) -> Self {
        match self {
            Self::Refreshing if refreshed => Self::RetrySent,
            Self::Refreshing => Self::Failed,
            other => other,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    context: Arc<SessionContext>,
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(context: Arc<SessionContext>, transport: Arc<dyn Transport>) -> Self {
        Self { context, transport }
    }

    /// Client over a [`ReqwestTransport`] configured from the context.
    /// # Errors
    /// Returns `Config` if the HTTP client cannot be constructed.
    pub fn with_reqwest(context: Arc<SessionContext>) -> Result<Self, SessionError> {
        let transport = ReqwestTransport::new(context.config())?;
        Ok(Self::new(context, Arc::new(transport)))
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Executes one logical request.
    /// # Errors
    /// Returns `InvalidRequest` before any network call for malformed requests,
    /// `Cancelled` when the token fires, `Network`/`Timeout` from the transport and
    /// `Api` with a classified error for non-2xx responses.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        request.validate()?;
        let config = self.context.config();
        let url = config.url_for(&request.path);
        let body = request.encoded_body()?;
        let cancel = request.cancel.clone().unwrap_or_default();
        let refresh_eligible = request.retry && !config.is_refresh_path(&request.path);

        let mut state = RequestState::Init;
        let mut attempts = 0u32;
        let mut rate_limit_retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            state = state.on_dispatch();
            attempts += 1;

            let response = self
                .send_once(&request, &url, body.clone(), attempts, &cancel)
                .await?;
            let status = response.status;

            if status.is_success() || status == StatusCode::NOT_MODIFIED {
                state = state.on_response(status, false);
                trace!(?state, attempts, "request finished");
                return Ok(ApiResponse {
                    status,
                    headers: response.headers,
                    body: response.body,
                    attempts,
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS && state == RequestState::Sent {
                let delay = retry_after::retry_delay(&response.headers, self.context.now_ms());
                if let Some(delay) = delay.filter(|_| rate_limit_retries < MAX_RATE_LIMIT_RETRIES) {
                    rate_limit_retries += 1;
                    self.wait_for_rate_limit(delay, &cancel).await?;
                    continue;
                }
            }

            state = state.on_response(status, refresh_eligible && attempts == 1);
            if state == RequestState::Refreshing {
                if cancel.is_cancelled() {
                    return Err(SessionError::Cancelled);
                }
                let refreshed = match self.refresh_round_trip(&cancel).await {
                    Ok(()) => true,
                    Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                    Err(err) => {
                        warn!("Session refresh failed: {err}");
                        false
                    }
                };
                state = state.on_refresh(refreshed);
                if state == RequestState::RetrySent {
                    continue;
                }
            }

            trace!(?state, attempts, %status, "request failed");
            if status == StatusCode::TOO_MANY_REQUESTS {
                self.context.notify(Notice::error(RATE_LIMIT_GIVE_UP_MESSAGE));
            }
            return Err(self.fail(&request.path, &response));
        }
    }

    /// GET `path` and decode the JSON body.
    /// # Errors
    /// See [`ApiClient::execute`]; also `Parse` when the body does not match `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    /// POST a JSON body to `path` and decode the JSON response.
    /// # Errors
    /// See [`ApiClient::execute`]; also `Serialization` and `Parse`.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SessionError> {
        self.execute(ApiRequest::post(path).json(body)?).await?.json()
    }

    /// DELETE `path`, ignoring any response body.
    /// # Errors
    /// See [`ApiClient::execute`].
    pub async fn delete(&self, path: &str) -> Result<(), SessionError> {
        self.execute(ApiRequest::delete(path)).await.map(|_| ())
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        url: &str,
        body: Option<Bytes>,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, SessionError> {
        let cookies = self.transport.cookies(url);
        let headers = request::build_headers(&self.context, request, &cookies)?;
        debug!(attempt, method = %request.method, path = %request.path, "sending request");

        let outgoing = HttpRequest {
            method: request.method.clone(),
            url: url.to_string(),
            headers,
            body,
        };
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = self.transport.send(outgoing) => result?,
        };

        self.synchronize(url, &response);
        Ok(response)
    }

    /// Response synchronizer: jar cookies overlaid with this response's `Set-Cookie`.
    fn synchronize(&self, url: &str, response: &HttpResponse) {
        let mut cookies = self.transport.cookies(url);
        cookies.extend(detect::response_cookies(&response.headers));
        if self
            .context
            .sync_from_response(&response.headers, &cookies)
            .is_some()
        {
            trace!("csrf token synchronized from response");
        }
    }

    async fn wait_for_rate_limit(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let seconds = delay.as_secs().max(1);
        let unit = if seconds == 1 { "second" } else { "seconds" };
        self.context.notify(Notice::info(format!(
            "Too many requests. Retrying in {seconds} {unit}."
        )));
        debug!(seconds, "waiting before rate-limit retry");

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// One POST to the refresh endpoint. Never refreshes recursively.
    async fn refresh_round_trip(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let config = self.context.config();
        let request = ApiRequest::post(config.refresh_path.clone()).without_retry();
        let url = config.url_for(&request.path);
        debug!("refreshing session");

        let response = self.send_once(&request, &url, None, 1, cancel).await?;
        if response.status.is_success() {
            self.context.sync_from_body(&response.body);
            Ok(())
        } else {
            Err(SessionError::Api(classify::classify(
                response.status,
                &response.headers,
                &response.body,
                self.context.now_ms(),
            )))
        }
    }

    fn fail(&self, path: &str, response: &HttpResponse) -> SessionError {
        let error = classify::classify(
            response.status,
            &response.headers,
            &response.body,
            self.context.now_ms(),
        );
        classify::apply_side_effects(&self.context, &error, path);
        SessionError::Api(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_401_moves_to_refreshing() {
        let state = RequestState::Init.on_dispatch();
        assert_eq!(state, RequestState::Sent);
        assert_eq!(
            state.on_response(StatusCode::UNAUTHORIZED, true),
            RequestState::Refreshing
        );
        assert_eq!(
            state.on_response(StatusCode::UNAUTHORIZED, false),
            RequestState::Done
        );
        assert_eq!(state.on_response(StatusCode::NOT_FOUND, true), RequestState::Done);
    }

    #[test]
    fn refresh_outcome_decides_retry_or_failure() {
        let refreshing = RequestState::Refreshing;
        assert_eq!(refreshing.on_refresh(true), RequestState::RetrySent);
        assert_eq!(refreshing.on_refresh(false), RequestState::Failed);

        let retry = refreshing.on_refresh(true).on_dispatch();
        assert_eq!(retry, RequestState::RetrySent);
        assert_eq!(retry.on_response(StatusCode::OK, true), RequestState::Done);
        assert_eq!(
            retry.on_response(StatusCode::UNAUTHORIZED, true),
            RequestState::Failed
        );
    }
}
