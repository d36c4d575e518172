use crate::errors::SessionError;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, ETAG},
    StatusCode,
};
use serde::de::DeserializeOwned;

/// Successful (2xx or 304) response of a logical request.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Number of network attempts, refresh call excluded.
    pub attempts: u32,
}

impl ApiResponse {
    /// Decodes the body as JSON. Empty bodies decode as `null`.
    /// # Errors
    /// Returns `Parse` if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(body)
            .map_err(|err| SessionError::Parse(format!("Failed to decode response: {err}")))
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).and_then(|value| value.to_str().ok())
    }

    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}
