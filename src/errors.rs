use reqwest::StatusCode;
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

/// Failure taxonomy used to decide local side effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// 401, or 403 carrying the `missing_token` marker.
    AuthLost,
    /// 403 with a CSRF-family code.
    CsrfRejected,
    /// 429 that could not be recovered by the single bounded retry.
    RateLimited,
    /// Any other 403 with a server-provided message.
    Forbidden,
    Generic,
}

/// Structured error for a non-2xx API response.
#[derive(Clone, Debug)]
pub struct ApiError {
    pub status: u16,
    pub code: Option<String>,
    pub retry_after_seconds: Option<u64>,
    pub message: String,
    pub raw_body: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub kind: ErrorKind,
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(
                formatter,
                "Request failed ({}, {code}): {}",
                self.status, self.message
            ),
            None => write!(formatter, "Request failed ({}): {}", self.status, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Response error: {0}")]
    Parse(String),
    #[error("Request error: {0}")]
    Serialization(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl SessionError {
    /// Taxonomy of the failure; transport and caller errors are `Generic`.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(err) => err.kind,
            _ => ErrorKind::Generic,
        }
    }

    #[must_use]
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.api().map(|err| err.status)
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.api().and_then(|err| err.code.as_deref())
    }
}
