//! Error classification for non-2xx responses.
//!
//! [`classify`] is pure: it builds an [`ApiError`] from the status, headers and
//! body, degrading to an opaque message when the body is not the
//! `{ "error": { "code", "message", "extra" } }` envelope. [`apply_side_effects`]
//! then mutates session state and raises notices, in priority order.

use super::retry_after;
use crate::{
    errors::{ApiError, ErrorKind},
    notify::Notice,
    session::{events::AuthLost, SessionContext},
};
use reqwest::{header::HeaderMap, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Maximum number of body characters surfaced as a message.
const MAX_ERROR_CHARS: usize = 200;

pub const MISSING_TOKEN_CODE: &str = "missing_token";
pub const CSRF_CODES: [&str; 3] = ["csrf_failed", "csrf_mismatch", "csrf_denied"];

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
pub const CSRF_REJECTED_MESSAGE: &str =
    "Your security token was rejected. Refresh and retry the request.";

/// Builds a structured error from a non-2xx response.
#[must_use]
pub fn classify(status: StatusCode, headers: &HeaderMap, body: &[u8], now_ms: i64) -> ApiError {
    let raw_body = String::from_utf8_lossy(body).into_owned();
    let envelope = parse_envelope(body);
    let code = envelope.as_ref().and_then(|e| e.code.clone());
    let lowered = raw_body.to_lowercase();

    let kind = match status {
        StatusCode::UNAUTHORIZED => ErrorKind::AuthLost,
        StatusCode::FORBIDDEN
            if code.as_deref() == Some(MISSING_TOKEN_CODE)
                || lowered.contains(MISSING_TOKEN_CODE) =>
        {
            ErrorKind::AuthLost
        }
        StatusCode::FORBIDDEN
            if code.as_deref().is_some_and(|code| CSRF_CODES.contains(&code))
                || lowered.contains("csrf") =>
        {
            ErrorKind::CsrfRejected
        }
        StatusCode::FORBIDDEN => ErrorKind::Forbidden,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        _ => ErrorKind::Generic,
    };

    let message = envelope
        .and_then(|e| e.message)
        .or_else(|| sanitize_body(&raw_body))
        .unwrap_or_else(|| fallback_message(status));

    ApiError {
        status: status.as_u16(),
        code,
        retry_after_seconds: retry_after::from_headers(headers, now_ms),
        message,
        raw_body: (!raw_body.is_empty()).then_some(raw_body),
        headers: snapshot_headers(headers),
        kind,
    }
}

/// Applies the local consequences of a classified error.
pub fn apply_side_effects(context: &SessionContext, error: &ApiError, path: &str) {
    debug!(status = error.status, kind = ?error.kind, code = ?error.code, "classified API error");

    match error.kind {
        ErrorKind::AuthLost => {
            context.auth_lost(&AuthLost {
                status: error.status,
                code: error.code.clone(),
                path: Some(path.to_string()),
            });
            if error.status == StatusCode::FORBIDDEN.as_u16() {
                context.notify(Notice::error(SESSION_EXPIRED_MESSAGE));
            }
        }
        ErrorKind::CsrfRejected => {
            context.csrf().clear();
            context.notify(Notice::warning(CSRF_REJECTED_MESSAGE));
        }
        ErrorKind::Forbidden if error.code.is_some() => {
            context.notify(Notice::error(error.message.clone()));
        }
        // Rate limiting is reported by the executor; the rest surface to the caller only.
        ErrorKind::Forbidden | ErrorKind::RateLimited | ErrorKind::Generic => {}
    }
}

struct Envelope {
    code: Option<String>,
    message: Option<String>,
}

fn parse_envelope(body: &[u8]) -> Option<Envelope> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let text = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    match value.get("error") {
        Some(error @ Value::Object(_)) => Some(Envelope {
            code: text(error.get("code")),
            message: text(error.get("message")).or_else(|| text(value.get("message"))),
        }),
        Some(Value::String(message)) => Some(Envelope {
            code: None,
            message: text(Some(&Value::String(message.clone()))),
        }),
        _ => Some(Envelope {
            code: text(value.get("code")),
            message: text(value.get("message")),
        }),
    }
}

/// Trims and truncates a body for user-facing messages.
fn sanitize_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.chars().take(MAX_ERROR_CHARS).collect())
}

fn fallback_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("Request failed: {reason}."),
        None => "Request failed.".to_string(),
    }
}

fn snapshot_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut snapshot = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            snapshot
                .entry(name.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};

    fn classify_body(status: u16, body: &str) -> ApiError {
        classify(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            &HeaderMap::new(),
            body.as_bytes(),
            0,
        )
    }

    #[test]
    fn envelope_code_and_message_are_extracted() {
        let err = classify_body(403, r#"{"error":{"code":"csrf_failed","message":"Denied"}}"#);
        assert_eq!(err.kind, ErrorKind::CsrfRejected);
        assert_eq!(err.code.as_deref(), Some("csrf_failed"));
        assert_eq!(err.message, "Denied");
        assert_eq!(
            err.raw_body.as_deref(),
            Some(r#"{"error":{"code":"csrf_failed","message":"Denied"}}"#)
        );
    }

    #[test]
    fn status_and_markers_select_kind() {
        assert_eq!(classify_body(401, "").kind, ErrorKind::AuthLost);
        assert_eq!(
            classify_body(403, r#"{"error":{"code":"missing_token"}}"#).kind,
            ErrorKind::AuthLost
        );
        assert_eq!(classify_body(403, "missing_token").kind, ErrorKind::AuthLost);
        assert_eq!(
            classify_body(403, r#"{"error":{"code":"csrf_mismatch"}}"#).kind,
            ErrorKind::CsrfRejected
        );
        assert_eq!(classify_body(403, "CSRF check failed").kind, ErrorKind::CsrfRejected);
        assert_eq!(
            classify_body(403, r#"{"error":{"code":"not_operator","message":"Operators only"}}"#)
                .kind,
            ErrorKind::Forbidden
        );
        assert_eq!(classify_body(429, "").kind, ErrorKind::RateLimited);
        assert_eq!(classify_body(500, "boom").kind, ErrorKind::Generic);
    }

    #[test]
    fn malformed_json_degrades_to_opaque_message() {
        let err = classify_body(500, "{\"error\": {oops");
        assert_eq!(err.code, None);
        assert_eq!(err.message, "{\"error\": {oops");

        let long = "x".repeat(500);
        assert_eq!(classify_body(502, &long).message.len(), MAX_ERROR_CHARS);

        let err = classify_body(503, "   ");
        assert_eq!(err.message, "Request failed: Service Unavailable.");
    }

    #[test]
    fn flat_and_string_envelopes_are_understood() {
        let err = classify_body(400, r#"{"code":"bad_input","message":"Name is required"}"#);
        assert_eq!(err.code.as_deref(), Some("bad_input"));
        assert_eq!(err.message, "Name is required");

        let err = classify_body(400, r#"{"error":"Broken payload"}"#);
        assert_eq!(err.code, None);
        assert_eq!(err.message, "Broken payload");
    }

    #[test]
    fn retry_after_and_headers_are_captured() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        headers.append("x-trace", HeaderValue::from_static("a"));
        headers.append("x-trace", HeaderValue::from_static("b"));

        let err = classify(StatusCode::TOO_MANY_REQUESTS, &headers, b"", 0);
        assert_eq!(err.retry_after_seconds, Some(7));
        assert_eq!(err.header("X-Trace"), Some("a, b"));
        assert_eq!(err.raw_body, None);
    }
}
