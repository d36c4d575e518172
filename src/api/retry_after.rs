//! `Retry-After` parsing.
//!
//! The header is either delta-seconds or an HTTP date. Dates are converted to a
//! delta against the caller's clock and never go negative. The delay used for
//! the single rate-limit retry is clamped to [`MIN_DELAY`, `MAX_DELAY`].

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

pub const MIN_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Raw seconds from a `Retry-After` value, unclamped.
#[must_use]
pub fn parse_seconds(raw: &str, now_ms: i64) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds);
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        return (seconds.is_finite() && seconds >= 0.0).then(|| seconds.ceil() as u64);
    }

    let at = parse_http_date(raw)?;
    let delta_ms = at.timestamp_millis().saturating_sub(now_ms).max(0);
    Some(u64::try_from(delta_ms).unwrap_or_default().div_ceil(1_000))
}

/// Seconds from the response's `Retry-After` header, unclamped.
#[must_use]
pub fn from_headers(headers: &HeaderMap, now_ms: i64) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| parse_seconds(raw, now_ms))
}

/// Delay to wait before the rate-limit retry, clamped to `[1s, 60s]`.
#[must_use]
pub fn retry_delay(headers: &HeaderMap, now_ms: i64) -> Option<Duration> {
    from_headers(headers, now_ms).map(clamp)
}

#[must_use]
pub fn clamp(seconds: u64) -> Duration {
    Duration::from_secs(seconds).clamp(MIN_DELAY, MAX_DELAY)
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    // RFC 850 and asctime forms are still allowed by RFC 9110.
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
