//! Pure CSRF token detection over response headers and cookie maps.
//!
//! Both detectors try the configured name first (case-insensitive) and then
//! fall back to the first name containing `csrf` or `xsrf`. They return the
//! matched name so the caller can adopt it for future requests. Nothing here
//! touches the network or session state.

use regex::Regex;
use reqwest::header::{HeaderMap, SET_COOKIE};
use std::{borrow::Cow, collections::BTreeMap, sync::OnceLock, time::Duration};

/// Cookie name to value, in name order.
pub type CookieMap = BTreeMap<String, String>;

/// Headers expressing the remaining token lifetime, in seconds.
pub const TTL_HEADERS: [&str; 4] = [
    "x-csrf-ttl",
    "x-csrf-ttl-seconds",
    "x-csrf-expires-in",
    "x-csrf-expires",
];

fn csrf_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)csrf|xsrf").ok())
        .as_ref()
}

/// Whether a header or cookie name looks like it carries a CSRF token.
#[must_use]
pub fn looks_like_csrf(name: &str) -> bool {
    match csrf_name_pattern() {
        Some(pattern) => pattern.is_match(name),
        None => {
            let lowered = name.to_ascii_lowercase();
            lowered.contains("csrf") || lowered.contains("xsrf")
        }
    }
}

fn is_ttl_header(name: &str) -> bool {
    TTL_HEADERS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Finds a CSRF token in response headers.
#[must_use]
pub fn detect_header(headers: &HeaderMap, configured: &str) -> Option<(String, String)> {
    if !configured.trim().is_empty() {
        if let Some(value) = header_text(headers, configured.trim()) {
            return Some((configured.trim().to_string(), value));
        }
    }

    headers
        .keys()
        .map(|name| name.as_str())
        .filter(|name| !is_ttl_header(name) && looks_like_csrf(name))
        .find_map(|name| header_text(headers, name).map(|value| (name.to_string(), value)))
}

/// Finds a CSRF token in a cookie map.
#[must_use]
pub fn detect_cookie(cookies: &CookieMap, configured: &str) -> Option<(String, String)> {
    let usable = |value: &String| !value.trim().is_empty();

    if let Some((name, value)) = cookies
        .iter()
        .find(|(name, value)| name.eq_ignore_ascii_case(configured) && usable(value))
    {
        return Some((name.clone(), value.trim().to_string()));
    }

    cookies
        .iter()
        .find(|(name, value)| looks_like_csrf(name) && usable(value))
        .map(|(name, value)| (name.clone(), value.trim().to_string()))
}

/// Parses a `Cookie` request header (`a=1; b=2`).
#[must_use]
pub fn parse_cookie_header(raw: &str) -> CookieMap {
    raw.split(';').filter_map(split_pair).collect()
}

/// Parses the name and value of a single `Set-Cookie` header, ignoring attributes.
#[must_use]
pub fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    raw.split(';').next().and_then(split_pair)
}

/// Cookies set by a response through `Set-Cookie`.
#[must_use]
pub fn response_cookies(headers: &HeaderMap) -> CookieMap {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}

fn split_pair(pair: &str) -> Option<(String, String)> {
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');
    Some((name.to_string(), decode_cookie_value(value)))
}

/// Decodes `%XX` escapes, keeping the raw value when it does not decode to UTF-8.
fn decode_cookie_value(value: &str) -> String {
    if !value.contains('%') {
        return value.to_string();
    }
    urlencoding::decode(value)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| value.to_string())
}

/// Remaining token lifetime announced by the response, if any.
#[must_use]
pub fn ttl_from_headers(headers: &HeaderMap) -> Option<Duration> {
    TTL_HEADERS.iter().find_map(|name| {
        let seconds: f64 = header_text(headers, name)?.parse().ok()?;
        if seconds > 0.0 {
            Duration::try_from_secs_f64(seconds).ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    #[test]
    fn configured_header_wins_case_insensitively() {
        let map = headers(&[("x-other-csrf", "other"), ("X-CSRF-Token", "primary")]);
        assert_eq!(
            detect_header(&map, "x-csrf-token"),
            Some(("x-csrf-token".to_string(), "primary".to_string()))
        );
    }

    #[test]
    fn fallback_adopts_any_csrf_like_header() {
        let map = headers(&[("content-type", "application/json"), ("X-Test-CSRF", "abc123")]);
        let (name, value) = detect_header(&map, "X-CSRF-Token").unwrap_or_default();
        assert!(name.eq_ignore_ascii_case("X-Test-CSRF"));
        assert_eq!(value, "abc123");

        let map = headers(&[("X-XSRF-Value", "xyz")]);
        assert_eq!(
            detect_header(&map, "X-CSRF-Token").map(|(_, value)| value),
            Some("xyz".to_string())
        );
    }

    #[test]
    fn ttl_headers_and_blank_values_are_not_tokens() {
        let map = headers(&[("X-CSRF-TTL", "30"), ("X-CSRF-Expires-In", "30")]);
        assert_eq!(detect_header(&map, "X-CSRF-Token"), None);

        let map = headers(&[("X-CSRF-Token", "  ")]);
        assert_eq!(detect_header(&map, "X-CSRF-Token"), None);
    }

    #[test]
    fn cookie_detection_prefers_configured_name() {
        let cookies = parse_cookie_header("my_csrf=fallback; XSRF-TOKEN=primary; theme=dark");
        assert_eq!(
            detect_cookie(&cookies, "xsrf-token"),
            Some(("XSRF-TOKEN".to_string(), "primary".to_string()))
        );

        let cookies = parse_cookie_header("theme=dark; my_csrf=fallback");
        assert_eq!(
            detect_cookie(&cookies, "XSRF-TOKEN"),
            Some(("my_csrf".to_string(), "fallback".to_string()))
        );

        let cookies = parse_cookie_header("theme=dark; session=1");
        assert_eq!(detect_cookie(&cookies, "XSRF-TOKEN"), None);
    }

    #[test]
    fn set_cookie_attributes_are_ignored() {
        assert_eq!(
            parse_set_cookie("XSRF-TOKEN=abc%3D%3D; Path=/; SameSite=Strict"),
            Some(("XSRF-TOKEN".to_string(), "abc==".to_string()))
        );
        assert_eq!(parse_set_cookie("garbage"), None);

        let map = headers(&[
            ("set-cookie", "XSRF-TOKEN=one; Path=/"),
            ("set-cookie", "access_token=two; HttpOnly"),
        ]);
        let cookies = response_cookies(&map);
        assert_eq!(cookies.get("XSRF-TOKEN").map(String::as_str), Some("one"));
        assert_eq!(cookies.get("access_token").map(String::as_str), Some("two"));
    }

    #[test]
    fn malformed_percent_sequences_are_kept() {
        assert_eq!(decode_cookie_value("a%2"), "a%2");
        assert_eq!(decode_cookie_value("a%zz"), "a%zz");
        assert_eq!(decode_cookie_value("%41b"), "Ab");
    }

    #[test]
    fn ttl_is_read_from_any_candidate() {
        let map = headers(&[("X-CSRF-Expires-In", "90")]);
        assert_eq!(ttl_from_headers(&map), Some(Duration::from_secs(90)));

        let map = headers(&[("X-CSRF-TTL", "1.5")]);
        assert_eq!(ttl_from_headers(&map), Some(Duration::from_millis(1_500)));

        let map = headers(&[("X-CSRF-TTL", "soon"), ("X-CSRF-Expires", "-4")]);
        assert_eq!(ttl_from_headers(&map), None);
    }

    #[test]
    fn out_of_range_ttl_values_are_ignored() {
        for raw in ["1e30", "inf", "-inf", "NaN", "-5", "0", "1e400"] {
            let map = headers(&[("X-CSRF-TTL", raw)]);
            assert_eq!(ttl_from_headers(&map), None, "value {raw}");
        }

        // A later candidate still applies when an earlier one is unusable.
        let map = headers(&[("X-CSRF-TTL", "1e30"), ("X-CSRF-Expires-In", "45")]);
        assert_eq!(ttl_from_headers(&map), Some(Duration::from_secs(45)));
    }
}
