//! Session layer for admin API clients authenticated by cookies, a CSRF token
//! and an optional bearer fallback token.
//!
//! ## Request flow
//!
//! 1. **Build:** [`api::request::build_headers`] merges caller headers with the
//!    defaults, the cached CSRF token (unsafe methods only), the bearer token and
//!    the admin-scope key.
//! 2. **Execute:** [`api::ApiClient`] sends the request through a [`api::Transport`],
//!    retrying once after a bounded `Retry-After` wait on 429 and once after a
//!    refresh round-trip on 401.
//! 3. **Synchronize:** every response is scanned for a fresher CSRF token before
//!    anything else happens with it.
//! 4. **Classify:** non-2xx responses become an [`ApiError`] with an [`ErrorKind`];
//!    auth and CSRF failures clear the cached state and notify observers.
//!
//! All mutable state lives in a [`session::SessionContext`] built once per
//! application instance and shared by every client.

pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod notify;
pub mod session;
pub mod storage;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub use api::{ApiClient, ApiRequest, ApiResponse};
pub use config::SessionConfig;
pub use errors::{ApiError, ErrorKind, SessionError};
pub use session::SessionContext;
