use crate::{cli::globals::GlobalArgs, session::SessionContext};
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

#[derive(Debug)]
pub struct LoginArgs {
    pub username: String,
    pub password: SecretString,
}

/// # Errors
/// Returns an error if the server rejects the login.
#[instrument(skip_all)]
pub async fn login(globals: &GlobalArgs, args: LoginArgs) -> Result<()> {
    let client = globals.client()?;
    let response = client
        .login(&args.username, &args.password)
        .await
        .context("login failed")?;

    info!(state_file = %globals.state_file.display(), "session stored");
    println!(
        "{}",
        json!({
            "ok": response.is_ok(),
            "csrf": response.csrf_token.is_some(),
            "bearer": response.access_token.is_some(),
        })
    );
    Ok(())
}

/// Local state is cleared even when the server call fails.
/// # Errors
/// Returns the server error after clearing local state.
pub async fn logout(globals: &GlobalArgs) -> Result<()> {
    let client = globals.client()?;
    let result = client.logout().await;
    forget_cookies(client.context());
    result.context("logout failed")?;
    Ok(())
}

/// Drops the cookies saved by previous runs.
fn forget_cookies(context: &SessionContext) {
    if let Err(err) = context.durable().remove(&context.config().cookie_jar_key) {
        warn!("Failed to remove persisted cookies: {err}");
    }
}

/// Names of the cookies saved by previous runs; values stay private.
fn saved_cookie_names(context: &SessionContext) -> Vec<String> {
    context
        .durable()
        .get(&context.config().cookie_jar_key)
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str::<BTreeMap<String, String>>(&raw).ok())
        .map(|saved| saved.into_keys().collect())
        .unwrap_or_default()
}

/// # Errors
/// Returns an error if the request fails.
pub async fn me(globals: &GlobalArgs) -> Result<()> {
    let client = globals.client()?;
    let user: Value = client.me().await.context("failed to fetch current user")?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

/// Prints the stored session state without contacting the server.
/// # Errors
/// Returns an error if the state cannot be rendered.
pub fn status(globals: &GlobalArgs) -> Result<()> {
    let context = globals.context();
    let report = status_report(globals, &context);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn status_report(globals: &GlobalArgs, context: &SessionContext) -> Value {
    let csrf = context.csrf().state().map(|state| {
        json!({
            "header": state.header_name,
            "cookie": state.cookie_name,
            "expires_at": state
                .expires_at
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(|at| at.to_rfc3339()),
        })
    });

    json!({
        "base_url": context.config().api_base_url,
        "state_file": globals.state_file.display().to_string(),
        "csrf": csrf,
        "bearer": context.credentials().has_token(),
        "cookies": saved_cookie_names(context),
        "admin_key": context.admin_key().is_some(),
    })
}
