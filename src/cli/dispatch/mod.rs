use crate::cli::{
    actions::{request, session, Action},
    commands::{ARG_ADMIN_KEY, ARG_BASE_URL, ARG_STATE_FILE},
    globals::GlobalArgs,
};
use anyhow::{anyhow, Context, Result};
use reqwest::Method;
use secrecy::SecretString;
use std::path::PathBuf;

/// Maps parsed arguments to the [`Action`] to run.
/// # Errors
/// Returns an error if a required argument is missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = global_args(matches)?;

    match matches.subcommand() {
        Some(("login", sub)) => Ok(Action::Login(
            globals,
            session::LoginArgs {
                username: sub
                    .get_one::<String>("username")
                    .cloned()
                    .context("missing required argument: --username")?,
                password: sub
                    .get_one::<String>("password")
                    .map(|password| SecretString::from(password.clone()))
                    .context("missing required argument: --password")?,
            },
        )),
        Some(("logout", _)) => Ok(Action::Logout(globals)),
        Some(("me", _)) => Ok(Action::Me(globals)),
        Some(("status", _)) => Ok(Action::Status(globals)),
        Some(("request", sub)) => Ok(Action::Request(globals, request_args(sub)?)),
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}

fn global_args(matches: &clap::ArgMatches) -> Result<GlobalArgs> {
    let base_url = matches
        .get_one::<String>(ARG_BASE_URL)
        .cloned()
        .context("missing required argument: --base-url")?;

    let mut globals = GlobalArgs::new(base_url);
    if let Some(path) = matches.get_one::<PathBuf>(ARG_STATE_FILE) {
        globals.state_file.clone_from(path);
    }
    if let Some(key) = matches.get_one::<String>(ARG_ADMIN_KEY) {
        globals.set_admin_key(SecretString::from(key.clone()));
    }
    Ok(globals)
}

fn request_args(matches: &clap::ArgMatches) -> Result<request::Args> {
    let method = matches
        .get_one::<String>("method")
        .context("missing required argument: <method>")?;
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method: {method}"))?;

    let json = matches
        .get_one::<String>("json")
        .map(|raw| serde_json::from_str(raw).context("--json is not valid JSON"))
        .transpose()?;

    let headers = matches
        .get_many::<String>("header")
        .into_iter()
        .flatten()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>>>()?;

    Ok(request::Args {
        method,
        path: matches
            .get_one::<String>("path")
            .cloned()
            .context("missing required argument: <path>")?,
        json,
        data: matches.get_one::<String>("data").cloned(),
        headers,
        if_none_match: matches.get_one::<String>("if-none-match").cloned(),
    })
}

/// Parses `Name: value`.
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("invalid header, expected 'Name: value': {raw}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("invalid header, empty name: {raw}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
