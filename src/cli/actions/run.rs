use crate::cli::actions::{request, session, Action};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Login(globals, args) => session::login(&globals, args).await,
        Action::Logout(globals) => session::logout(&globals).await,
        Action::Me(globals) => session::me(&globals).await,
        Action::Status(globals) => session::status(&globals),
        Action::Request(globals, args) => request::execute(&globals, args).await,
    }
}
