pub mod request;
pub mod session;

use crate::cli::globals::GlobalArgs;

// The match over actions lives in `run` so this file stays small.
mod run;

#[derive(Debug)]
pub enum Action {
    Login(GlobalArgs, session::LoginArgs),
    Logout(GlobalArgs),
    Me(GlobalArgs),
    Status(GlobalArgs),
    Request(GlobalArgs, request::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
