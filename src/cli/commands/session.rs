use clap::{Arg, ArgAction, Command};

pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_STATE_FILE: &str = "state-file";
pub const ARG_ADMIN_KEY: &str = "admin-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_URL)
                .long("base-url")
                .help("API base URL, example: https://api.example.tld")
                .env("ADMIN_SESSION_BASE_URL")
                .global(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_STATE_FILE)
                .long("state-file")
                .help("File holding the durable session state (default: $HOME/.admin-session.json)")
                .env("ADMIN_SESSION_STATE_FILE")
                .global(true)
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new(ARG_ADMIN_KEY)
                .long("admin-key")
                .help("Admin key sent on admin-scoped paths")
                .env("ADMIN_SESSION_ADMIN_KEY")
                .hide_env_values(true)
                .global(true),
        )
}

#[must_use]
pub fn subcommands(command: Command) -> Command {
    command
        .subcommand_required(true)
        .subcommand(
            Command::new("login")
                .about("Sign in and store the returned session tokens")
                .arg(
                    Arg::new("username")
                        .short('u')
                        .long("username")
                        .help("Account name")
                        .env("ADMIN_SESSION_USERNAME")
                        .required(true),
                )
                .arg(
                    Arg::new("password")
                        .long("password")
                        .help("Account password")
                        .env("ADMIN_SESSION_PASSWORD")
                        .hide_env_values(true)
                        .required(true),
                ),
        )
        .subcommand(Command::new("logout").about("Sign out and clear local session state"))
        .subcommand(Command::new("me").about("Show the signed-in user"))
        .subcommand(Command::new("status").about("Show the locally stored session state"))
        .subcommand(
            Command::new("request")
                .about("Send one request through the session layer")
                .arg(
                    Arg::new("method")
                        .help("HTTP method")
                        .required(true)
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(Arg::new("path").help("Request path").required(true))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("JSON request body"),
                )
                .arg(
                    Arg::new("data")
                        .long("data")
                        .help("Raw request body"),
                )
                .arg(
                    Arg::new("header")
                        .short('H')
                        .long("header")
                        .help("Extra header, example: 'Accept: text/plain'")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("if-none-match")
                        .long("if-none-match")
                        .help("Send If-None-Match with this ETag"),
                ),
        )
}
