use crate::auth::DEFAULT_ACTION;
use clap::{Arg, Command};

pub const ARG_ACTION: &str = "action";
pub const ARG_WEBHOOK_URL: &str = "action-webhook-url";
pub const ARG_WEBHOOK_TOKEN: &str = "action-webhook-token";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACTION)
                .long("action")
                .help("Action name reported on a successful verification")
                .default_value(DEFAULT_ACTION)
                .env("KEYGATE_ACTION"),
        )
        .arg(
            Arg::new(ARG_WEBHOOK_URL)
                .long("action-webhook-url")
                .help("POST every grant to this URL (door controller, ticket service)")
                .env("KEYGATE_ACTION_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_WEBHOOK_TOKEN)
                .long("action-webhook-token")
                .help("Bearer token sent with webhook requests")
                .env("KEYGATE_ACTION_WEBHOOK_TOKEN")
                .hide_env_values(true)
                .requires(ARG_WEBHOOK_URL),
        )
}
