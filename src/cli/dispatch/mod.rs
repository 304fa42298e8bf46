use crate::{
    auth::{DEFAULT_ACTION, Network},
    cli::{
        actions::{Action, server::Args},
        commands::{self, action},
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    let allow_list = matches
        .get_one::<String>(commands::ARG_ALLOW_LIST)
        .map(PathBuf::from)
        .context("missing required argument: --allow-list")?;

    let allow_list_reload_interval = matches
        .get_one::<u64>(commands::ARG_ALLOW_LIST_RELOAD_INTERVAL)
        .copied()
        .filter(|seconds| *seconds > 0)
        .map(Duration::from_secs);

    let network = matches
        .get_one::<Network>(commands::ARG_NETWORK)
        .copied()
        .unwrap_or_default();

    let challenge_ttl = seconds(matches, commands::ARG_CHALLENGE_TTL)?;
    let sweep_interval = seconds(matches, commands::ARG_SWEEP_INTERVAL)?;
    let verify_timeout = matches
        .get_one::<u64>(commands::ARG_VERIFY_TIMEOUT)
        .copied()
        .map(Duration::from_millis)
        .context("missing argument: --verify-timeout")?;

    let action = matches
        .get_one::<String>(action::ARG_ACTION)
        .cloned()
        .unwrap_or_else(|| DEFAULT_ACTION.to_string());

    let webhook_url = matches
        .get_one::<String>(action::ARG_WEBHOOK_URL)
        .map(String::as_str)
        .map(Url::parse)
        .transpose()
        .context("invalid KEYGATE_ACTION_WEBHOOK_URL")?;

    let webhook_token = matches
        .get_one::<String>(action::ARG_WEBHOOK_TOKEN)
        .map(|token| SecretString::from(token.clone()));

    Ok(Action::Server(Args {
        port,
        allow_list,
        allow_list_reload_interval,
        network,
        challenge_ttl,
        sweep_interval,
        verify_timeout,
        action,
        webhook_url,
        webhook_token,
    }))
}

fn seconds(matches: &clap::ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("missing argument: --{id}"))
}
