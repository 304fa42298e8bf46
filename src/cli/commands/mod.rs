pub mod action;
pub mod logging;

use crate::auth::Network;
use clap::{
    Arg, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub const ARG_PORT: &str = "port";
pub const ARG_ALLOW_LIST: &str = "allow-list";
pub const ARG_ALLOW_LIST_RELOAD_INTERVAL: &str = "allow-list-reload-interval";
pub const ARG_NETWORK: &str = "network";
pub const ARG_CHALLENGE_TTL: &str = "challenge-ttl";
pub const ARG_SWEEP_INTERVAL: &str = "sweep-interval";
pub const ARG_VERIFY_TIMEOUT: &str = "verify-timeout";

#[must_use]
pub fn validator_network() -> ValueParser {
    ValueParser::from(|network: &str| network.parse::<Network>())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("keygate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("KEYGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_ALLOW_LIST)
                .short('a')
                .long("allow-list")
                .help("Path to the allow list, example: allowed_addresses.json")
                .long_help(
                    "Path to a JSON document of the form {\"allowed_addresses\": [\"D...\"]}. Only these addresses can be granted access.",
                )
                .env("KEYGATE_ALLOW_LIST")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ALLOW_LIST_RELOAD_INTERVAL)
                .long("allow-list-reload-interval")
                .help("Seconds between allow list change checks, 0 disables reloading")
                .default_value("10")
                .env("KEYGATE_ALLOW_LIST_RELOAD_INTERVAL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_NETWORK)
                .short('n')
                .long("network")
                .help("Signed-message network: dogecoin, dogecoin-testnet, bitcoin, litecoin")
                .default_value("dogecoin")
                .env("KEYGATE_NETWORK")
                .value_parser(validator_network()),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_TTL)
                .long("challenge-ttl")
                .help("Seconds a challenge stays redeemable")
                .default_value("300")
                .env("KEYGATE_CHALLENGE_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL)
                .long("sweep-interval")
                .help("Seconds between expired challenge sweeps")
                .default_value("60")
                .env("KEYGATE_SWEEP_INTERVAL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_VERIFY_TIMEOUT)
                .long("verify-timeout")
                .help("Milliseconds allowed for a single signature verification")
                .default_value("5000")
                .env("KEYGATE_VERIFY_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        );

    let command = action::with_args(command);
    logging::with_args(command)
}
