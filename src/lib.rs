//! # Keygate (Wallet Key Access Control)
//!
//! `keygate` is a small HTTP front door that admits the holder of a wallet private key
//! without ever seeing that key. It issues one-time challenges, accepts a signed
//! response and checks the signature against a pre-authorized list of addresses.
//! A successful check fires a configurable downstream action (open a door, validate a
//! ticket, unlock content).
//!
//! ## Challenge lifecycle
//!
//! 1. `GET /generate-challenge` mints `"<unix-timestamp>-<random-hex>"` and returns it
//!    together with its SHA-256 token. The token is what gets displayed (QR code); the
//!    message is what gets signed.
//! 2. The wallet signs the message using the network's signed-message scheme.
//! 3. `POST /verify-signature` submits `address`, `message` and `signature`.
//!
//! Every challenge is single use and expires after a configurable TTL. Consumption is
//! recorded before the signature check runs, so a challenge can never be used to try
//! more than one signature.
//!
//! ## Denials
//!
//! Callers only ever see `access denied`. The specific reason (unknown address,
//! stale challenge, bad signature) is kept in the logs.

pub mod auth;
pub mod cli;
pub mod keygate;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
