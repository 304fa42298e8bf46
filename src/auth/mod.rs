//! Wallet-signature authentication.
//!
//! A client asks for a challenge, signs it with the key behind an allow-listed
//! address and presents `{address, message, signature}`. The service grants access
//! only when the address is allowed, the challenge is live and unused, and the
//! signature recovers to that address.

pub mod action;
pub mod allow_list;
pub mod challenge;
pub mod error;
pub mod service;
pub mod verifier;

pub use self::action::{ActionSink, DEFAULT_ACTION, LogActionSink, WebhookActionSink};
pub use self::allow_list::{AllowList, SharedAllowList};
pub use self::challenge::{ChallengeStore, DEFAULT_CHALLENGE_TTL_SECONDS};
pub use self::error::{AllowListError, ChallengeError, Denial, VerifierError};
pub use self::service::{
    AuthenticationService, DEFAULT_VERIFY_TIMEOUT_MS, IssuedChallenge, VerificationRequest,
    VerificationResult,
};
pub use self::verifier::{MessageVerifier, Network, PrefixedMessage, SignatureVerifier};
