//! Challenge issuance and verification orchestration.
//!
//! Verification order:
//! 1) allow-list membership (no cryptographic work for unknown addresses);
//! 2) signature transport decoding;
//! 3) challenge redemption, which consumes it for good;
//! 4) domain-separated message construction;
//! 5) signature verification on a blocking task, bounded by a timeout;
//! 6) the grant action.

use super::{
    action::ActionSink,
    allow_list::SharedAllowList,
    challenge::{ChallengeStore, challenge_token},
    error::{Denial, VerifierError},
    verifier::{Network, PrefixedMessage, SignatureVerifier},
};
use base64ct::{Base64, Encoding};
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval, timeout},
};
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 5000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub token: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationRequest {
    pub address: String,
    pub message: String,
    /// Standard base64 of the 65-byte compact signature.
    pub signature: String,
    /// Token received at generation time. Derived from `message` when absent.
    pub token: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VerificationResult {
    Granted(String),
    Denied(Denial),
}

impl VerificationResult {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

pub struct AuthenticationService {
    challenges: ChallengeStore,
    allow_list: SharedAllowList,
    verifier: Arc<dyn SignatureVerifier>,
    action_sink: Arc<dyn ActionSink>,
    message_prefix: String,
    verify_timeout: Duration,
}

impl AuthenticationService {
    #[must_use]
    pub fn new(
        challenges: ChallengeStore,
        allow_list: SharedAllowList,
        verifier: Arc<dyn SignatureVerifier>,
        action_sink: Arc<dyn ActionSink>,
    ) -> Self {
        Self {
            challenges,
            allow_list,
            verifier,
            action_sink,
            message_prefix: Network::default().message_prefix().to_string(),
            verify_timeout: Duration::from_millis(DEFAULT_VERIFY_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_message_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.message_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_verify_timeout(mut self, verify_timeout: Duration) -> Self {
        self.verify_timeout = verify_timeout;
        self
    }

    #[must_use]
    pub fn message_prefix(&self) -> &str {
        &self.message_prefix
    }

    #[must_use]
    pub fn allow_list(&self) -> &SharedAllowList {
        &self.allow_list
    }

    pub async fn pending_challenges(&self) -> usize {
        self.challenges.len().await
    }

    pub async fn generate_challenge(&self) -> IssuedChallenge {
        let challenge = self.challenges.issue().await;
        IssuedChallenge {
            token: challenge.token().to_string(),
            message: challenge.message().to_string(),
        }
    }

    /// Run the full verification flow and fire the grant action on success.
    #[instrument(skip(self, request), fields(address = %request.address))]
    pub async fn verify(&self, request: VerificationRequest) -> VerificationResult {
        match self.authorize(request).await {
            Ok(address) => {
                self.action_sink.on_granted(&address);
                VerificationResult::Granted(address)
            }
            Err(denial) => {
                if denial.is_internal() {
                    error!(category = denial.category(), "Verification failed: {denial}");
                } else {
                    warn!(category = denial.category(), "Verification denied: {denial}");
                }
                VerificationResult::Denied(denial)
            }
        }
    }

    async fn authorize(&self, request: VerificationRequest) -> Result<String, Denial> {
        let address = request.address;
        if !self.allow_list.is_allowed(&address) {
            return Err(Denial::UnauthorizedAddress);
        }

        let signature = Base64::decode_vec(request.signature.trim())
            .map_err(|_| Denial::MalformedSignature)?;
        if signature.is_empty() {
            return Err(Denial::MalformedSignature);
        }

        let token = request
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map_or_else(|| challenge_token(&request.message), ToString::to_string);

        // From here on the challenge is spent, whatever the signature turns out to be.
        let challenge = self
            .challenges
            .try_consume(&token, &request.message)
            .await
            .map_err(Denial::ChallengeInvalid)?;

        let message = PrefixedMessage::new(self.message_prefix.clone(), challenge.message());
        let verifier = self.verifier.clone();
        let signer = address.clone();
        let task =
            tokio::task::spawn_blocking(move || verifier.verify(&signer, &message, &signature));

        match timeout(self.verify_timeout, task).await {
            Err(_) => Err(Denial::VerifierFailure(VerifierError::Timeout)),
            Ok(Err(join_error)) => Err(Denial::VerifierFailure(VerifierError::Task(
                join_error.to_string(),
            ))),
            Ok(Ok(Err(verifier_error))) => Err(Denial::VerifierFailure(verifier_error)),
            Ok(Ok(Ok(false))) => Err(Denial::InvalidSignature),
            Ok(Ok(Ok(true))) => Ok(address),
        }
    }

    /// Evict expired challenges. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        self.challenges.sweep().await
    }

    /// Run `sweep_expired` every `period` until the returned task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let removed = service.sweep_expired().await;
                if removed > 0 {
                    debug!(removed, "Swept expired challenges");
                }
            }
        })
    }
}

impl std::fmt::Debug for AuthenticationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationService")
            .field("challenges", &self.challenges)
            .field("message_prefix", &self.message_prefix)
            .field("verify_timeout", &self.verify_timeout)
            .finish_non_exhaustive()
    }
}
