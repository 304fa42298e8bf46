use thiserror::Error;

/// Reasons a challenge cannot be redeemed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("challenge not found")]
    NotFound,
    #[error("challenge already consumed")]
    AlreadyConsumed,
    #[error("challenge expired")]
    Expired,
    #[error("presented message does not match the issued challenge")]
    MessageMismatch,
}

/// Failures of the signature verifier itself, as opposed to a negative verdict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifierError {
    #[error("malformed address: {0}")]
    MalformedAddress(String),
    #[error("address belongs to a different network")]
    AddressVersion,
    #[error("invalid signature length: {0}")]
    SignatureLength(usize),
    #[error("unsupported signature header: {0}")]
    SignatureHeader(u8),
    #[error("public key recovery failed: {0}")]
    Recovery(String),
    #[error("verification timed out")]
    Timeout,
    #[error("verification task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum AllowListError {
    #[error("failed to read allow list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid allow list json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid address at position {index}: {address:?}")]
    InvalidAddress { index: usize, address: String },
}

/// Why a verification request was refused.
///
/// The variants are for logs only; clients get the same response for all of them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Denial {
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),
    #[error("address is not allow-listed")]
    UnauthorizedAddress,
    #[error("challenge invalid: {0}")]
    ChallengeInvalid(ChallengeError),
    #[error("malformed signature encoding")]
    MalformedSignature,
    #[error("signature does not match address")]
    InvalidSignature,
    #[error("verifier failure: {0}")]
    VerifierFailure(VerifierError),
}

impl Denial {
    /// Coarse category used as a structured log field.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::UnauthorizedAddress => "unauthorized_address",
            Self::ChallengeInvalid(_) => "challenge_invalid",
            Self::MalformedSignature => "malformed_signature",
            Self::InvalidSignature => "invalid_signature",
            Self::VerifierFailure(_) => "internal_verifier_failure",
        }
    }

    /// Verifier failures point at the deployment rather than the caller.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::VerifierFailure(_))
    }
}
