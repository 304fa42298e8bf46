//! Signed-message verification.
//!
//! `SignatureVerifier` is the seam the authentication service calls through; any
//! deterministic, side-effect free backend can sit behind it. `MessageVerifier` is the
//! built-in backend for the Bitcoin family of "signed message" schemes used by
//! Dogecoin, Bitcoin and Litecoin wallets:
//!
//! - digest: `sha256d(varint(len(prefix)) || prefix || varint(len(body)) || body)`
//! - signature: 65 bytes, header `27..=34` followed by compact `r || s`
//! - address: `base58check(version || ripemd160(sha256(pubkey)))`

use super::error::VerifierError;
use ripemd::Ripemd160;
use secp256k1::{
    Message, PublicKey, Secp256k1,
    ecdsa::{RecoverableSignature, RecoveryId},
};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

const COMPACT_SIGNATURE_LEN: usize = 65;
const HEADER_MIN: u8 = 27;
const HEADER_MAX: u8 = 34;
const HEADER_COMPRESSED: u8 = 31;

/// Networks whose signed-message scheme `MessageVerifier` understands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Network {
    #[default]
    Dogecoin,
    DogecoinTestnet,
    Bitcoin,
    Litecoin,
}

impl Network {
    pub const ALL: [Self; 4] = [
        Self::Dogecoin,
        Self::DogecoinTestnet,
        Self::Bitcoin,
        Self::Litecoin,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Dogecoin => "dogecoin",
            Self::DogecoinTestnet => "dogecoin-testnet",
            Self::Bitcoin => "bitcoin",
            Self::Litecoin => "litecoin",
        }
    }

    /// Domain-separation prefix prepended to every message before hashing.
    #[must_use]
    pub fn message_prefix(self) -> &'static str {
        match self {
            Self::Dogecoin | Self::DogecoinTestnet => "Dogecoin Signed Message:\n",
            Self::Bitcoin => "Bitcoin Signed Message:\n",
            Self::Litecoin => "Litecoin Signed Message:\n",
        }
    }

    /// Version byte of pay-to-pubkey-hash addresses.
    #[must_use]
    pub fn p2pkh_version(self) -> u8 {
        match self {
            Self::Dogecoin => 0x1e,
            Self::DogecoinTestnet => 0x71,
            Self::Bitcoin => 0x00,
            Self::Litecoin => 0x30,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|network| network.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown network: {s}"))
    }
}

/// A challenge message together with the domain-separation prefix it is signed under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixedMessage {
    prefix: String,
    body: String,
}

impl PrefixedMessage {
    #[must_use]
    pub fn new(prefix: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Bytes hashed by the signed-message scheme.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.prefix.len() + self.body.len() + 18);
        write_varint(&mut payload, self.prefix.len() as u64);
        payload.extend_from_slice(self.prefix.as_bytes());
        write_varint(&mut payload, self.body.len() as u64);
        payload.extend_from_slice(self.body.as_bytes());
        payload
    }

    #[must_use]
    pub fn signing_digest(&self) -> [u8; 32] {
        let first = Sha256::digest(self.signing_payload());
        Sha256::digest(first).into()
    }
}

impl fmt::Display for PrefixedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.body)
    }
}

fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Checks that `signature` over `message` was produced by the key controlling `address`.
pub trait SignatureVerifier: Send + Sync {
    /// # Errors
    /// Returns an error when verification cannot be attempted at all (unparseable
    /// address, unsupported signature form). A wrong signature is `Ok(false)`.
    fn verify(
        &self,
        address: &str,
        message: &PrefixedMessage,
        signature: &[u8],
    ) -> Result<bool, VerifierError>;
}

#[derive(Clone, Copy, Debug)]
pub struct MessageVerifier {
    version: u8,
}

impl MessageVerifier {
    #[must_use]
    pub fn new(network: Network) -> Self {
        Self {
            version: network.p2pkh_version(),
        }
    }

    #[must_use]
    pub fn with_version(version: u8) -> Self {
        Self { version }
    }
}

impl SignatureVerifier for MessageVerifier {
    fn verify(
        &self,
        address: &str,
        message: &PrefixedMessage,
        signature: &[u8],
    ) -> Result<bool, VerifierError> {
        let expected = decode_p2pkh(address, self.version)?;
        let (recovery_id, compressed) = parse_header(signature)?;

        let recoverable = RecoverableSignature::from_compact(&signature[1..], recovery_id)
            .map_err(|e| VerifierError::Recovery(e.to_string()))?;
        let digest = Message::from_digest(message.signing_digest());

        let Ok(public_key) = Secp256k1::verification_only().recover_ecdsa(&digest, &recoverable)
        else {
            return Ok(false);
        };

        Ok(hash160(&serialize_public_key(&public_key, compressed)) == expected)
    }
}

fn parse_header(signature: &[u8]) -> Result<(RecoveryId, bool), VerifierError> {
    if signature.len() != COMPACT_SIGNATURE_LEN {
        return Err(VerifierError::SignatureLength(signature.len()));
    }

    let header = signature[0];
    if !(HEADER_MIN..=HEADER_MAX).contains(&header) {
        return Err(VerifierError::SignatureHeader(header));
    }

    let recovery_id = RecoveryId::from_i32(i32::from((header - HEADER_MIN) & 3))
        .map_err(|e| VerifierError::Recovery(e.to_string()))?;

    Ok((recovery_id, header >= HEADER_COMPRESSED))
}

fn decode_p2pkh(address: &str, version: u8) -> Result<[u8; 20], VerifierError> {
    let decoded = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| VerifierError::MalformedAddress(e.to_string()))?;

    let Some((&found, hash)) = decoded.split_first() else {
        return Err(VerifierError::MalformedAddress("empty payload".to_string()));
    };
    let hash: [u8; 20] = hash
        .try_into()
        .map_err(|_| VerifierError::MalformedAddress(format!("payload length {}", decoded.len())))?;

    if found != version {
        return Err(VerifierError::AddressVersion);
    }

    Ok(hash)
}

fn serialize_public_key(public_key: &PublicKey, compressed: bool) -> Vec<u8> {
    if compressed {
        public_key.serialize().to_vec()
    } else {
        public_key.serialize_uncompressed().to_vec()
    }
}

fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// Pay-to-pubkey-hash address of `public_key` for the given version byte.
#[must_use]
pub fn p2pkh_address(public_key: &PublicKey, compressed: bool, version: u8) -> String {
    bs58::encode(hash160(&serialize_public_key(public_key, compressed)))
        .with_check_version(version)
        .into_string()
}
