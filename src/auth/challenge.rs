//! One-time challenge issuance and redemption.
//!
//! A challenge message has the form `"<unix-timestamp>-<random-hex>"`. Its SHA-256 hex
//! digest is the token handed out for display; the message itself is what the wallet
//! signs. The store keeps every challenge until its TTL elapses, including consumed
//! ones, so a replay inside the window reports `AlreadyConsumed` instead of `NotFound`.
//!
//! `try_consume` and `sweep` run under the same lock, which is what guarantees that two
//! concurrent redemptions of one token cannot both succeed.

use super::error::ChallengeError;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 300;
const CHALLENGE_RANDOM_BYTES: usize = 16;

/// Source of wall-clock time for challenge bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: StdMutex<SystemTime>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: StdMutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemTime::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    token: String,
    message: String,
    issued_at: SystemTime,
    consumed: bool,
}

impl Challenge {
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

/// Lookup token for a challenge message: lowercase SHA-256 hex digest.
#[must_use]
pub fn challenge_token(message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}

fn compose_message(now: SystemTime) -> String {
    let timestamp = now.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    let mut random = [0u8; CHALLENGE_RANDOM_BYTES];
    OsRng.fill_bytes(&mut random);
    format!("{timestamp}-{}", hex::encode(random))
}

fn is_expired(issued_at: SystemTime, now: SystemTime, ttl: Duration) -> bool {
    // A clock that stepped backwards leaves the challenge alive rather than failing open.
    now.duration_since(issued_at).is_ok_and(|age| age > ttl)
}

#[derive(Debug)]
struct Entries {
    by_token: HashMap<String, Challenge>,
    last_pruned: SystemTime,
}

impl Entries {
    fn prune(&mut self, now: SystemTime, ttl: Duration) -> usize {
        let before = self.by_token.len();
        self.by_token
            .retain(|_, entry| !is_expired(entry.issued_at, now, ttl));
        self.last_pruned = now;
        before - self.by_token.len()
    }
}

pub struct ChallengeStore {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<Entries>,
}

impl ChallengeStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let last_pruned = clock.now();
        Self {
            ttl,
            clock,
            entries: Mutex::new(Entries {
                by_token: HashMap::new(),
                last_pruned,
            }),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint and record a fresh challenge.
    ///
    /// Expired entries are pruned here at most once per TTL; the sweeper does the rest.
    pub async fn issue(&self) -> Challenge {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        if now
            .duration_since(entries.last_pruned)
            .is_ok_and(|since| since >= self.ttl)
        {
            entries.prune(now, self.ttl);
        }

        loop {
            let message = compose_message(now);
            let token = challenge_token(&message);
            if let Entry::Vacant(slot) = entries.by_token.entry(token.clone()) {
                let challenge = Challenge {
                    token,
                    message,
                    issued_at: now,
                    consumed: false,
                };
                slot.insert(challenge.clone());
                debug!(token = %challenge.token, "Challenge issued");
                return challenge;
            }
        }
    }

    /// Redeem a challenge. Succeeds at most once per token.
    ///
    /// A message mismatch still consumes the challenge; an expired one is evicted.
    ///
    /// # Errors
    /// Returns the reason the challenge cannot be redeemed.
    pub async fn try_consume(
        &self,
        token: &str,
        presented_message: &str,
    ) -> Result<Challenge, ChallengeError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        let (consumed, issued_at) = match entries.by_token.get(token) {
            Some(entry) => (entry.consumed, entry.issued_at),
            None => return Err(ChallengeError::NotFound),
        };

        if consumed {
            return Err(ChallengeError::AlreadyConsumed);
        }

        if is_expired(issued_at, now, self.ttl) {
            entries.by_token.remove(token);
            return Err(ChallengeError::Expired);
        }

        let Some(entry) = entries.by_token.get_mut(token) else {
            return Err(ChallengeError::NotFound);
        };
        entry.consumed = true;

        if entry.message != presented_message {
            return Err(ChallengeError::MessageMismatch);
        }

        Ok(entry.clone())
    }

    /// Drop every challenge past its TTL, consumed or not. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        self.entries.lock().await.prune(now, self.ttl)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.by_token.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.by_token.is_empty()
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
