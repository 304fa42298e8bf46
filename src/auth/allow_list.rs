//! Address allow list.
//!
//! Loaded once at startup from `{"allowed_addresses": [...]}`. Entries must already be in
//! canonical form and lookups are exact byte matches: no trimming, no case folding.
//!
//! The live list is an immutable snapshot behind `SharedAllowList`; reloads build a new
//! snapshot and swap it in, so readers never see a partially updated set.

use super::error::AllowListError;
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};
use tokio::{
    task::JoinHandle,
    time::{Duration, interval},
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct AllowListFile {
    #[serde(default)]
    allowed_addresses: Vec<String>,
}

/// Base58 alphabet check. Surrounding whitespace makes an address invalid.
#[must_use]
pub fn valid_address(address: &str) -> bool {
    Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{25,64}$").is_ok_and(|regex| regex.is_match(address))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllowList {
    addresses: HashSet<String>,
}

impl AllowList {
    /// Build a list from raw entries.
    ///
    /// # Errors
    /// Returns an error naming the first entry that is not a plausible address.
    pub fn from_addresses<I, S>(addresses: I) -> Result<Self, AllowListError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for (index, raw) in addresses.into_iter().enumerate() {
            let address = raw.as_ref();
            if !valid_address(address) {
                return Err(AllowListError::InvalidAddress {
                    index,
                    address: address.to_string(),
                });
            }
            set.insert(address.to_string());
        }
        Ok(Self { addresses: set })
    }

    /// Parse the JSON config document.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or contains an invalid address.
    pub fn from_json(json: &str) -> Result<Self, AllowListError> {
        let file: AllowListFile = serde_json::from_str(json)?;
        Self::from_addresses(file.allowed_addresses)
    }

    /// Read and parse the config file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, AllowListError> {
        let json = std::fs::read_to_string(path).map_err(|source| AllowListError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn is_allowed(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Process-wide handle on the current allow-list snapshot.
#[derive(Clone, Debug, Default)]
pub struct SharedAllowList {
    current: Arc<RwLock<Arc<AllowList>>>,
}

impl SharedAllowList {
    #[must_use]
    pub fn new(list: AllowList) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(list))),
        }
    }

    /// Current snapshot. A poisoned lock yields an empty list, which denies everyone.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AllowList> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| Arc::new(AllowList::default()))
    }

    #[must_use]
    pub fn is_allowed(&self, address: &str) -> bool {
        self.snapshot().is_allowed(address)
    }

    pub fn replace(&self, list: AllowList) {
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::new(list),
            Err(err) => error!("Allow list lock poisoned, keeping previous snapshot: {err}"),
        }
    }

    /// Poll `path` and swap in a new snapshot whenever its modification time changes.
    ///
    /// A file that fails to parse leaves the previous snapshot in place.
    pub fn spawn_watcher(&self, path: PathBuf, poll_interval: Duration) -> JoinHandle<()> {
        let target = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(poll_interval);
            let mut last_modified = modified_at(&path).await.unwrap_or(SystemTime::UNIX_EPOCH);

            loop {
                interval.tick().await;

                let modified = match modified_at(&path).await {
                    Ok(modified) => modified,
                    Err(e) => {
                        debug!("Allow list watcher failed to read metadata: {}", e);
                        continue;
                    }
                };

                if modified == last_modified {
                    continue;
                }

                match AllowList::load(&path) {
                    Ok(list) => {
                        if list.is_empty() {
                            warn!("Reloaded allow list is empty, every request will be denied");
                        }
                        info!(addresses = list.len(), "Allow list reloaded");
                        target.replace(list);
                        last_modified = modified;
                    }
                    Err(e) => {
                        error!("Allow list reload failed, keeping previous snapshot: {}", e);
                    }
                }
            }
        })
    }
}

async fn modified_at(path: &Path) -> std::io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const ALICE: &str = "DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L";
    const BOB: &str = "DLCDJhnh6aGotar6b182jpzbNEyXb3C361";

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("keygate-allow-list-{label}-{}.json", Ulid::new()))
    }

    #[test]
    fn whitespace_is_never_tolerated() -> anyhow::Result<()> {
        let list = AllowList::from_addresses([ALICE])?;
        assert!(list.is_allowed(ALICE));
        assert!(!list.is_allowed(&format!(" {ALICE}\t")));
        assert!(!list.is_allowed(&format!("{ALICE}\n")));

        assert!(matches!(
            AllowList::from_addresses([format!("  {ALICE}\n")]),
            Err(AllowListError::InvalidAddress { index: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn comparison_is_case_sensitive() -> anyhow::Result<()> {
        let list = AllowList::from_addresses([ALICE])?;
        assert!(!list.is_allowed(&ALICE.to_lowercase()));
        assert!(!list.is_allowed(&ALICE.to_uppercase()));
        Ok(())
    }

    #[test]
    fn empty_list_denies_everyone() {
        let list = AllowList::default();
        assert!(list.is_empty());
        assert!(!list.is_allowed(ALICE));
        assert!(!list.is_allowed(""));
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let result = AllowList::from_addresses([ALICE, "not an address"]);
        assert!(matches!(
            result,
            Err(AllowListError::InvalidAddress { index: 1, .. })
        ));

        // 0, O, I and l are not part of the base58 alphabet.
        assert!(!valid_address("D0000000000000000000000000000000"));
        assert!(!valid_address("DlIlIlIlIlIlIlIlIlIlIlIlIlIlIlIl"));
        assert!(valid_address(BOB));
    }

    #[test]
    fn parses_config_document() -> anyhow::Result<()> {
        let json = format!(r#"{{"allowed_addresses": ["{ALICE}", "{BOB}"]}}"#);
        let list = AllowList::from_json(&json)?;
        assert!(list.is_allowed(ALICE));
        assert!(list.is_allowed(BOB));

        let missing_key = AllowList::from_json("{}")?;
        assert!(missing_key.is_empty());

        assert!(matches!(
            AllowList::from_json("not json"),
            Err(AllowListError::Json(_))
        ));
        Ok(())
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(matches!(
            AllowList::load(&temp_path("missing")),
            Err(AllowListError::Read { .. })
        ));
    }

    #[test]
    fn shared_list_swaps_snapshots() -> anyhow::Result<()> {
        let shared = SharedAllowList::new(AllowList::from_addresses([ALICE])?);
        let before = shared.snapshot();

        shared.replace(AllowList::from_addresses([BOB])?);

        assert!(before.is_allowed(ALICE));
        assert!(!shared.is_allowed(ALICE));
        assert!(shared.is_allowed(BOB));
        Ok(())
    }

    #[tokio::test]
    async fn watcher_reloads_on_change() -> anyhow::Result<()> {
        let path = temp_path("watch");
        std::fs::write(&path, format!(r#"{{"allowed_addresses": ["{ALICE}"]}}"#))?;

        let shared = SharedAllowList::new(AllowList::load(&path)?);
        let handle = shared.spawn_watcher(path.clone(), Duration::from_millis(100));

        // Give coarse filesystem timestamps a chance to differ.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(&path, format!(r#"{{"allowed_addresses": ["{BOB}"]}}"#))?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(shared.is_allowed(BOB));
        assert!(!shared.is_allowed(ALICE));

        // A broken file keeps the last good snapshot.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(&path, "{ broken")?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(shared.is_allowed(BOB));

        handle.abort();
        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
