use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::U256;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// On-disk layout of the funded-set.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundedFile {
    funded_subscriptions: Vec<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

/// Subscription ids known to hold enough balance. Append-only: ids are never
/// evicted, and every addition rewrites the whole file.
pub struct FundedSubscriptionStore {
    path: PathBuf,
    funded: Mutex<BTreeSet<U256>>,
}

impl FundedSubscriptionStore {
    /// Load the set from `path`. A missing, unreadable or corrupt file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let funded = match read_file(&path) {
            Ok(Some(set)) => {
                info!(path = %path.display(), count = set.len(), "Loaded {} funded subscriptions", set.len());
                set
            }
            Ok(None) => {
                info!(path = %path.display(), "No funded subscription file yet, starting empty");
                BTreeSet::new()
            }
            Err(e) => {
                warn!(path = %path.display(), "Ignoring unreadable funded subscription file: {e}");
                BTreeSet::new()
            }
        };
        Self { path, funded: Mutex::new(funded) }
    }

    pub fn contains(&self, id: &U256) -> bool {
        self.guard().contains(id)
    }

    /// Add `id` and persist. Returns false (and writes nothing) if it was already present.
    pub fn insert(&self, id: U256) -> bool {
        let mut funded = self.guard();
        if !funded.insert(id) {
            return false;
        }
        // Lock stays held through the write so concurrent additions never interleave on disk.
        if let Err(e) = write_file(&self.path, &funded) {
            error!(
                path = %self.path.display(),
                subscription_id = %id,
                "Failed to persist funded subscriptions: {e}"
            );
        } else {
            debug!(path = %self.path.display(), count = funded.len(), "Funded subscriptions persisted");
        }
        true
    }

    /// Sorted copy of the set.
    pub fn snapshot(&self) -> Vec<U256> {
        self.guard().iter().copied().collect()
    }

    fn guard(&self) -> MutexGuard<'_, BTreeSet<U256>> {
        self.funded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_file(path: &Path) -> Result<Option<BTreeSet<U256>>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file: FundedFile = serde_json::from_slice(&bytes)?;

    let mut set = BTreeSet::new();
    for raw in &file.funded_subscriptions {
        match raw.parse::<U256>() {
            Ok(id) => {
                set.insert(id);
            }
            Err(e) => warn!(entry = %raw, "Skipping malformed subscription id: {e}"),
        }
    }
    Ok(Some(set))
}

fn write_file(path: &Path, funded: &BTreeSet<U256>) -> Result<()> {
    let file = FundedFile {
        funded_subscriptions: funded.iter().map(U256::to_string).collect(),
        last_updated: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    };
    let json = serde_json::to_vec_pretty(&file)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
