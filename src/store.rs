//! Persisted datapoint hash store.
//!
//! The hub deduplicates DP updates by content hash; persisting the hashes
//! means a restart does not replay the device's last report as a fresh
//! doorbell event. The store is a small JSON file, written atomically via a
//! temp file rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::DpId;
use crate::error::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    hashes: HashMap<String, String>,
}

/// DP id to last-seen content hash, backed by a JSON file.
#[derive(Debug)]
pub struct HashStore {
    path: PathBuf,
    hashes: HashMap<DpId, String>,
}

impl HashStore {
    /// Load the store from `path`. A missing or unreadable file yields an
    /// empty store; dedup state is best-effort, never fatal.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hashes = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StoreFile>(&bytes) {
                Ok(file) => file
                    .hashes
                    .into_iter()
                    .filter_map(|(k, v)| DpId::parse(&k).map(|dp| (dp, v)))
                    .collect(),
                Err(e) => {
                    warn!("Hash store {} is corrupt, starting empty: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("Cannot read hash store {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        debug!(
            "Loaded {} stored DP hash(es) from {}",
            hashes.len(),
            path.display()
        );
        Self { path, hashes }
    }

    /// In-memory store for callers that do not want persistence.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            hashes: HashMap::new(),
        }
    }

    pub fn get(&self, dp: DpId) -> Option<&str> {
        self.hashes.get(&dp).map(String::as_str)
    }

    /// Record a new hash. Returns `true` if the value changed.
    pub fn insert(&mut self, dp: DpId, hash: String) -> bool {
        self.hashes.insert(dp, hash.clone()) != Some(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Write the store to disk. No-op for ephemeral stores.
    pub async fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let file = StoreFile {
            hashes: self
                .hashes
                .iter()
                .map(|(dp, hash)| (dp.to_string(), hash.clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = temp_path(&self.path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            "Persisted {} DP hash(es) to {}",
            self.hashes.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
