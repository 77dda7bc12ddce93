//! Quota-accounted backing store for secure storage.
//!
//! One store per app identity, persisted as a JSON snapshot named by the
//! SHA-256 of the app id. Quota enforcement is arena-style: compute the
//! prospective size, compare against the quota, then commit map and
//! snapshot as one unit — an insert that would exceed the quota rejects
//! the whole batch with no partial write.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("insert would use {would_use_bytes} of {max_bytes} quota bytes")]
    QuotaExceeded {
        would_use_bytes: u64,
        max_bytes: u64,
    },
    #[error("secure storage I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("secure storage snapshot is corrupt: {0}")]
    CorruptSnapshot(#[from] serde_json::Error),
}

/// Serialized size of one item: key bytes plus value bytes.
fn item_bytes(key: &str, value: &str) -> u64 {
    key.len() as u64 + value.len() as u64
}

/// Key/value store with additive byte accounting.
///
/// All mutation methods go through [`SecureStore::persist`] before the
/// in-memory state is updated, so a failed write never leaves memory and
/// disk disagreeing.
#[derive(Debug)]
pub struct SecureStore {
    path: PathBuf,
    max_bytes: u64,
    used_bytes: u64,
    items: HashMap<String, String>,
}

impl SecureStore {
    /// Open (or create) the store bound to `app_id` under `dir`.
    ///
    /// A pre-existing snapshot larger than the current quota still loads;
    /// further inserts fail until enough is removed.
    pub fn open(dir: &Path, app_id: &str, max_bytes: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let path = snapshot_path(dir, app_id);
        let items: HashMap<String, String> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        let used_bytes = items.iter().map(|(k, v)| item_bytes(k, v)).sum();
        Ok(Self {
            path,
            max_bytes,
            used_bytes,
            items,
        })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert a batch of items atomically against the quota.
    ///
    /// Replaced keys are credited their old size before the new size is
    /// charged. On any failure the store's prior contents are unchanged.
    pub fn insert_items(&mut self, batch: HashMap<String, String>) -> Result<(), StoreError> {
        let mut would_use_bytes = self.used_bytes;
        for (key, value) in &batch {
            if let Some(old) = self.items.get(key) {
                would_use_bytes -= item_bytes(key, old);
            }
            would_use_bytes += item_bytes(key, value);
        }
        if would_use_bytes > self.max_bytes {
            return Err(StoreError::QuotaExceeded {
                would_use_bytes,
                max_bytes: self.max_bytes,
            });
        }

        let mut next = self.items.clone();
        next.extend(batch);
        self.persist(&next)?;
        self.items = next;
        self.used_bytes = would_use_bytes;
        Ok(())
    }

    /// Remove the given keys. Absent keys are skipped, not an error.
    pub fn remove_items(&mut self, keys: &[String]) -> Result<(), StoreError> {
        let mut next = self.items.clone();
        let mut would_use_bytes = self.used_bytes;
        for key in keys {
            if let Some(old) = next.remove(key) {
                would_use_bytes -= item_bytes(key, &old);
            }
        }
        self.persist(&next)?;
        self.items = next;
        self.used_bytes = would_use_bytes;
        Ok(())
    }

    /// Drop every item. Always succeeds: memory is wiped unconditionally
    /// and the snapshot removal is best-effort.
    pub fn clear(&mut self) {
        self.items.clear();
        self.used_bytes = 0;
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    event = "bridge.store.clear_snapshot_failed",
                    path = %self.path.display(),
                    error = %err,
                    "cleared in-memory items but the snapshot could not be removed"
                );
            }
        }
    }

    fn persist(&self, items: &HashMap<String, String>) -> Result<(), StoreError> {
        // Stable key order keeps snapshots diffable across writes.
        let ordered: BTreeMap<&str, &str> = items
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let bytes = serde_json::to_vec(&ordered)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn snapshot_path(dir: &Path, app_id: &str) -> PathBuf {
    let digest = Sha256::digest(app_id.as_bytes());
    dir.join(format!("{digest:x}.json"))
}
