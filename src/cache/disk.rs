//! Disk-backed cache store
//!
//! Persists each entry as a JSON file with expiry timestamps, so cached
//! weather survives between runs of the CLI.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::{CacheError, CacheStore};

/// Wrapper struct for cached data stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// The key this entry was written for
    key: String,
    /// Base64 of the stored blob
    value: String,
    /// When the data was cached
    cached_at: DateTime<Utc>,
    /// When the cache entry expires
    expires_at: DateTime<Utc>,
}

/// Stores cache entries as files in a directory
///
/// The default directory is XDG-compliant (`~/.cache/weathercache/` on
/// Linux). File names are the SHA-256 of the key, so any key is a safe path
/// component. Writes go to a temporary file that is renamed into place, so
/// readers never observe a half-written entry. Reads never delete: an expired
/// or unreadable file stays until the next write for its key replaces it, so a
/// reader can't remove an entry another task has just renamed into place.
#[derive(Debug)]
pub struct DiskStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// Suffix source for temporary files
    write_seq: AtomicU64,
}

impl DiskStore {
    /// Creates a store using the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "weathercache")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a store with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to a cache file for the given key
    fn cache_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir.join(format!("{:x}.json", digest))
    }

    /// Removes a file, ignoring a file that is already gone
    async fn remove(&self, path: &Path) -> Result<(), CacheError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads and decodes the entry for `key`. A corrupt file reads as missing.
    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.cache_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.key == key => Ok(Some(entry)),
            Ok(_) => Ok(None),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "ignoring corrupt cache file");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(entry) = self.read_entry(key).await? else {
            return Ok(None);
        };

        if Utc::now() >= entry.expires_at {
            return Ok(None);
        }

        match STANDARD.decode(entry.value.as_bytes()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) => {
                debug!(key, error = %err, "ignoring cache entry with bad encoding");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir).await?;

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                CacheError::Codec(format!(
                    "ttl of {}s is past the last representable expiry",
                    ttl.as_secs()
                ))
            })?;
        let entry = CacheEntry {
            key: key.to_string(),
            value: STANDARD.encode(value),
            cached_at: now,
            expires_at,
        };

        let json =
            serde_json::to_string_pretty(&entry).map_err(|e| CacheError::Codec(e.to_string()))?;

        let path = self.cache_path(key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), seq));
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let live = self
            .read_entry(key)
            .await?
            .is_some_and(|entry| Utc::now() < entry.expires_at);
        self.remove(&self.cache_path(key)).await?;
        Ok(live)
    }
}
