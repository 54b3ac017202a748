//! Content-addressed, time-bounded result cache.
//!
//! One JSON document per query fingerprint. Entries are never evicted on
//! their own; freshness is decided at read time, and an expired entry is
//! indistinguishable from an absent one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::persist::{self, StorageError};

/// Entries older than this are misses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const FILE_PREFIX: &str = "search_";

/// A stored cache document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub fingerprint: String,
    pub query: String,
    pub results: T,
    pub timestamp: DateTime<Utc>,
}

/// Disk-backed cache keyed by the SHA-256 of the exact query bytes.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResultCache {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self {
            dir,
            ttl: DEFAULT_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hex SHA-256 of the query text. Case sensitive, no normalization.
    pub fn fingerprint(query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Path of the document that would hold `query`.
    pub fn entry_path(&self, query: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}.json", Self::fingerprint(query)))
    }

    /// Cached results for `query`, if present and fresh.
    pub fn get<T: DeserializeOwned>(&self, query: &str) -> Option<T> {
        self.get_at(query, Utc::now())
    }

    /// Same as [`get`](Self::get) with an explicit clock.
    pub fn get_at<T: DeserializeOwned>(&self, query: &str, now: DateTime<Utc>) -> Option<T> {
        let path = self.entry_path(query);
        let entry: CacheEntry<T> = match persist::read_json(&path) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable cache entry, treating as miss");
                return None;
            }
        };

        if self.is_fresh(entry.timestamp, now) {
            Some(entry.results)
        } else {
            tracing::debug!(query, stored = %entry.timestamp, "Cache entry expired");
            None
        }
    }

    /// Store `results` for `query`, replacing any previous entry.
    pub fn put<T: Serialize>(&self, query: &str, results: &T) -> Result<(), StorageError> {
        self.put_at(query, results, Utc::now())
    }

    /// Same as [`put`](Self::put) with an explicit timestamp.
    pub fn put_at<T: Serialize>(
        &self,
        query: &str,
        results: &T,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let entry = CacheEntry {
            fingerprint: Self::fingerprint(query),
            query: query.to_string(),
            results,
            timestamp,
        };
        persist::write_json_atomic(&self.entry_path(query), &entry, false)
    }

    /// Delete expired or unreadable entries. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut removed = 0;
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"));
            if !is_entry {
                continue;
            }
            let stale = match persist::read_json::<CacheEntry<serde_json::Value>>(&path) {
                Ok(Some(e)) => !self.is_fresh(e.timestamp, now),
                Ok(None) => false,
                Err(_) => true,
            };
            if stale {
                std::fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, dir = %self.dir.display(), "Purged stale cache entries");
        }
        Ok(removed)
    }

    fn is_fresh(&self, stored: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A timestamp from the future has a negative age and counts as fresh.
        match now.signed_duration_since(stored).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        }
    }
}
