//! Key-value document store with optional per-key TTL.
//!
//! Two backends share the [`KvStore`] trait:
//! - [`MemoryKvStore`]: process-local, for tests and degraded operation
//! - [`FileKvStore`]: one JSON envelope per key in a directory, survives restarts
//!
//! Expired keys are invisible to readers immediately and physically removed
//! lazily on read or by [`KvStore::purge_expired`].

use crate::error::QueueError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use warden_core::clock::now_ms;

/// Stored value plus its expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvEntry {
    /// The stored document.
    pub value: Value,
    /// Unix milliseconds after which the entry is gone. `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl KvEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at_ms: ttl.map(|ttl| now_ms().saturating_add(ttl.as_millis() as u64)),
        }
    }

    /// Whether the entry has expired at `now` (Unix ms).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now)
    }
}

/// Durable document store used for sessions, queue records and approval memory.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<Value>, QueueError>;

    /// Store `value`, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), QueueError>;

    /// Remove a key. Returns whether a live value existed.
    async fn delete(&self, key: &str) -> Result<bool, QueueError>;

    /// Live keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, QueueError>;

    /// Physically drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, QueueError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, KvEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, QueueError> {
        let now = now_ms();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), QueueError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), KvEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, QueueError> {
        let now = now_ms();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| !e.is_expired(now)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, QueueError> {
        let now = now_ms();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn purge_expired(&self) -> Result<usize, QueueError> {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }
}

/// Directory-backed store. Each key is one `<escaped-key>.json` file.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// Open (and create) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Directory holding the entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_key(key)))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<KvEntry>, QueueError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(path: &Path) -> Result<(), QueueError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self) -> Result<Vec<(String, PathBuf)>, QueueError> {
        let mut dir = fs::read_dir(&self.dir).await?;
        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if let Some(key) = unescape_key(stem) {
                out.push((key, path));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, QueueError> {
        let path = self.path_for(key);
        let Some(entry) = self.read_entry(&path).await? else {
            return Ok(None);
        };
        if entry.is_expired(now_ms()) {
            Self::remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), QueueError> {
        let path = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", escape_key(key), ulid::Ulid::new()));
        let bytes = serde_json::to_vec(&KvEntry::new(value, ttl))?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, QueueError> {
        let path = self.path_for(key);
        let live = self
            .read_entry(&path)
            .await?
            .is_some_and(|e| !e.is_expired(now_ms()));
        Self::remove_file(&path).await?;
        Ok(live)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, QueueError> {
        let now = now_ms();
        let mut keys = Vec::new();
        for (key, path) in self.entries().await? {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(entry) = self.read_entry(&path).await? {
                if !entry.is_expired(now) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn purge_expired(&self) -> Result<usize, QueueError> {
        let now = now_ms();
        let mut removed = 0;
        for (_, path) in self.entries().await? {
            let expired = match self.read_entry(&path).await {
                Ok(Some(entry)) => entry.is_expired(now),
                Ok(None) => false,
                Err(QueueError::Serialization(e)) => {
                    tracing::warn!(path = %path.display(), "removing corrupt store entry: {e}");
                    true
                }
                Err(e) => return Err(e),
            };
            if expired {
                Self::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Escape a key into a file-name-safe stem. `[A-Za-z0-9_-]` pass through,
/// every other byte becomes `%XX`.
pub(crate) fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub(crate) fn unescape_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
