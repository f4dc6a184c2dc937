//! Pluggable lookup cache.
//!
//! Directory lookups (route documents in particular) are cached behind the
//! [`LookupCache`] capability. Two variants exist:
//!
//! - [`MemoryCache`] -- a process-local map with per-entry expiry
//! - [`DiskCache`] -- one JSON file per key under a directory
//!
//! The variant is chosen once by [`connect_cache`]. If the disk directory
//! cannot be prepared the memory variant is returned instead; callers never
//! see the difference and no per-call fallback exists.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fleetline_core::FleetError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default time-to-live for cached entries.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Key/value cache over JSON values.
///
/// A `get` after expiry behaves as a miss. Failures to read are misses too;
/// only `set` reports errors, and callers are free to ignore them.
#[async_trait]
pub trait LookupCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: Value) -> Result<(), FleetError>;

    async fn delete(&self, key: &str);

    async fn clear(&self);

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

// ── Memory ───────────────────────────────────────────────────────────

/// Process-local cache.
#[derive(Debug)]
pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }
}

#[async_trait]
impl LookupCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), FleetError> {
        let expires = Instant::now() + self.ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ── Disk ─────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskEntry {
    /// Unix milliseconds.
    expires_at: u64,
    value: Value,
}

/// File-per-key cache under a directory.
///
/// Keys are hex-encoded into file names, so any key is a safe path
/// component. Expired files are removed lazily on read.
#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    ttl: Duration,
}

impl DiskCache {
    /// Create `dir` if needed and verify it is writable.
    pub async fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, FleetError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            FleetError::Internal(format!("cannot create cache dir {}: {}", dir.display(), e))
        })?;
        let probe = dir.join(".probe");
        tokio::fs::write(&probe, b"ok").await.map_err(|e| {
            FleetError::Internal(format!("cache dir {} is not writable: {}", dir.display(), e))
        })?;
        let _ = tokio::fs::remove_file(&probe).await;
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() * 2 + 5);
        for byte in key.as_bytes() {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl LookupCache for DiskCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key);
        let raw = tokio::fs::read(&path).await.ok()?;
        let entry: DiskEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key, error = %e, "discarding unreadable cache entry");
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };
        if entry.expires_at <= unix_millis(SystemTime::now()) {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(entry.value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), FleetError> {
        let entry = DiskEntry {
            expires_at: unix_millis(SystemTime::now() + self.ttl),
            value,
        };
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| FleetError::Internal(format!("cache encode failed: {e}")))?;
        tokio::fs::write(self.path_for(key), bytes)
            .await
            .map_err(|e| FleetError::Internal(format!("cache write failed: {e}")))
    }

    async fn delete(&self, key: &str) {
        let _ = tokio::fs::remove_file(self.path_for(key)).await;
    }

    async fn clear(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot list cache dir");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
    }

    fn backend(&self) -> &'static str {
        "disk"
    }
}

// ── Selection ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Disk,
}

/// `[cache]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub dir: Option<PathBuf>,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            dir: None,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Build the configured cache, falling back to memory when the disk
/// backend cannot be prepared.
pub async fn connect_cache(config: &CacheConfig) -> Arc<dyn LookupCache> {
    match config.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new(config.ttl())),
        CacheBackendKind::Disk => {
            let dir = config
                .dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("fleetline-cache"));
            match DiskCache::open(&dir, config.ttl()).await {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    warn!(error = %e, "disk cache unavailable, using memory cache");
                    Arc::new(MemoryCache::new(config.ttl()))
                }
            }
        }
    }
}
