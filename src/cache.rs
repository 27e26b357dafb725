//! Persistent on-disk cache for tool calls.
//!
//! Every cached call is keyed by the SHA-256 of a canonical JSON payload
//! (`version`, qualified function name and its own version, arguments,
//! optional tag) and stored as
//! one JSON file inside the cache directory. Entries survive across runs, so
//! repeated experiments over the same PRISM pairs do not hit the public APIs
//! again.
//!
//! Directory resolution is late-bound: an explicit directory wins, otherwise
//! `<root>/<name>` where the root comes from [`crate::config::Config::cache_root`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

const ENTRY_EXT: &str = "json";

/// A stored cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    value: Value,
    stored_at: f64,
    #[serde(default)]
    expires_at: Option<f64>,
}

impl CacheEntry {
    fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// Summary returned by [`ToolCache::stats`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub name: String,
    pub directory: String,
    pub size_limit_bytes: u64,
    pub bytes: u64,
    pub count: usize,
    pub version: String,
    pub tag: Option<String>,
}

/// Per-call overrides for a cached lookup.
#[derive(Debug, Clone, Default)]
pub struct CallOverrides {
    /// Force (or lift) offline-only behaviour for this call
    pub offline_only: Option<bool>,
    /// TTL for the entry written by this call
    pub expire: Option<Duration>,
}

/// Persistent cache shared by one family of tools (e.g. all PubChem lookups).
#[derive(Debug, Clone)]
pub struct ToolCache {
    name: String,
    directory: PathBuf,
    size_limit_bytes: u64,
    expire: Option<Duration>,
    offline_only: bool,
    version: String,
    tag: Option<String>,
    func_versions: BTreeMap<String, String>,
}

impl ToolCache {
    /// Create a cache stored directly in `directory`.
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            size_limit_bytes: u64::MAX,
            expire: None,
            offline_only: false,
            version: "1".to_string(),
            tag: None,
            func_versions: BTreeMap::new(),
        }
    }

    /// Create the cache for `name` under the configured root.
    pub fn from_config(name: &str, config: &Config) -> Result<Self> {
        let mut cache = Self::new(name, config.cache_root().join(name))
            .with_size_limit(config.cache_size_limit())
            .with_version(config.cache.version.clone())
            .with_offline_only(config.cache.offline_only);
        cache.expire = config.cache_expire()?;
        cache.tag = config.cache.tag.clone();
        Ok(cache)
    }

    pub fn with_size_limit(mut self, bytes: u64) -> Self {
        self.size_limit_bytes = bytes;
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    pub fn with_offline_only(mut self, offline_only: bool) -> Self {
        self.offline_only = offline_only;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Per-function versions; bumping one invalidates only that function's entries.
    pub fn with_func_versions(mut self, versions: &[(&str, &str)]) -> Self {
        for (func, version) in versions {
            self.func_versions
                .insert(func.to_string(), version.to_string());
        }
        self
    }

    /// Same cache settings, stored in another directory.
    pub fn at_dir(&self, directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Cache key for a call of `func` with `args`.
    pub fn key(&self, func: &str, args: &Value) -> String {
        // serde_json maps are ordered by key, so this rendering is canonical
        let payload = serde_json::json!({
            "v": self.version,
            "func": format!("{}.{}", self.name, func),
            "fv": self.func_versions.get(func),
            "args": args,
            "tag": self.tag,
        });
        let digest = Sha256::digest(payload.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Return the cached result of `func(args)`, computing and storing it on a miss.
    pub async fn fetch<T, F, Fut>(&self, func: &str, args: Value, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.fetch_with(&CallOverrides::default(), func, args, compute)
            .await
    }

    /// [`fetch`](Self::fetch) with per-call overrides.
    pub async fn fetch_with<T, F, Fut>(
        &self,
        overrides: &CallOverrides,
        func: &str,
        args: Value,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = self.key(func, &args);

        if let Some(value) = self.get(&key) {
            match serde_json::from_value::<T>(value) {
                Ok(hit) => {
                    debug!(cache = %self.name, func, key = &key[..10], "cache hit");
                    return Ok(hit);
                }
                Err(e) => {
                    warn!(cache = %self.name, func, error = %e, "cached value has unexpected shape, recomputing");
                }
            }
        }

        if overrides.offline_only.unwrap_or(self.offline_only) {
            return Err(Error::OfflineCacheMiss {
                key: key[..10].to_string(),
                dir: self.directory.display().to_string(),
            });
        }

        debug!(cache = %self.name, func, key = &key[..10], "cache miss");
        let result = compute().await?;

        let ttl = overrides.expire.or(self.expire);
        match serde_json::to_value(&result) {
            Ok(value) => {
                if let Err(e) = self.set(&key, value, ttl) {
                    warn!(cache = %self.name, func, error = %e, "failed to write cache entry");
                }
            }
            Err(e) => warn!(cache = %self.name, func, error = %e, "result not serialisable, not cached"),
        }
        Ok(result)
    }

    /// Look up a raw entry; expired and corrupt entries are removed and treated as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key);
        let data = fs::read(&path).ok()?;
        match serde_json::from_slice::<CacheEntry>(&data) {
            Ok(entry) if entry.is_expired(unix_now()) => {
                self.remove_entry(&path);
                None
            }
            Ok(entry) => Some(entry.value),
            Err(e) => {
                warn!(cache = %self.name, path = %path.display(), error = %e, "corrupt cache entry");
                self.remove_entry(&path);
                None
            }
        }
    }

    /// Store a raw entry, then evict the oldest entries while over the size limit.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        let now = unix_now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: now,
            expires_at: ttl.map(|d| now + d.as_secs_f64()),
        };
        let data = serde_json::to_vec(&entry)?;

        let path = self.entry_path(key);
        let tmp = self
            .directory
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &path)?;

        self.enforce_size_limit()
    }

    /// Entry statistics for this cache directory.
    pub fn stats(&self) -> Result<CacheStats> {
        let files = self.entry_files()?;
        let bytes = files.iter().map(|(_, meta)| meta.len()).sum();
        Ok(CacheStats {
            name: self.name.clone(),
            directory: self.directory.display().to_string(),
            size_limit_bytes: self.size_limit_bytes,
            bytes,
            count: files.len(),
            version: self.version.clone(),
            tag: self.tag.clone(),
        })
    }

    /// Remove every entry and return how many were deleted. Requires `confirm = true`.
    pub fn clear(&self, confirm: bool) -> Result<usize> {
        if !confirm {
            return Err(Error::InvalidArgument(
                "pass confirm=true to clear the cache".to_string(),
            ));
        }
        let mut removed = 0;
        for (path, _) in self.entry_files()? {
            if self.remove_entry(&path) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Write every live entry as a `{"k": key, "v": value}` JSON line.
    pub fn export(&self, path: &Path) -> Result<usize> {
        let mut out = fs::File::create(path)?;
        let now = unix_now();
        let mut count = 0;
        for (file, _) in self.entry_files()? {
            let Ok(data) = fs::read(&file) else { continue };
            let Ok(entry) = serde_json::from_slice::<CacheEntry>(&data) else {
                continue;
            };
            if entry.is_expired(now) {
                continue;
            }
            let row = serde_json::json!({ "k": entry.key, "v": entry.value });
            writeln!(out, "{}", row)?;
            count += 1;
        }
        Ok(count)
    }

    /// Load entries written by [`export`](Self::export); malformed lines are skipped.
    pub fn import(&self, path: &Path) -> Result<usize> {
        let reader = BufReader::new(fs::File::open(path)?);
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            let Ok(row) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let (Some(key), Some(value)) = (row.get("k").and_then(Value::as_str), row.get("v"))
            else {
                continue;
            };
            if !is_valid_key(key) {
                continue;
            }
            self.set(key, value.clone(), None)?;
            count += 1;
        }
        Ok(count)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", key, ENTRY_EXT))
    }

    fn entry_files(&self) -> Result<Vec<(PathBuf, fs::Metadata)>> {
        let dir = match fs::read_dir(&self.directory) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for item in dir {
            let item = item?;
            let path = item.path();
            let is_entry = path.extension().is_some_and(|ext| ext == ENTRY_EXT)
                && !item.file_name().to_string_lossy().starts_with('.');
            if is_entry {
                files.push((path, item.metadata()?));
            }
        }
        Ok(files)
    }

    fn enforce_size_limit(&self) -> Result<()> {
        if self.size_limit_bytes == u64::MAX {
            return Ok(());
        }
        let mut files = self.entry_files()?;
        let mut total: u64 = files.iter().map(|(_, m)| m.len()).sum();
        if total <= self.size_limit_bytes {
            return Ok(());
        }
        files.sort_by_key(|(_, meta)| meta.modified().unwrap_or(UNIX_EPOCH));
        for (path, meta) in files {
            if total <= self.size_limit_bytes {
                break;
            }
            if self.remove_entry(&path) {
                total = total.saturating_sub(meta.len());
                debug!(cache = %self.name, path = %path.display(), "evicted cache entry");
            }
        }
        Ok(())
    }

    /// Delete one entry file; a failure is logged and reported as `false`.
    fn remove_entry(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(cache = %self.name, path = %path.display(), error = %e, "failed to remove cache entry");
                false
            }
        }
    }
}

fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
