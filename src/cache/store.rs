//! Cache store for persisting recommendations to disk
//!
//! Provides a `CacheStore` that keeps one JSON file per cache key, inside one
//! sub-directory per [`CacheType`]. Reads are lenient: a missing, corrupt or
//! stale file is a [`Lookup::Miss`] with a reason, never an error.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use super::entry::{
    BenchmarkCacheEntry, CacheEntry, CacheType, CachedRecord, Incompatibility, MissReason,
    CACHE_VERSION,
};
use super::error::{CacheError, Result};
use super::fingerprint::CacheKey;
use crate::system::{Clock, LiveProbe, SystemClock, SystemProbe, SystemSnapshot};

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<R> {
    /// A usable entry for the current host
    Found(R),
    /// No usable entry, and why
    Miss(MissReason),
}

impl<R> Lookup<R> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn entry(self) -> Option<R> {
        match self {
            Lookup::Found(entry) => Some(entry),
            Lookup::Miss(_) => None,
        }
    }

    pub fn miss_reason(&self) -> Option<&MissReason> {
        match self {
            Lookup::Found(_) => None,
            Lookup::Miss(reason) => Some(reason),
        }
    }

    /// `(Some(entry), "")` on a hit, `(None, reason)` on a miss
    pub fn into_parts(self) -> (Option<R>, String) {
        match self {
            Lookup::Found(entry) => (Some(entry), String::new()),
            Lookup::Miss(reason) => (None, reason.to_string()),
        }
    }
}

/// Summary of the entries in one cache namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Entries `load` would return
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub incompatible_entries: usize,
    /// Entries that could not be read or parsed
    pub unreadable_entries: usize,
    pub total_size_bytes: u64,
    pub oldest_age_secs: Option<f64>,
    pub newest_age_secs: Option<f64>,
}

/// Reads and writes cached recommendations on disk
///
/// Entries are stored as JSON files in an XDG-compliant cache directory
/// (`~/.cache/tunecache/<cache_type>/` on Linux). The current host and the
/// current time come from the injected [`SystemProbe`] and [`Clock`].
#[derive(Clone)]
pub struct CacheStore {
    base_dir: PathBuf,
    probe: Arc<dyn SystemProbe>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Creates a store in the platform cache directory, measuring the live host
    ///
    /// Fails with [`CacheError::NoCacheDir`] if no home directory is known.
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("", "", "tunecache").ok_or(CacheError::NoCacheDir)?;
        Ok(Self::with_dir(project_dirs.cache_dir()))
    }

    /// Creates a store rooted at a custom directory, measuring the live host
    pub fn with_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_environment(base_dir, Arc::new(LiveProbe::new()), Arc::new(SystemClock))
    }

    /// Creates a store with explicit host and time sources
    pub fn with_environment(
        base_dir: impl Into<PathBuf>,
        probe: Arc<dyn SystemProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            probe,
            clock,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn current_system(&self) -> SystemSnapshot {
        self.probe.snapshot()
    }

    /// Returns the directory for a cache type without touching the filesystem
    pub fn type_dir(&self, cache_type: CacheType) -> PathBuf {
        self.base_dir.join(cache_type.dir_name())
    }

    /// Returns the directory for a cache type, creating it if absent
    pub fn get_cache_dir(&self, cache_type: CacheType) -> Result<PathBuf> {
        let dir = self.type_dir(cache_type);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io("create_dir_all", &dir, e))?;
        Ok(dir)
    }

    /// Path of the file an entry for `key` lives in
    pub fn entry_path(&self, cache_type: CacheType, key: &CacheKey) -> PathBuf {
        self.type_dir(cache_type).join(key.file_name())
    }

    /// Stores a record under `key`, overwriting any previous one
    ///
    /// Stamps the record with the current time and host snapshot. The file is
    /// written to a temporary file in the same directory and renamed into
    /// place so a concurrent reader never sees half a record.
    pub fn save<R: CachedRecord>(&self, key: &CacheKey, fields: R::Fields) -> Result<R> {
        let record = R::stamp(fields, self.current_system(), self.now())?;
        let dir = self.get_cache_dir(R::CACHE_TYPE)?;
        let path = dir.join(key.file_name());

        let json = serde_json::to_string_pretty(&record)?;

        let mut tmp =
            NamedTempFile::new_in(&dir).map_err(|e| CacheError::io("create", &dir, e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| CacheError::io("write", tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io("sync", tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| CacheError::io("rename", &path, e.error))?;

        tracing::debug!(key = %key, cache_type = %R::CACHE_TYPE, "saved cache entry");
        Ok(record)
    }

    /// Looks up a usable record for `key`
    ///
    /// `ttl_secs` defaults to the cache type's TTL. Checks run in a fixed
    /// order (schema version, core count, start method, memory, expiry) and
    /// the first failure becomes the miss reason.
    pub fn load<R: CachedRecord>(&self, key: &CacheKey, ttl_secs: Option<u64>) -> Lookup<R> {
        let path = self.entry_path(R::CACHE_TYPE, key);
        let ttl_secs = ttl_secs.unwrap_or_else(|| R::CACHE_TYPE.default_ttl_secs());

        let outcome = read_record::<R>(&path).and_then(|record| self.judge(record, ttl_secs));

        match outcome {
            Ok(record) => {
                tracing::debug!(key = %key, cache_type = %R::CACHE_TYPE, "cache hit");
                Lookup::Found(record)
            }
            Err(reason) => {
                if let MissReason::Unreadable(detail) = &reason {
                    tracing::warn!(
                        path = %path.display(),
                        %detail,
                        "skipping unreadable cache entry"
                    );
                }
                tracing::debug!(
                    key = %key,
                    cache_type = %R::CACHE_TYPE,
                    reason = %reason,
                    "cache miss"
                );
                Lookup::Miss(reason)
            }
        }
    }

    fn judge<R: CachedRecord>(
        &self,
        record: R,
        ttl_secs: u64,
    ) -> std::result::Result<R, MissReason> {
        record.evaluate(&self.current_system(), self.now(), ttl_secs)?;
        Ok(record)
    }

    /// Deletes every entry file (`*.json`) in the cache type's directory
    ///
    /// Returns the number of files deleted. Clearing an empty or missing
    /// directory returns 0. Temporary files of in-flight saves are left alone.
    pub fn clear(&self, cache_type: CacheType) -> Result<usize> {
        let mut deleted = 0;

        for path in self.entry_files(cache_type)? {
            if remove_file(&path)? {
                deleted += 1;
            }
        }

        tracing::info!(cache_type = %cache_type, deleted, "cleared cache");
        Ok(deleted)
    }

    /// Deletes every entry older than `ttl_secs`, regardless of compatibility
    ///
    /// Files whose timestamp cannot be read are left for [`CacheStore::repair`].
    pub fn prune_expired(&self, cache_type: CacheType, ttl_secs: u64) -> Result<usize> {
        let now = self.now();
        let mut deleted = 0;

        for path in self.entry_files(cache_type)? {
            let Some(timestamp) = read_timestamp(&path) else {
                continue;
            };
            if now - timestamp > ttl_secs as f64 && remove_file(&path)? {
                deleted += 1;
            }
        }

        tracing::info!(
            cache_type = %cache_type,
            deleted,
            ttl_secs,
            "pruned expired cache entries"
        );
        Ok(deleted)
    }

    /// Classifies every entry the way `load` would, without deleting anything
    pub fn stats(&self, cache_type: CacheType, ttl_secs: Option<u64>) -> Result<CacheStats> {
        let ttl_secs = ttl_secs.unwrap_or_else(|| cache_type.default_ttl_secs());
        let now = self.now();
        let mut stats = CacheStats::default();

        for path in self.entry_files(cache_type)? {
            stats.total_entries += 1;
            stats.total_size_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

            if let Some(timestamp) = read_timestamp(&path) {
                let age = now - timestamp;
                stats.oldest_age_secs = Some(stats.oldest_age_secs.map_or(age, |a| a.max(age)));
                stats.newest_age_secs = Some(stats.newest_age_secs.map_or(age, |a| a.min(age)));
            }

            let verdict = match cache_type {
                CacheType::Optimization => self.classify::<CacheEntry>(&path, ttl_secs),
                CacheType::Benchmark => self.classify::<BenchmarkCacheEntry>(&path, ttl_secs),
            };
            match verdict {
                Ok(()) => stats.valid_entries += 1,
                Err(MissReason::Expired { .. }) => stats.expired_entries += 1,
                Err(MissReason::Incompatible(_)) => stats.incompatible_entries += 1,
                Err(MissReason::NotFound) | Err(MissReason::Unreadable(_)) => {
                    stats.unreadable_entries += 1
                }
            }
        }

        Ok(stats)
    }

    fn classify<R: CachedRecord>(
        &self,
        path: &Path,
        ttl_secs: u64,
    ) -> std::result::Result<(), MissReason> {
        let record = read_record::<R>(path)?;
        self.judge(record, ttl_secs).map(|_| ())
    }

    /// All entry files (`*.json`) of a cache type, sorted by name
    pub(crate) fn entry_files(&self, cache_type: CacheType) -> Result<Vec<PathBuf>> {
        list_entry_files(&self.type_dir(cache_type))
    }
}

/// Reads a record leniently; every failure becomes a miss reason
fn read_record<R: CachedRecord>(path: &Path) -> std::result::Result<R, MissReason> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(MissReason::NotFound),
        Err(e) => return Err(MissReason::Unreadable(e.to_string())),
    };

    let value: Value = serde_json::from_str(&content)
        .map_err(|e| MissReason::Unreadable(format!("invalid JSON: {}", e)))?;

    // A schema change may make the rest unparseable, so check the marker first
    if let Some(version) = value.get("cache_version").and_then(Value::as_u64) {
        if version != u64::from(CACHE_VERSION) {
            return Err(MissReason::Incompatible(Incompatibility::VersionMismatch {
                cached: u32::try_from(version).unwrap_or(u32::MAX),
                current: CACHE_VERSION,
            }));
        }
    }

    let record: R = serde_json::from_value(value)
        .map_err(|e| MissReason::Unreadable(format!("malformed entry: {}", e)))?;
    record
        .check_fields()
        .map_err(|e| MissReason::Unreadable(format!("invalid entry: {}", e)))?;
    Ok(record)
}

fn read_timestamp(path: &Path) -> Option<f64> {
    let content = fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;
    value.get("timestamp").and_then(Value::as_f64)
}

/// Regular `*.json` files in `dir`, sorted; a missing directory is empty
fn list_entry_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io("read_dir", dir, e)),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| CacheError::io("read_dir_entry", dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Removes a file; `Ok(false)` if someone else removed it first
pub(crate) fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io("remove_file", path, e)),
    }
}
