//! Workload fingerprinting
//!
//! Maps a workload description (who runs, how many items, how long each item
//! takes) to a [`CacheKey`]. Numeric inputs are coarsened into base-10 decades
//! so that 1,000 and 1,500 items share a key while 1,000 and 50,000 do not.
//!
//! Workload identity is the registered name of the function plus a
//! caller-supplied version tag. Changing either yields a new key; bump the
//! version whenever the function body changes in a way that affects timing.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{CacheError, Result};

/// Identity of the function being parallelized
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadId {
    name: String,
    version: String,
}

impl WorkloadId {
    /// Creates an identity from a registered name and a version/build tag
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Creates an identity from the fully-qualified type name of `F`
    ///
    /// Only named `fn` items have a distinct type name. Closures, function
    /// pointers and trait objects share names with unrelated callables and
    /// fail with [`CacheError::AnonymousWorkload`]; name those with
    /// [`WorkloadId::new`].
    pub fn of<F>(_func: &F, version: impl Into<String>) -> Result<Self> {
        let name = std::any::type_name::<F>();
        if is_anonymous(name) {
            return Err(CacheError::AnonymousWorkload(name.to_string()));
        }
        Ok(Self::new(name, version))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stable hex digest of name and version
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.version.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn is_anonymous(type_name: &str) -> bool {
    type_name.contains("{{closure}}") || type_name.contains("fn(") || type_name.contains("dyn ")
}

/// A cache key: SHA-256 of the workload fingerprint, as 64 lowercase hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Validates an externally supplied key (e.g. from a file name or CLI)
    pub fn parse(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.len() != 64 {
            return Err(CacheError::InvalidKey(format!(
                "expected 64 hex characters, got {}",
                key.len()
            )));
        }
        if !key.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
            return Err(CacheError::InvalidKey(
                "key must contain only lowercase hex digits".to_string(),
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name the entry for this key is stored under
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base-10 decade of a count: `floor(log10(max(n, 1)))`
pub fn decade_bucket(value: u64) -> u32 {
    value.max(1).ilog10()
}

/// Decade of a per-item time given in seconds, measured in microseconds
///
/// Negative and NaN inputs land in decade 0.
pub fn time_bucket(avg_item_time: f64) -> u32 {
    let micros = avg_item_time * 1_000_000.0;
    // `as` saturates and maps NaN to 0
    decade_bucket(micros as u64)
}

/// Derives the cache key for a workload
///
/// Deterministic across process restarts: it depends only on the workload
/// identity and the decades of `data_size` and `avg_item_time`.
pub fn build_key(workload: &WorkloadId, data_size: u64, avg_item_time: f64) -> CacheKey {
    let material = format!(
        "{}|size:{}|time:{}",
        workload.digest(),
        decade_bucket(data_size),
        time_bucket(avg_item_time)
    );
    CacheKey(hex::encode(Sha256::digest(material.as_bytes())))
}
