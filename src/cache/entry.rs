//! Cache entry records and their trust rules
//!
//! Two record kinds live in the cache: [`CacheEntry`] holds an estimated
//! recommendation, [`BenchmarkCacheEntry`] holds an empirically measured one.
//! Both carry the time and the host snapshot they were created under, and
//! both decide for themselves whether they still apply via [`CachedRecord`].

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{CacheError, Result};
use crate::system::{StartMethod, SystemSnapshot};

/// Schema version written into every record
pub const CACHE_VERSION: u32 = 1;

/// Default time-to-live for optimization entries (7 days)
pub const DEFAULT_TTL_SECS: u64 = 7 * SECS_PER_DAY;

/// Default time-to-live for benchmark entries (3 days)
pub const DEFAULT_BENCHMARK_TTL_SECS: u64 = 3 * SECS_PER_DAY;

pub const SECS_PER_DAY: u64 = 86_400;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Namespace of a cache record; each maps to its own sub-directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    Optimization,
    Benchmark,
}

impl CacheType {
    pub const ALL: [CacheType; 2] = [CacheType::Optimization, CacheType::Benchmark];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Optimization => "optimization",
            CacheType::Benchmark => "benchmark",
        }
    }

    /// Sub-directory of the base cache directory holding this namespace
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }

    pub fn default_ttl_secs(&self) -> u64 {
        match self {
            CacheType::Optimization => DEFAULT_TTL_SECS,
            CacheType::Benchmark => DEFAULT_BENCHMARK_TTL_SECS,
        }
    }

    /// Relative memory drift (percent of current memory) an entry tolerates
    pub fn memory_tolerance_percent(&self) -> u64 {
        match self {
            CacheType::Optimization => 20,
            CacheType::Benchmark => 10,
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "optimization" => Ok(CacheType::Optimization),
            "benchmark" => Ok(CacheType::Benchmark),
            other => Err(CacheError::UnknownCacheType(other.to_string())),
        }
    }
}

/// Kind of executor a recommendation is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Process,
    Thread,
}

impl ExecutorKind {
    pub const NAMES: [&'static str; 2] = ["process", "thread"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Process => "process",
            ExecutorKind::Thread => "thread",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied fields of an optimization recommendation
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub n_jobs: u32,
    pub chunksize: u32,
    pub executor_type: ExecutorKind,
    pub estimated_speedup: f64,
    /// Human explanation of the recommendation
    pub reason: String,
    pub warnings: Vec<String>,
}

impl Recommendation {
    pub fn new(
        n_jobs: u32,
        chunksize: u32,
        executor_type: ExecutorKind,
        estimated_speedup: f64,
    ) -> Self {
        Self {
            n_jobs,
            chunksize,
            executor_type,
            estimated_speedup,
            reason: String::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Caller-supplied fields of a benchmark measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkResult {
    pub serial_time: f64,
    pub parallel_time: f64,
    pub actual_speedup: f64,
    pub n_jobs: u32,
    pub chunksize: u32,
}

/// A stored optimization recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub n_jobs: u32,
    pub chunksize: u32,
    pub executor_type: ExecutorKind,
    pub estimated_speedup: f64,
    pub reason: String,
    pub warnings: Vec<String>,
    /// Creation time, seconds since the Unix epoch
    pub timestamp: f64,
    pub system_info: SystemSnapshot,
    pub cache_version: u32,
}

impl CacheEntry {
    /// The recommendation this entry carries, without its metadata
    pub fn recommendation(&self) -> Recommendation {
        Recommendation {
            n_jobs: self.n_jobs,
            chunksize: self.chunksize,
            executor_type: self.executor_type,
            estimated_speedup: self.estimated_speedup,
            reason: self.reason.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

/// A stored benchmark measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCacheEntry {
    pub serial_time: f64,
    pub parallel_time: f64,
    pub actual_speedup: f64,
    pub n_jobs: u32,
    pub chunksize: u32,
    pub timestamp: f64,
    pub system_info: SystemSnapshot,
    pub cache_version: u32,
}

/// Why a record no longer matches the current host
#[derive(Debug, Clone, PartialEq)]
pub enum Incompatibility {
    VersionMismatch { cached: u32, current: u32 },
    CoreCount { cached: u32, current: u32 },
    StartMethod { cached: StartMethod, current: StartMethod },
    Memory { cached: u64, current: u64 },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::VersionMismatch { cached, current } => write!(
                f,
                "cache schema version mismatch (cached: {}, current: {})",
                cached, current
            ),
            Incompatibility::CoreCount { cached, current } => write!(
                f,
                "Physical core count changed (cached: {}, current: {})",
                cached, current
            ),
            Incompatibility::StartMethod { cached, current } => write!(
                f,
                "Start method changed (cached: {}, current: {})",
                cached, current
            ),
            Incompatibility::Memory { cached, current } => write!(
                f,
                "Available memory changed significantly (cached: {:.2} GB, current: {:.2} GB)",
                *cached as f64 / BYTES_PER_GB,
                *current as f64 / BYTES_PER_GB
            ),
        }
    }
}

/// Why `load` returned no usable entry
#[derive(Debug, Clone, PartialEq)]
pub enum MissReason {
    /// No file for the key
    NotFound,
    /// The file exists but could not be read or parsed
    Unreadable(String),
    Expired { age_secs: f64, ttl_secs: u64 },
    Incompatible(Incompatibility),
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::NotFound => f.write_str("No cached entry found for this workload."),
            MissReason::Unreadable(detail) => {
                write!(f, "Cached entry could not be read ({}).", detail)
            }
            MissReason::Expired { age_secs, ttl_secs } => write!(
                f,
                "Cache entry expired (age: {:.1} days, TTL: {:.1} days).",
                age_secs / SECS_PER_DAY as f64,
                *ttl_secs as f64 / SECS_PER_DAY as f64
            ),
            MissReason::Incompatible(incompatibility) => write!(f, "{}", incompatibility),
        }
    }
}

/// Common behavior of everything stored in the cache
pub trait CachedRecord: Serialize + DeserializeOwned + Sized {
    /// Caller-supplied part of the record
    type Fields;

    const CACHE_TYPE: CacheType;

    /// Builds a record from validated fields plus the creation metadata
    fn stamp(fields: Self::Fields, system_info: SystemSnapshot, timestamp: f64) -> Result<Self>;

    /// Range-checks every field; a record read from disk must pass before use
    fn check_fields(&self) -> Result<()>;

    fn timestamp(&self) -> f64;

    fn system_info(&self) -> &SystemSnapshot;

    fn cache_version(&self) -> u32;

    /// Seconds since the record was created
    fn age_secs(&self, now: f64) -> f64 {
        now - self.timestamp()
    }

    /// True iff the record is older than `ttl_secs` at time `now`
    fn is_expired(&self, now: f64, ttl_secs: u64) -> bool {
        self.age_secs(now) > ttl_secs as f64
    }

    /// Checks schema version, core count, start method and memory, in that order
    fn check_compatibility(
        &self,
        current: &SystemSnapshot,
    ) -> std::result::Result<(), Incompatibility> {
        if self.cache_version() != CACHE_VERSION {
            return Err(Incompatibility::VersionMismatch {
                cached: self.cache_version(),
                current: CACHE_VERSION,
            });
        }

        let cached = self.system_info();
        if cached.physical_cores != current.physical_cores {
            return Err(Incompatibility::CoreCount {
                cached: cached.physical_cores,
                current: current.physical_cores,
            });
        }
        if cached.start_method != current.start_method {
            return Err(Incompatibility::StartMethod {
                cached: cached.start_method,
                current: current.start_method,
            });
        }
        if !memory_within_tolerance(
            cached.available_memory,
            current.available_memory,
            Self::CACHE_TYPE.memory_tolerance_percent(),
        ) {
            return Err(Incompatibility::Memory {
                cached: cached.available_memory,
                current: current.available_memory,
            });
        }

        Ok(())
    }

    /// `(true, "")` when compatible, otherwise `(false, reason)`
    fn is_system_compatible(&self, current: &SystemSnapshot) -> (bool, String) {
        match self.check_compatibility(current) {
            Ok(()) => (true, String::new()),
            Err(incompatibility) => (false, incompatibility.to_string()),
        }
    }

    /// Full trust decision: compatibility first, then expiry
    fn evaluate(
        &self,
        current: &SystemSnapshot,
        now: f64,
        ttl_secs: u64,
    ) -> std::result::Result<(), MissReason> {
        self.check_compatibility(current).map_err(MissReason::Incompatible)?;
        if self.is_expired(now, ttl_secs) {
            return Err(MissReason::Expired {
                age_secs: self.age_secs(now),
                ttl_secs,
            });
        }
        Ok(())
    }
}

/// Strict tolerance: a drift of exactly `tolerance_percent` is incompatible
pub fn memory_within_tolerance(cached: u64, current: u64, tolerance_percent: u64) -> bool {
    let diff = u128::from(cached.abs_diff(current));
    diff * 100 < u128::from(tolerance_percent) * u128::from(current)
}

fn check_count(field: &'static str, value: u32) -> Result<()> {
    if value < 1 {
        return Err(CacheError::invalid(field, format!("must be >= 1, got {}", value)));
    }
    Ok(())
}

fn check_non_negative(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(CacheError::invalid(
            field,
            format!("must be a finite number >= 0, got {}", value),
        ));
    }
    Ok(())
}

fn check_snapshot(snapshot: &SystemSnapshot) -> Result<()> {
    check_count("system_info.physical_cores", snapshot.physical_cores)?;
    if snapshot.available_memory < 1 {
        return Err(CacheError::invalid(
            "system_info.available_memory",
            "must be >= 1 byte, got 0",
        ));
    }
    Ok(())
}

impl CachedRecord for CacheEntry {
    type Fields = Recommendation;

    const CACHE_TYPE: CacheType = CacheType::Optimization;

    fn stamp(fields: Recommendation, system_info: SystemSnapshot, timestamp: f64) -> Result<Self> {
        let entry = Self {
            n_jobs: fields.n_jobs,
            chunksize: fields.chunksize,
            executor_type: fields.executor_type,
            estimated_speedup: fields.estimated_speedup,
            reason: fields.reason,
            warnings: fields.warnings,
            timestamp,
            system_info,
            cache_version: CACHE_VERSION,
        };
        entry.check_fields()?;
        Ok(entry)
    }

    fn check_fields(&self) -> Result<()> {
        check_count("n_jobs", self.n_jobs)?;
        check_count("chunksize", self.chunksize)?;
        check_non_negative("estimated_speedup", self.estimated_speedup)?;
        check_snapshot(&self.system_info)
    }

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn system_info(&self) -> &SystemSnapshot {
        &self.system_info
    }

    fn cache_version(&self) -> u32 {
        self.cache_version
    }
}

impl CachedRecord for BenchmarkCacheEntry {
    type Fields = BenchmarkResult;

    const CACHE_TYPE: CacheType = CacheType::Benchmark;

    fn stamp(fields: BenchmarkResult, system_info: SystemSnapshot, timestamp: f64) -> Result<Self> {
        let entry = Self {
            serial_time: fields.serial_time,
            parallel_time: fields.parallel_time,
            actual_speedup: fields.actual_speedup,
            n_jobs: fields.n_jobs,
            chunksize: fields.chunksize,
            timestamp,
            system_info,
            cache_version: CACHE_VERSION,
        };
        entry.check_fields()?;
        Ok(entry)
    }

    fn check_fields(&self) -> Result<()> {
        check_non_negative("serial_time", self.serial_time)?;
        check_non_negative("parallel_time", self.parallel_time)?;
        check_non_negative("actual_speedup", self.actual_speedup)?;
        check_count("n_jobs", self.n_jobs)?;
        check_count("chunksize", self.chunksize)?;
        check_snapshot(&self.system_info)
    }

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn system_info(&self) -> &SystemSnapshot {
        &self.system_info
    }

    fn cache_version(&self) -> u32 {
        self.cache_version
    }
}
