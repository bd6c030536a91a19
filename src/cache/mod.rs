//! Decision cache for parallel-execution recommendations
//!
//! A caller fingerprints its workload with [`build_key`], asks the
//! [`CacheStore`] to [`load`](CacheStore::load) that key, and on a miss
//! computes a fresh recommendation and [`save`](CacheStore::save)s it.
//! Entries are invalidated when they expire or when the host they were
//! measured on no longer matches the current one. The [`validate`] module
//! audits and repairs the on-disk files for operator tooling.

mod entry;
mod error;
mod fingerprint;
mod store;
pub mod validate;

pub use entry::{
    memory_within_tolerance, BenchmarkCacheEntry, BenchmarkResult, CacheEntry, CacheType,
    CachedRecord, ExecutorKind, Incompatibility, MissReason, Recommendation, CACHE_VERSION,
    DEFAULT_BENCHMARK_TTL_SECS, DEFAULT_TTL_SECS, SECS_PER_DAY,
};
pub use error::{CacheError, Result};
pub use fingerprint::{build_key, decade_bucket, time_bucket, CacheKey, WorkloadId};
pub use store::{CacheStats, CacheStore, Lookup};
pub use validate::{RepairReport, ValidationReport};
