//! tunecache - remembers parallel-execution recommendations per workload
//!
//! This crate exposes the cache, the host-probing interfaces it depends on,
//! and the CLI parsing used by the `tunecache` binary.

pub mod cache;
pub mod cli;
pub mod system;
