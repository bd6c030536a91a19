//! Validation and repair of on-disk cache entries
//!
//! Unlike [`CacheStore::load`], which silently treats a damaged entry as a
//! miss, this module re-parses entries as raw JSON and reports every problem
//! it finds. `repair` uses the same checks to delete the broken files.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use super::entry::{CacheType, ExecutorKind, CACHE_VERSION, SECS_PER_DAY};
use super::error::Result;
use super::store::{remove_file, CacheStore};
use crate::system::StartMethod;

/// Expected JSON shape of a field
#[derive(Debug, Clone, Copy)]
enum FieldKind {
    /// Integer >= 1
    Count,
    /// Number >= 0
    NonNegative,
    /// Any number (seconds since the epoch)
    Timestamp,
    Executor,
    Text,
    TextList,
    System,
    /// Non-negative integer
    Version,
}

const OPTIMIZATION_FIELDS: &[(&str, FieldKind)] = &[
    ("n_jobs", FieldKind::Count),
    ("chunksize", FieldKind::Count),
    ("executor_type", FieldKind::Executor),
    ("estimated_speedup", FieldKind::NonNegative),
    ("reason", FieldKind::Text),
    ("warnings", FieldKind::TextList),
    ("timestamp", FieldKind::Timestamp),
    ("system_info", FieldKind::System),
    ("cache_version", FieldKind::Version),
];

const BENCHMARK_FIELDS: &[(&str, FieldKind)] = &[
    ("serial_time", FieldKind::NonNegative),
    ("parallel_time", FieldKind::NonNegative),
    ("actual_speedup", FieldKind::NonNegative),
    ("n_jobs", FieldKind::Count),
    ("chunksize", FieldKind::Count),
    ("timestamp", FieldKind::Timestamp),
    ("system_info", FieldKind::System),
    ("cache_version", FieldKind::Version),
];

fn required_fields(cache_type: CacheType) -> &'static [(&'static str, FieldKind)] {
    match cache_type {
        CacheType::Optimization => OPTIMIZATION_FIELDS,
        CacheType::Benchmark => BENCHMARK_FIELDS,
    }
}

/// Aggregate health of one cache namespace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub total_entries: usize,
    pub valid_entries: usize,
    pub invalid_entries: usize,
    /// Issues of all entries, each prefixed with the file name
    pub issues: Vec<String>,
    /// `100 * valid / total`, or 100 for an empty namespace
    pub health_score: f64,
}

/// What `repair` did (or would do, in a dry run)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairReport {
    pub examined: usize,
    pub deleted: usize,
    pub kept: usize,
    pub dry_run: bool,
}

/// Checks a single entry file, collecting every issue rather than stopping at the first
///
/// Checks run in order: existence, JSON syntax, required fields, field
/// types, field ranges, schema version, and (when `ttl_secs` is given)
/// expiry relative to `now`.
pub fn validate_entry(
    path: &Path,
    cache_type: CacheType,
    now: f64,
    ttl_secs: Option<u64>,
) -> (bool, Vec<String>) {
    let mut issues = Vec::new();

    if !path.exists() {
        issues.push("File does not exist".to_string());
        return (false, issues);
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            issues.push(format!("Cannot read file: {}", e));
            return (false, issues);
        }
    };

    let value: Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            issues.push(format!("Invalid JSON: {}", e));
            return (false, issues);
        }
    };

    let Some(object) = value.as_object() else {
        issues.push("Entry is not a JSON object".to_string());
        return (false, issues);
    };

    let fields = required_fields(cache_type);
    for (name, _) in fields {
        if !object.contains_key(*name) {
            issues.push(format!("Missing required field: {}", name));
        }
    }

    for (name, kind) in fields {
        if let Some(field) = object.get(*name) {
            check_field(name, *kind, field, &mut issues);
        }
    }

    if let Some(version) = object.get("cache_version").and_then(Value::as_u64) {
        if version != u64::from(CACHE_VERSION) {
            issues.push(format!(
                "Cache version mismatch: entry has {}, expected {}",
                version, CACHE_VERSION
            ));
        }
    }

    let timestamp = object.get("timestamp").and_then(Value::as_f64);
    if let (Some(ttl_secs), Some(timestamp)) = (ttl_secs, timestamp) {
        let age = now - timestamp;
        if age > ttl_secs as f64 {
            issues.push(format!(
                "Entry expired (age: {:.1} days, TTL: {:.1} days)",
                age / SECS_PER_DAY as f64,
                ttl_secs as f64 / SECS_PER_DAY as f64
            ));
        }
    }

    (issues.is_empty(), issues)
}

fn check_field(name: &str, kind: FieldKind, value: &Value, issues: &mut Vec<String>) {
    match kind {
        FieldKind::Count => check_count(name, value, issues),
        FieldKind::NonNegative => match value.as_f64() {
            Some(n) if n >= 0.0 => {}
            Some(n) => issues.push(format!(
                "Field '{}' out of range: must be >= 0, got {}",
                name, n
            )),
            None => issues.push(wrong_type(name, "number", value)),
        },
        FieldKind::Timestamp => {
            if !value.is_number() {
                issues.push(wrong_type(name, "number", value));
            }
        }
        FieldKind::Executor => check_name(name, value, &ExecutorKind::NAMES, issues),
        FieldKind::Text => {
            if !value.is_string() {
                issues.push(wrong_type(name, "string", value));
            }
        }
        FieldKind::TextList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => {}
            Some(_) => issues.push(format!("Field '{}' must contain only strings", name)),
            None => issues.push(wrong_type(name, "array", value)),
        },
        FieldKind::System => match value.as_object() {
            Some(system) => check_system(name, system, issues),
            None => issues.push(wrong_type(name, "object", value)),
        },
        FieldKind::Version => {
            if !value.is_u64() {
                issues.push(wrong_type(name, "integer", value));
            }
        }
    }
}

fn check_count(name: &str, value: &Value, issues: &mut Vec<String>) {
    if let Some(n) = value.as_i64() {
        if n < 1 || n > i64::from(u32::MAX) {
            issues.push(format!("Field '{}' out of range: must be >= 1, got {}", name, n));
        }
    } else if value.is_u64() {
        issues.push(format!("Field '{}' out of range: value {} is too large", name, value));
    } else {
        issues.push(wrong_type(name, "integer", value));
    }
}

fn check_name(name: &str, value: &Value, allowed: &[&str], issues: &mut Vec<String>) {
    match value.as_str() {
        Some(s) if allowed.contains(&s) => {}
        Some(s) => issues.push(format!(
            "Field '{}' has invalid value '{}' (expected one of: {})",
            name,
            s,
            allowed.join(", ")
        )),
        None => issues.push(wrong_type(name, "string", value)),
    }
}

fn check_system(name: &str, system: &Map<String, Value>, issues: &mut Vec<String>) {
    for sub in ["physical_cores", "available_memory"] {
        let qualified = format!("{}.{}", name, sub);
        match system.get(sub) {
            None => issues.push(format!("Missing required field: {}", qualified)),
            Some(v) => match v.as_u64() {
                Some(n) if n >= 1 => {}
                Some(n) => issues.push(format!(
                    "Field '{}' out of range: must be >= 1, got {}",
                    qualified, n
                )),
                None => issues.push(wrong_type(&qualified, "positive integer", v)),
            },
        }
    }

    let qualified = format!("{}.start_method", name);
    match system.get("start_method") {
        None => issues.push(format!("Missing required field: {}", qualified)),
        Some(v) => check_name(&qualified, v, &StartMethod::NAMES, issues),
    }
}

fn wrong_type(name: &str, expected: &str, value: &Value) -> String {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("Field '{}' has wrong type: expected {}, found {}", name, expected, found)
}

impl CacheStore {
    /// Validates one entry file against this store's clock
    pub fn validate_entry(
        &self,
        cache_type: CacheType,
        path: &Path,
        ttl_secs: Option<u64>,
    ) -> (bool, Vec<String>) {
        validate_entry(path, cache_type, self.now(), ttl_secs)
    }

    /// Validates every entry of a cache type
    pub fn validate(
        &self,
        cache_type: CacheType,
        ttl_secs: Option<u64>,
    ) -> Result<ValidationReport> {
        let now = self.now();
        let files = self.entry_files(cache_type)?;
        let total_entries = files.len();
        let mut valid_entries = 0;
        let mut issues = Vec::new();

        for path in &files {
            let (is_valid, entry_issues) = validate_entry(path, cache_type, now, ttl_secs);
            if is_valid {
                valid_entries += 1;
            } else {
                let file_name = path.file_name().unwrap_or_default().to_string_lossy();
                issues.extend(
                    entry_issues
                        .into_iter()
                        .map(|issue| format!("{}: {}", file_name, issue)),
                );
            }
        }

        let invalid_entries = total_entries - valid_entries;
        let health_score = if total_entries == 0 {
            100.0
        } else {
            100.0 * valid_entries as f64 / total_entries as f64
        };

        Ok(ValidationReport {
            is_valid: invalid_entries == 0,
            total_entries,
            valid_entries,
            invalid_entries,
            issues,
            health_score,
        })
    }

    /// Deletes entries that fail validation; a dry run only counts them
    ///
    /// Expiry is not a validation failure here, use
    /// [`CacheStore::prune_expired`] for that. A file removed by someone
    /// else in the meantime counts as deleted; any other delete failure
    /// aborts the repair with an I/O error.
    pub fn repair(&self, cache_type: CacheType, dry_run: bool) -> Result<RepairReport> {
        let now = self.now();
        let files = self.entry_files(cache_type)?;
        let mut deleted = 0;

        for path in &files {
            let (is_valid, issues) = validate_entry(path, cache_type, now, None);
            if is_valid {
                continue;
            }

            if dry_run {
                tracing::info!(path = %path.display(), ?issues, "would delete invalid cache entry");
                deleted += 1;
                continue;
            }

            delete_invalid(path, &issues)?;
            deleted += 1;
        }

        let examined = files.len();
        tracing::info!(cache_type = %cache_type, examined, deleted, dry_run, "repaired cache");
        Ok(RepairReport {
            examined,
            deleted,
            kept: examined - deleted,
            dry_run,
        })
    }
}

/// Removes an invalid entry; a file that is already gone counts as removed
fn delete_invalid(path: &Path, issues: &[String]) -> Result<()> {
    match remove_file(path) {
        Ok(true) => {
            tracing::info!(path = %path.display(), ?issues, "deleted invalid cache entry");
            Ok(())
        }
        Ok(false) => {
            tracing::debug!(path = %path.display(), "invalid cache entry already removed");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to delete invalid cache entry"
            );
            Err(e)
        }
    }
}
