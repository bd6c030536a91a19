//! End-to-end cache scenarios through the public library API

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;
use tunecache::cache::{
    build_key, BenchmarkCacheEntry, BenchmarkResult, CacheEntry, CacheStore, CacheType,
    CachedRecord, ExecutorKind, Lookup, MissReason, Recommendation, WorkloadId, DEFAULT_TTL_SECS,
};
use tunecache::system::{ManualClock, ManualProbe, StartMethod, SystemSnapshot};

const GB: u64 = 1024 * 1024 * 1024;
const NOW: f64 = 1_750_000_000.0;

fn resize(pixels: u64) -> u64 {
    pixels / 2
}

fn blur(pixels: u64) -> u64 {
    pixels * 3
}

fn setup() -> (CacheStore, Arc<ManualProbe>, Arc<ManualClock>, TempDir) {
    let tmp = TempDir::new().expect("Failed to create temp directory");
    let probe = Arc::new(ManualProbe::new(SystemSnapshot::new(4, 32 * GB, StartMethod::Fork)));
    let clock = Arc::new(ManualClock::new(NOW));
    let store = CacheStore::with_environment(tmp.path(), probe.clone(), clock.clone());
    (store, probe, clock, tmp)
}

#[test]
fn test_hit_then_miss_after_core_count_change() {
    let (store, probe, _clock, _tmp) = setup();
    let key = build_key(&WorkloadId::of(&resize, "v1").unwrap(), 1_000, 0.004);

    store
        .save::<CacheEntry>(&key, Recommendation::new(2, 50, ExecutorKind::Process, 1.8))
        .unwrap();
    let entry = store.load::<CacheEntry>(&key, None).entry().expect("fresh entry should hit");
    assert_eq!(entry.n_jobs, 2);

    probe.update(|s| s.physical_cores = 16);
    let (entry, reason) = store.load::<CacheEntry>(&key, None).into_parts();

    assert!(entry.is_none());
    assert!(reason.contains("Physical core count changed"), "{}", reason);
    assert!(reason.contains("cached: 4"));
    assert!(reason.contains("current: 16"));
}

#[test]
fn test_similar_workload_reuses_entry() {
    let (store, _probe, _clock, _tmp) = setup();
    let id = WorkloadId::of(&resize, "v1").unwrap();

    store
        .save::<CacheEntry>(
            &build_key(&id, 1_000, 0.004),
            Recommendation::new(3, 40, ExecutorKind::Thread, 2.1),
        )
        .unwrap();

    assert!(store.load::<CacheEntry>(&build_key(&id, 1_500, 0.006), None).is_hit());
    assert!(!store.load::<CacheEntry>(&build_key(&id, 50_000, 0.004), None).is_hit());
    let other = WorkloadId::of(&blur, "v1").unwrap();
    assert!(!store.load::<CacheEntry>(&build_key(&other, 1_000, 0.004), None).is_hit());
}

#[test]
fn test_memory_drift_boundary_through_store() {
    let (store, probe, _clock, _tmp) = setup();
    let key = build_key(&WorkloadId::new("etl::transform", "3"), 10, 0.5);
    store
        .save::<CacheEntry>(&key, Recommendation::new(4, 1, ExecutorKind::Process, 3.0))
        .unwrap();

    // 32 GB cached vs 40 GB current is exactly 20% of current
    probe.update(|s| s.available_memory = 40 * GB);
    let lookup = store.load::<CacheEntry>(&key, None);
    assert!(matches!(lookup.miss_reason(), Some(MissReason::Incompatible(_))));

    probe.update(|s| s.available_memory = 40 * GB - 1);
    assert!(store.load::<CacheEntry>(&key, None).is_hit());
}

#[test]
fn test_benchmark_entries_are_stricter_and_expire_sooner() {
    let (store, probe, clock, _tmp) = setup();
    let key = build_key(&WorkloadId::new("etl::transform", "3"), 10, 0.5);
    let result = BenchmarkResult {
        serial_time: 8.0,
        parallel_time: 2.5,
        actual_speedup: 3.2,
        n_jobs: 4,
        chunksize: 2,
    };
    store.save::<BenchmarkCacheEntry>(&key, result).unwrap();

    // 15% drift: fine for estimates, not for measurements
    probe.update(|s| s.available_memory = 32 * GB * 100 / 85);
    assert!(!store.load::<BenchmarkCacheEntry>(&key, None).is_hit());

    probe.update(|s| s.available_memory = 32 * GB);
    clock.advance(4.0 * 86_400.0);
    let (_, reason) = store.load::<BenchmarkCacheEntry>(&key, None).into_parts();
    assert!(reason.starts_with("Cache entry expired"), "{}", reason);
    assert!(store.load::<BenchmarkCacheEntry>(&key, Some(DEFAULT_TTL_SECS)).is_hit());
}

#[test]
fn test_corrupt_file_is_silent_on_load_but_reported_by_validate() {
    let (store, _probe, _clock, _tmp) = setup();
    let key = build_key(&WorkloadId::new("etl::load", "1"), 100, 0.01);
    let path = store.entry_path(CacheType::Optimization, &key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, r#"{"n_jobs": -3}"#).unwrap();

    let lookup = store.load::<CacheEntry>(&key, None);
    assert!(matches!(lookup, Lookup::Miss(MissReason::Unreadable(_))));

    let (is_valid, issues) = store.validate_entry(CacheType::Optimization, &path, None);
    assert!(!is_valid);
    assert!(issues.len() >= 3, "{:?}", issues);

    let report = store.repair(CacheType::Optimization, false).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(store.load::<CacheEntry>(&key, None), Lookup::Miss(MissReason::NotFound));
}

#[test]
fn test_saved_entry_records_time_and_host() {
    let (store, _probe, _clock, _tmp) = setup();
    let key = build_key(&WorkloadId::new("etl::load", "1"), 100, 0.01);

    let entry = store
        .save::<CacheEntry>(&key, Recommendation::new(1, 1, ExecutorKind::Thread, 0.0))
        .unwrap();

    assert_eq!(entry.timestamp(), NOW);
    assert_eq!(entry.system_info().physical_cores, 4);
    assert_eq!(entry.system_info, store.current_system());
}

#[test]
fn test_prune_then_validate_empty() {
    let (store, _probe, clock, _tmp) = setup();
    for name in ["a", "b", "c"] {
        let key = build_key(&WorkloadId::new(name, "1"), 100, 0.01);
        store
            .save::<CacheEntry>(&key, Recommendation::new(2, 2, ExecutorKind::Process, 1.1))
            .unwrap();
    }
    clock.advance(DEFAULT_TTL_SECS as f64 + 1.0);

    assert_eq!(store.prune_expired(CacheType::Optimization, DEFAULT_TTL_SECS).unwrap(), 3);

    let report = store.validate(CacheType::Optimization, None).unwrap();
    assert_eq!(report.total_entries, 0);
    assert_eq!(report.health_score, 100.0);
    assert!(report.is_valid);
}
