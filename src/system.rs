//! Host characteristics used to judge whether a cached recommendation still applies
//!
//! The cache never measures the machine itself in its core logic. It asks a
//! [`SystemProbe`] for a fresh [`SystemSnapshot`] and a [`Clock`] for the
//! current time, both injected into the store at construction.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// How worker processes are started on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMethod {
    Fork,
    Spawn,
    Forkserver,
}

impl StartMethod {
    /// All accepted start methods, in their serialized spelling
    pub const NAMES: [&'static str; 3] = ["fork", "spawn", "forkserver"];

    /// The start method worker pools use by default on the current platform
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") {
            StartMethod::Fork
        } else {
            StartMethod::Spawn
        }
    }

    /// Returns the serialized name of the start method
    pub fn as_str(&self) -> &'static str {
        match self {
            StartMethod::Fork => "fork",
            StartMethod::Spawn => "spawn",
            StartMethod::Forkserver => "forkserver",
        }
    }
}

impl fmt::Display for StartMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fork" => Ok(StartMethod::Fork),
            "spawn" => Ok(StartMethod::Spawn),
            "forkserver" => Ok(StartMethod::Forkserver),
            other => Err(format!("unknown start method '{}'", other)),
        }
    }
}

/// A point-in-time record of the host, captured at save time and at every
/// compatibility check. Never mutated after capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Number of physical CPU cores
    pub physical_cores: u32,
    /// Available memory in bytes
    pub available_memory: u64,
    /// Worker start method
    pub start_method: StartMethod,
}

impl SystemSnapshot {
    pub fn new(physical_cores: u32, available_memory: u64, start_method: StartMethod) -> Self {
        Self {
            physical_cores,
            available_memory,
            start_method,
        }
    }
}

/// Source of the current [`SystemSnapshot`]
pub trait SystemProbe: Send + Sync {
    /// Captures the host as it is right now
    fn snapshot(&self) -> SystemSnapshot;
}

/// Source of "now" as seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock backed by `chrono::Utc`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Probe that measures the running host
///
/// Core count and start method do not change while a process runs, so they
/// are measured once and memoized. Available memory is measured on every
/// call. [`LiveProbe::reset`] drops the memoized values.
#[derive(Debug, Default)]
pub struct LiveProbe {
    stable: Mutex<Option<(u32, StartMethod)>>,
}

impl LiveProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets memoized measurements so the next snapshot re-measures everything
    pub fn reset(&self) {
        if let Ok(mut stable) = self.stable.lock() {
            *stable = None;
        }
    }

    fn measure_cores() -> u32 {
        let cores = System::physical_core_count()
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1);
        u32::try_from(cores).unwrap_or(u32::MAX).max(1)
    }

    fn measure_memory() -> u64 {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.available_memory().max(1)
    }
}

impl SystemProbe for LiveProbe {
    fn snapshot(&self) -> SystemSnapshot {
        let (physical_cores, start_method) = match self.stable.lock() {
            Ok(mut stable) => *stable
                .get_or_insert_with(|| (Self::measure_cores(), StartMethod::platform_default())),
            // A poisoned lock only means another thread panicked mid-measurement
            Err(_) => (Self::measure_cores(), StartMethod::platform_default()),
        };

        SystemSnapshot {
            physical_cores,
            available_memory: Self::measure_memory(),
            start_method,
        }
    }
}

/// Probe that reports whatever snapshot it was last given
///
/// Useful when the host is measured elsewhere, and in tests that need to
/// simulate hardware changes between a save and a load.
#[derive(Debug)]
pub struct ManualProbe {
    current: Mutex<SystemSnapshot>,
}

impl ManualProbe {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self {
            current: Mutex::new(snapshot),
        }
    }

    /// Replaces the snapshot returned by subsequent calls
    pub fn set(&self, snapshot: SystemSnapshot) {
        match self.current.lock() {
            Ok(mut current) => *current = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Applies `f` to the current snapshot
    pub fn update(&self, f: impl FnOnce(&mut SystemSnapshot)) {
        let mut snapshot = self.snapshot();
        f(&mut snapshot);
        self.set(snapshot);
    }
}

impl SystemProbe for ManualProbe {
    fn snapshot(&self) -> SystemSnapshot {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(now: f64) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: f64) {
        match self.now.lock() {
            Ok(mut current) => *current = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
