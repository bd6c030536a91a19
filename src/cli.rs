//! Command-line interface parsing for tunecache
//!
//! This module handles parsing of CLI arguments using clap and turns them
//! into validated [`Settings`] for the binary to act on.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use thiserror::Error;

use crate::cache::{CacheError, CacheType, SECS_PER_DAY};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// A cache type name was rejected by the library
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A TTL in days does not fit in seconds
    #[error("TTL of {0} days is too large")]
    TtlOverflow(u64),
}

/// tunecache - inspect and maintain the parallel-execution recommendation cache
#[derive(Parser, Debug)]
#[command(name = "tunecache")]
#[command(about = "Inspect and maintain the parallel-execution recommendation cache")]
#[command(version)]
pub struct Cli {
    /// Base cache directory (defaults to the platform user cache directory)
    #[arg(long, env = "TUNECACHE_DIR", value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Time-to-live for optimization entries, in days
    #[arg(long, value_name = "DAYS", default_value_t = 7, global = true)]
    pub ttl_days: u64,

    /// Time-to-live for benchmark entries, in days
    #[arg(long, value_name = "DAYS", default_value_t = 3, global = true)]
    pub benchmark_ttl_days: u64,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Cache maintenance commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the cache directory, creating it if absent
    Dir(TypeArg),
    /// Summarize entries by status
    Stats(TypeArg),
    /// Delete every entry
    Clear(TypeArg),
    /// Delete entries older than the TTL
    Prune(TypeArg),
    /// Check every entry and report issues
    Validate(ValidateArgs),
    /// Delete entries that fail validation
    Repair(RepairArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TypeArg {
    /// Cache namespace: optimization or benchmark
    #[arg(long, value_name = "TYPE", default_value = "optimization")]
    pub cache_type: String,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub target: TypeArg,

    /// Also report expired entries as invalid
    #[arg(long)]
    pub check_expiry: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RepairArgs {
    #[command(flatten)]
    pub target: TypeArg,

    /// Report what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,
}

/// What the binary should do, with all arguments parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Dir(CacheType),
    Stats(CacheType),
    Clear(CacheType),
    Prune(CacheType),
    Validate { cache_type: CacheType, check_expiry: bool },
    Repair { cache_type: CacheType, dry_run: bool },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone)]
pub struct Settings {
    /// Overrides the platform cache directory
    pub cache_dir: Option<PathBuf>,
    pub optimization_ttl_secs: u64,
    pub benchmark_ttl_secs: u64,
    pub json: bool,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: &'static str,
    pub action: Action,
}

/// Parses a cache type argument into a [`CacheType`].
///
/// # Returns
/// * `Ok(CacheType)` if the string names a known namespace
/// * `Err(CliError::Cache(CacheError::UnknownCacheType))` otherwise
pub fn parse_cache_type_arg(s: &str) -> Result<CacheType, CliError> {
    Ok(s.trim().to_lowercase().parse()?)
}

fn days_to_secs(days: u64) -> Result<u64, CliError> {
    days.checked_mul(SECS_PER_DAY).ok_or(CliError::TtlOverflow(days))
}

impl Settings {
    /// Creates Settings from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(Settings)` with the parsed action
    /// * `Err(CliError)` if a cache type or TTL is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let action = match &cli.command {
            Command::Dir(arg) => Action::Dir(parse_cache_type_arg(&arg.cache_type)?),
            Command::Stats(arg) => Action::Stats(parse_cache_type_arg(&arg.cache_type)?),
            Command::Clear(arg) => Action::Clear(parse_cache_type_arg(&arg.cache_type)?),
            Command::Prune(arg) => Action::Prune(parse_cache_type_arg(&arg.cache_type)?),
            Command::Validate(args) => Action::Validate {
                cache_type: parse_cache_type_arg(&args.target.cache_type)?,
                check_expiry: args.check_expiry,
            },
            Command::Repair(args) => Action::Repair {
                cache_type: parse_cache_type_arg(&args.target.cache_type)?,
                dry_run: args.dry_run,
            },
        };

        let log_level = match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };

        Ok(Settings {
            cache_dir: cli.cache_dir.clone(),
            optimization_ttl_secs: days_to_secs(cli.ttl_days)?,
            benchmark_ttl_secs: days_to_secs(cli.benchmark_ttl_days)?,
            json: cli.json,
            log_level,
            action,
        })
    }

    /// TTL configured for a cache type
    pub fn ttl_for(&self, cache_type: CacheType) -> u64 {
        match cache_type {
            CacheType::Optimization => self.optimization_ttl_secs,
            CacheType::Benchmark => self.benchmark_ttl_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DEFAULT_BENCHMARK_TTL_SECS, DEFAULT_TTL_SECS};

    #[test]
    fn test_parse_cache_type_arg() {
        assert_eq!(parse_cache_type_arg("optimization").unwrap(), CacheType::Optimization);
        assert_eq!(parse_cache_type_arg("Benchmark").unwrap(), CacheType::Benchmark);
    }

    #[test]
    fn test_parse_cache_type_arg_invalid() {
        let err = parse_cache_type_arg("results").unwrap_err();
        assert!(matches!(err, CliError::Cache(CacheError::UnknownCacheType(_))));
        assert!(err.to_string().contains("Unknown cache type"));
        assert!(err.to_string().contains("results"));
    }

    #[test]
    fn test_default_ttls_match_library_defaults() {
        let cli = Cli::parse_from(["tunecache", "stats"]);
        let settings = Settings::from_cli(&cli).unwrap();

        assert_eq!(settings.ttl_for(CacheType::Optimization), DEFAULT_TTL_SECS);
        assert_eq!(settings.ttl_for(CacheType::Benchmark), DEFAULT_BENCHMARK_TTL_SECS);
        assert_eq!(settings.action, Action::Stats(CacheType::Optimization));
        assert_eq!(settings.log_level, "warn");
    }

    #[test]
    fn test_repair_dry_run_flag() {
        let cli =
            Cli::parse_from(["tunecache", "repair", "--cache-type", "benchmark", "--dry-run"]);
        let settings = Settings::from_cli(&cli).unwrap();

        assert_eq!(
            settings.action,
            Action::Repair {
                cache_type: CacheType::Benchmark,
                dry_run: true
            }
        );
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::parse_from(["tunecache", "prune", "--ttl-days", "1", "-vv", "--json"]);
        let settings = Settings::from_cli(&cli).unwrap();

        assert_eq!(settings.optimization_ttl_secs, SECS_PER_DAY);
        assert_eq!(settings.log_level, "debug");
        assert!(settings.json);
    }

    #[test]
    fn test_invalid_cache_type_fails_settings() {
        let cli = Cli::parse_from(["tunecache", "clear", "--cache-type", "bogus"]);
        assert!(matches!(
            Settings::from_cli(&cli),
            Err(CliError::Cache(CacheError::UnknownCacheType(_)))
        ));
    }

    #[test]
    fn test_ttl_overflow() {
        let days = u64::MAX.to_string();
        let cli = Cli::parse_from(["tunecache", "prune", "--ttl-days", days.as_str()]);
        assert!(matches!(Settings::from_cli(&cli), Err(CliError::TtlOverflow(_))));
    }
}
