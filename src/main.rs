//! tunecache - inspect and maintain the recommendation cache
//!
//! A small command-line front end over [`tunecache::cache::CacheStore`] for
//! operators: locate the cache, summarize it, clear, prune, validate and
//! repair it.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use tunecache::cache::{
    CacheStats, CacheStore, CacheType, RepairReport, ValidationReport, SECS_PER_DAY,
};
use tunecache::cli::{Action, Cli, Settings};

/// Installs a stderr log subscriber; `RUST_LOG` wins over the `-v` level
fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(settings: &Settings) -> Result<CacheStore, Box<dyn Error>> {
    match &settings.cache_dir {
        Some(dir) => Ok(CacheStore::with_dir(dir)),
        None => Ok(CacheStore::new()?),
    }
}

fn format_age(secs: Option<f64>) -> String {
    match secs {
        Some(secs) => format!("{:.1} days", secs / SECS_PER_DAY as f64),
        None => "-".to_string(),
    }
}

fn print_stats(cache_type: CacheType, stats: &CacheStats) {
    println!("Cache type:           {}", cache_type);
    println!("Total entries:        {}", stats.total_entries);
    println!("  valid:              {}", stats.valid_entries);
    println!("  expired:            {}", stats.expired_entries);
    println!("  incompatible:       {}", stats.incompatible_entries);
    println!("  unreadable:         {}", stats.unreadable_entries);
    println!("Total size:           {} bytes", stats.total_size_bytes);
    println!("Oldest entry age:     {}", format_age(stats.oldest_age_secs));
    println!("Newest entry age:     {}", format_age(stats.newest_age_secs));
}

fn print_validation(cache_type: CacheType, report: &ValidationReport) {
    println!("Cache type:     {}", cache_type);
    println!(
        "Entries:        {} total, {} valid, {} invalid",
        report.total_entries, report.valid_entries, report.invalid_entries
    );
    println!("Health score:   {:.1}", report.health_score);
    for issue in &report.issues {
        println!("  - {}", issue);
    }
}

fn print_repair(cache_type: CacheType, report: &RepairReport) {
    let verb = if report.dry_run { "would delete" } else { "deleted" };
    println!(
        "{}: examined {}, {} {}, kept {}",
        cache_type,
        report.examined,
        verb,
        report.deleted,
        report.kept
    );
}

fn run(settings: &Settings) -> Result<ExitCode, Box<dyn Error>> {
    let store = open_store(settings)?;

    match settings.action {
        Action::Dir(cache_type) => {
            let dir = store.get_cache_dir(cache_type)?;
            if settings.json {
                println!("{}", json!({ "cache_type": cache_type.as_str(), "path": dir }));
            } else {
                println!("{}", dir.display());
            }
        }
        Action::Stats(cache_type) => {
            let stats = store.stats(cache_type, Some(settings.ttl_for(cache_type)))?;
            if settings.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(cache_type, &stats);
            }
        }
        Action::Clear(cache_type) => {
            let deleted = store.clear(cache_type)?;
            if settings.json {
                println!("{}", json!({ "cache_type": cache_type.as_str(), "deleted": deleted }));
            } else {
                println!("Cleared {} {} cache entries", deleted, cache_type);
            }
        }
        Action::Prune(cache_type) => {
            let deleted = store.prune_expired(cache_type, settings.ttl_for(cache_type))?;
            if settings.json {
                println!("{}", json!({ "cache_type": cache_type.as_str(), "deleted": deleted }));
            } else {
                println!("Pruned {} expired {} cache entries", deleted, cache_type);
            }
        }
        Action::Validate {
            cache_type,
            check_expiry,
        } => {
            let ttl = check_expiry.then(|| settings.ttl_for(cache_type));
            let report = store.validate(cache_type, ttl)?;
            if settings.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_validation(cache_type, &report);
            }
            if !report.is_valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        Action::Repair { cache_type, dry_run } => {
            let report = store.repair(cache_type, dry_run)?;
            if settings.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_repair(cache_type, &report);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::from_cli(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    init_logging(settings.log_level);

    match run(&settings) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
