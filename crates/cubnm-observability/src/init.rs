// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console logging for interactive use, and file logging with rotation,
//! per-crate log files and configurable retention for long optimization runs.

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDateTime, Utc};
use cubnm_config::LoggingConfig;
use std::path::{Path, PathBuf};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::crate_target;

/// Keeps file writers alive; logs are flushed when dropped
pub struct LoggingGuard {
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder of the file logs, `None` for console-only logging
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Initialize console-only logging
pub fn init_console_logging(debug_flags: &CrateDebugFlags, default_level: &str) -> Result<LoggingGuard> {
    let env_filter = EnvFilter::try_new(debug_flags.to_filter_string(default_level))
        .with_context(|| format!("Invalid log level: {default_level}"))?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    Ok(LoggingGuard {
        _file_guards: Vec::new(),
        log_dir: None,
    })
}

/// Initialize logging with file output and console output
///
/// Creates a timestamped folder structure:
/// ```text
/// ./logs/
///   └── run_20250101_120000/
///       ├── cubnm-sim.log
///       ├── cubnm-backend.log
///       └── cubnm.log (combined)
/// ```
///
/// # Arguments
/// * `debug_flags` - Per-crate debug flags for filtering
/// * `default_level` - Level for crates without a debug flag
/// * `log_dir` - Base directory for logs (default: `./logs`)
/// * `retention_days` - Keep logs for N days (default: 30)
/// * `retention_runs` - Keep N most recent runs (default: 10)
pub fn init_logging(
    debug_flags: &CrateDebugFlags,
    default_level: &str,
    log_dir: Option<PathBuf>,
    retention_days: Option<u64>,
    retention_runs: Option<usize>,
) -> Result<LoggingGuard> {
    let base_log_dir = log_dir.unwrap_or_else(|| PathBuf::from("./logs"));

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let run_folder = base_log_dir.join(format!("run_{}", timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;

    cleanup_old_logs(&base_log_dir, retention_days, retention_runs)?;

    let env_filter = EnvFilter::try_new(debug_flags.to_filter_string(default_level))
        .with_context(|| format!("Invalid log level: {default_level}"))?;

    let mut layers = Vec::new();
    let mut file_guards = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(env_filter.clone());
    layers.push(console_layer.boxed());

    for crate_name in crate::KNOWN_CRATES {
        let file_appender = rolling::daily(&run_folder, format!("{}.log", crate_name));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guards.push(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(EnvFilter::new(format!("{}=debug,off", crate_target(crate_name))))
            .boxed();

        layers.push(file_layer);
    }

    let combined_appender = rolling::daily(&run_folder, "cubnm.log");
    let (combined_non_blocking, combined_guard) = tracing_appender::non_blocking(combined_appender);

    let combined_layer = tracing_subscriber::fmt::layer()
        .with_writer(combined_non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(env_filter)
        .boxed();
    layers.push(combined_layer);

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    file_guards.push(combined_guard);

    Ok(LoggingGuard {
        _file_guards: file_guards,
        log_dir: Some(run_folder),
    })
}

/// Initialize logging from the `[logging]` configuration section
pub fn init_from_config(config: &LoggingConfig, debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    if config.file_logging {
        init_logging(
            debug_flags,
            &config.level,
            Some(config.log_dir.clone()),
            Some(config.retention_days),
            Some(config.retention_runs),
        )
    } else {
        init_console_logging(debug_flags, &config.level)
    }
}

fn parse_run_timestamp(dir_name: &str) -> Option<NaiveDateTime> {
    let timestamp_str = dir_name.strip_prefix("run_")?;
    NaiveDateTime::parse_from_str(timestamp_str, "%Y%m%d_%H%M%S").ok()
}

/// Clean up old log directories based on retention policy
fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: Option<u64>,
    retention_runs: Option<usize>,
) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }

    let retention_days = retention_days.unwrap_or(30);
    let retention_runs = retention_runs.unwrap_or(10);
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days as i64)).naive_utc();

    let mut runs: Vec<(PathBuf, NaiveDateTime)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(dt) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_run_timestamp)
        {
            runs.push((path, dt));
        }
    }

    // oldest first
    runs.sort_by_key(|(_, dt)| *dt);

    let (expired, kept): (Vec<_>, Vec<_>) = runs.into_iter().partition(|(_, dt)| *dt < cutoff);
    for (path, _) in &expired {
        if let Err(e) = std::fs::remove_dir_all(path) {
            eprintln!("Warning: Failed to remove old log directory {}: {}", path.display(), e);
        }
    }

    if kept.len() > retention_runs {
        let to_remove = kept.len() - retention_runs;
        for (path, _) in kept.iter().take(to_remove) {
            if let Err(e) = std::fs::remove_dir_all(path) {
                eprintln!("Warning: Failed to remove old log directory {}: {}", path.display(), e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_timestamp() {
        assert!(parse_run_timestamp("run_20250101_120000").is_some());
        assert!(parse_run_timestamp("run_garbage").is_none());
        assert!(parse_run_timestamp("other_20250101_120000").is_none());
    }

    #[test]
    fn test_cleanup_keeps_most_recent_runs() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        for hours in 0..5 {
            let ts = (now - chrono::Duration::hours(hours)).format("%Y%m%d_%H%M%S");
            std::fs::create_dir_all(dir.path().join(format!("run_{}", ts))).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("run_20000101_000000")).unwrap();

        cleanup_old_logs(dir.path(), Some(30), Some(3)).unwrap();

        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 3);
        assert!(!dir.path().join("run_20000101_000000").exists());
    }
}
