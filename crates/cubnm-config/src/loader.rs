// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, CubnmConfig, OutDir};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "cubnm.toml";

/// Find the cuBNM configuration file
///
/// Search order:
/// 1. `CUBNM_CONFIG_PATH` environment variable
/// 2. Current working directory: `./cubnm.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("CUBNM_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by CUBNM_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    let mut search_paths = Vec::new();

    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "cuBNM configuration file '{}' not found in any of these locations:\n{}\n\nSet CUBNM_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML.
/// Validation is a separate step, see [`crate::validate_config`].
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<CubnmConfig> {
    let config_file = if let Some(path) = config_path {
        path.to_path_buf()
    } else {
        find_config_file()?
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: CubnmConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);

    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

fn parse_flag(value: &str) -> bool {
    let lower = value.to_lowercase();
    lower == "true" || lower == "1" || lower == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `CUBNM_DURATION` -> `batch.duration`
/// - `CUBNM_TR` -> `batch.tr`
/// - `CUBNM_SC_PATH` -> `batch.sc_path`
/// - `CUBNM_SC_DIST_PATH` -> `batch.sc_dist_path`
/// - `CUBNM_OUT_DIR` -> `batch.out_dir`
/// - `CUBNM_RAND_SEED` -> `batch.rand_seed`
/// - `CUBNM_FORCE_CPU` -> `batch.force_cpu`
/// - `CUBNM_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut CubnmConfig) {
    if let Ok(value) = env::var("CUBNM_DURATION") {
        if let Ok(duration) = value.parse::<f64>() {
            config.batch.duration = duration;
        }
    }
    if let Ok(value) = env::var("CUBNM_TR") {
        if let Ok(tr) = value.parse::<f64>() {
            config.batch.tr = tr;
        }
    }
    if let Ok(value) = env::var("CUBNM_SC_PATH") {
        config.batch.sc_path = PathBuf::from(value);
    }
    if let Ok(value) = env::var("CUBNM_SC_DIST_PATH") {
        config.batch.sc_dist_path = Some(PathBuf::from(value));
    }
    if let Ok(value) = env::var("CUBNM_OUT_DIR") {
        config.batch.out_dir = OutDir::from(value);
    }
    if let Ok(value) = env::var("CUBNM_RAND_SEED") {
        if let Ok(seed) = value.parse::<u64>() {
            config.batch.rand_seed = seed;
        }
    }
    if let Ok(value) = env::var("CUBNM_FORCE_CPU") {
        config.batch.force_cpu = parse_flag(&value);
    }
    if let Ok(value) = env::var("CUBNM_LOG_LEVEL") {
        config.logging.level = value;
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"duration": "120", "force_cpu": "true"}`)
pub fn apply_cli_overrides(config: &mut CubnmConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("duration") {
        if let Ok(duration) = value.parse::<f64>() {
            config.batch.duration = duration;
        }
    }
    if let Some(value) = cli_args.get("tr") {
        if let Ok(tr) = value.parse::<f64>() {
            config.batch.tr = tr;
        }
    }
    if let Some(value) = cli_args.get("sc_path") {
        config.batch.sc_path = PathBuf::from(value);
    }
    if let Some(value) = cli_args.get("sc_dist_path") {
        config.batch.sc_dist_path = Some(PathBuf::from(value));
    }
    if let Some(value) = cli_args.get("out_dir") {
        config.batch.out_dir = OutDir::from(value.clone());
    }
    if let Some(value) = cli_args.get("rand_seed") {
        if let Ok(seed) = value.parse::<u64>() {
            config.batch.rand_seed = seed;
        }
    }
    if let Some(value) = cli_args.get("force_cpu") {
        config.batch.force_cpu = parse_flag(value);
    }
    if let Some(value) = cli_args.get("model") {
        if let Ok(kind) = value.parse() {
            config.model.variant = kind;
        }
    }
    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelKind;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("CUBNM_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("CUBNM_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("CUBNM_DURATION");
        env::remove_var("CUBNM_TR");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[batch]").unwrap();
        writeln!(file, "duration = 120.0").unwrap();
        writeln!(file, "tr = 0.72").unwrap();
        writeln!(file, "sc_path = \"sc.txt\"").unwrap();
        writeln!(file, "bw_params = \"heinzle2016-3T\"").unwrap();
        writeln!(file, "[model]").unwrap();
        writeln!(file, "variant = \"rWWEx\"").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.batch.duration, 120.0);
        assert_eq!(config.batch.tr, 0.72);
        assert_eq!(config.batch.window_step, 2);
        assert_eq!(config.model.variant, ModelKind::RwwEx);
        assert!(config.model.do_fic);
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = CubnmConfig::default();

        env::set_var("CUBNM_RAND_SEED", "7");
        env::set_var("CUBNM_FORCE_CPU", "yes");

        apply_environment_overrides(&mut config);

        env::remove_var("CUBNM_RAND_SEED");
        env::remove_var("CUBNM_FORCE_CPU");

        assert_eq!(config.batch.rand_seed, 7);
        assert!(config.batch.force_cpu);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = CubnmConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("duration".to_string(), "300".to_string());
        cli_args.insert("out_dir".to_string(), "same".to_string());
        cli_args.insert("model".to_string(), "rWWEx".to_string());

        apply_cli_overrides(&mut config, &cli_args);

        assert_eq!(config.batch.duration, 300.0);
        assert_eq!(config.batch.out_dir, OutDir::Same);
        assert_eq!(config.model.variant, ModelKind::RwwEx);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[batch]").unwrap();
        writeln!(file, "duration = 60.0").unwrap();
        writeln!(file, "tr = 1.0").unwrap();

        env::set_var("CUBNM_DURATION", "90");
        env::set_var("CUBNM_TR", "2");

        let mut cli_args = HashMap::new();
        cli_args.insert("duration".to_string(), "45".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("CUBNM_DURATION");
        env::remove_var("CUBNM_TR");

        // CLI wins for duration, env wins for TR (no CLI override)
        assert_eq!(config.batch.duration, 45.0);
        assert_eq!(config.batch.tr, 2.0);
    }
}
