// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `cubnm.toml`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Goodness-of-fit terms understood by the scoring engine.
pub const KNOWN_GOF_TERMS: &[&str] = &["+fc_corr", "-fc_diff", "-fcd_ks", "-fc_normec", "-fic_penalty"];

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CubnmConfig {
    pub batch: BatchConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

/// Configuration of one simulation batch
///
/// Times are given in seconds; the backend receives them in msec.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Simulation duration (s)
    pub duration: f64,
    /// BOLD TR and sampling interval of extended output (s)
    pub tr: f64,
    /// Whitespace-delimited SC strength matrix
    pub sc_path: PathBuf,
    /// Optional SC distance matrix; enables inter-regional delay
    pub sc_dist_path: Option<PathBuf>,
    pub out_dir: OutDir,
    /// Return time-averaged model state variables
    pub extended_output: bool,
    /// Return full time series of the model state variables
    pub extended_output_ts: bool,
    /// Dynamic FC window size (in TR)
    pub window_size: u32,
    /// Dynamic FC window step (in TR)
    pub window_step: u32,
    pub rand_seed: u64,
    /// Exclude inter-hemispheric connections from simulated FC and FCD
    pub exc_interhemispheric: bool,
    pub force_cpu: bool,
    /// One thread per simulation with nodes computed serially (GPU only)
    pub serial_nodes: bool,
    pub gof_terms: Vec<String>,
    pub bw_params: BwParams,
    /// Initial BOLD seconds excluded from FC, FCD and state means
    pub bold_remove_s: f64,
    /// Drop the edge windows in FCD calculation
    pub fcd_drop_edges: bool,
    /// Noise segment length (s); `None` generates noise for the whole duration
    pub noise_segment_length: Option<f64>,
    pub sim_verbose: bool,
    /// Progress update interval (msec), used when `sim_verbose` is set
    pub progress_interval: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            duration: 60.0,
            tr: 1.0,
            sc_path: PathBuf::new(),
            sc_dist_path: None,
            out_dir: OutDir::Same,
            extended_output: true,
            extended_output_ts: false,
            window_size: 10,
            window_step: 2,
            rand_seed: 410,
            exc_interhemispheric: true,
            force_cpu: false,
            serial_nodes: false,
            gof_terms: vec!["+fc_corr".to_string(), "-fc_diff".to_string(), "-fcd_ks".to_string()],
            bw_params: BwParams::default(),
            bold_remove_s: 30.0,
            fcd_drop_edges: true,
            noise_segment_length: Some(30.0),
            sim_verbose: false,
            progress_interval: 500,
        }
    }
}

impl BatchConfig {
    pub fn duration_msec(&self) -> u32 {
        (self.duration * 1000.0) as u32
    }

    pub fn tr_msec(&self) -> u32 {
        (self.tr * 1000.0) as u32
    }

    /// Number of noise time steps in msec, inclusive of the last time point
    pub fn noise_time_steps(&self) -> u64 {
        let segment = self.noise_segment_length.unwrap_or(self.duration);
        (segment * 1000.0) as u64 + 1
    }

    /// Output directory with `same` resolved against the SC path
    pub fn resolved_out_dir(&self) -> PathBuf {
        match &self.out_dir {
            OutDir::Same => {
                let sc = self.sc_path.to_string_lossy();
                PathBuf::from(sc.replace(".txt", ""))
            }
            OutDir::Path(path) => path.clone(),
        }
    }

    /// Replace the hemodynamic parameter set.
    ///
    /// Returns the updated config together with the backend constant
    /// updates that must be issued for the change to take effect.
    pub fn with_bw_params(self, bw_params: BwParams) -> (Self, Vec<ConstUpdate>) {
        let updates = bw_params.const_updates();
        (Self { bw_params, ..self }, updates)
    }

    /// Whether a distance matrix was configured (inter-regional delay)
    pub fn delay_enabled(&self) -> bool {
        self.sc_dist_path.is_some()
    }
}

/// Output directory selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum OutDir {
    /// Directory named after the SC path (without `.txt`)
    #[default]
    Same,
    Path(PathBuf),
}

impl From<String> for OutDir {
    fn from(value: String) -> Self {
        if value == "same" {
            OutDir::Same
        } else {
            OutDir::Path(PathBuf::from(value))
        }
    }
}

impl From<OutDir> for String {
    fn from(value: OutDir) -> Self {
        match value {
            OutDir::Same => "same".to_string(),
            OutDir::Path(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl From<&Path> for OutDir {
    fn from(path: &Path) -> Self {
        OutDir::Path(path.to_path_buf())
    }
}

/// Balloon-Windkessel parameter presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum BwPreset {
    #[serde(rename = "friston2003")]
    Friston2003,
    #[serde(rename = "heinzle2016-3T")]
    Heinzle2016_3T,
}

/// Hemodynamic (Balloon-Windkessel) parameter set
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BwParams {
    Preset(BwPreset),
    Custom { k1: f64, k2: f64, k3: f64 },
}

impl Default for BwParams {
    fn default() -> Self {
        BwParams::Preset(BwPreset::Friston2003)
    }
}

/// Resolved BOLD signal coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BwConstants {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
}

impl BwParams {
    pub fn constants(&self) -> BwConstants {
        match *self {
            BwParams::Preset(BwPreset::Friston2003) => {
                let rho = 0.34;
                BwConstants {
                    k1: 7.0 * rho,
                    k2: 2.0,
                    k3: 2.0 * rho - 0.2,
                }
            }
            BwParams::Preset(BwPreset::Heinzle2016_3T) => BwConstants {
                k1: 3.72,
                k2: 0.527,
                k3: 0.53,
            },
            BwParams::Custom { k1, k2, k3 } => BwConstants { k1, k2, k3 },
        }
    }

    /// Backend constant updates that apply this parameter set
    pub fn const_updates(&self) -> Vec<ConstUpdate> {
        let c = self.constants();
        vec![
            ConstUpdate { key: "k1", value: c.k1 },
            ConstUpdate { key: "k2", value: c.k2 },
            ConstUpdate { key: "k3", value: c.k3 },
        ]
    }
}

impl fmt::Display for BwParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BwParams::Preset(BwPreset::Friston2003) => write!(f, "friston2003"),
            BwParams::Preset(BwPreset::Heinzle2016_3T) => write!(f, "heinzle2016-3T"),
            BwParams::Custom { k1, k2, k3 } => write!(f, "custom(k1={k1}, k2={k2}, k3={k3})"),
        }
    }
}

/// A backend constant assignment produced by a configuration change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstUpdate {
    pub key: &'static str,
    pub value: f64,
}

/// Neural mass model selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ModelKind {
    /// Reduced Wong-Wang with excitatory and inhibitory pools (feedback inhibition control)
    #[default]
    #[serde(rename = "rWW")]
    Rww,
    /// Reduced Wong-Wang, excitatory pool only
    #[serde(rename = "rWWEx")]
    RwwEx,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Rww => write!(f, "rWW"),
            ModelKind::RwwEx => write!(f, "rWWEx"),
        }
    }
}

impl std::str::FromStr for ModelKind {
    type Err = crate::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rWW" => Ok(ModelKind::Rww),
            "rWWEx" => Ok(ModelKind::RwwEx),
            other => Err(crate::ConfigError::InvalidValue(format!(
                "model.variant = {other} (expected rWW or rWWEx)"
            ))),
        }
    }
}

/// Model variant configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    pub variant: ModelKind,
    /// Analytical-numerical feedback inhibition control (rWW only)
    pub do_fic: bool,
    /// Maximum number of numerical FIC adjustment trials
    pub max_fic_trials: u32,
    /// Penalize deviation from the 3 Hz FIC target in scoring
    pub fic_penalty: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: ModelKind::Rww,
            do_fic: true,
            max_fic_trials: 5,
            fic_penalty: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_logging: bool,
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
            log_dir: PathBuf::from("./logs"),
            retention_days: 30,
            retention_runs: 10,
        }
    }
}
