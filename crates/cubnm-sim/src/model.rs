// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Model variants
//!
//! Each variant declares its parameter schema, default-parameter policy,
//! state-variable naming and variant-specific backend flags and score terms.
//!
//! | Variant | Backend name | Global | Regional | States |
//! |---------|--------------|--------|----------|--------|
//! | [`ModelVariant::Fic`] | `rWW` | `G` | `wEE`, `wEI`, `wIE` | `I_E`, `I_I`, `r_E`, `r_I`, `S_E`, `S_I` |
//! | [`ModelVariant::ExcitatoryOnly`] | `rWWEx` | `G` | `w`, `I0`, `sigma` | `x`, `r`, `S` |

use cubnm_config::{ModelConfig, ModelKind};
use tracing::warn;

/// Name of the conduction velocity parameter
pub const VELOCITY: &str = "v";

/// Velocity used by the default-parameter policy when delay is enabled
pub const DEFAULT_VELOCITY: f64 = 0.5;

const FIC_GLOBALS: &[&str] = &["G"];
const FIC_REGIONALS: &[&str] = &["wEE", "wEI", "wIE"];
const FIC_STATES: &[&str] = &["I_E", "I_I", "r_E", "r_I", "S_E", "S_I"];

const EX_GLOBALS: &[&str] = &["G"];
const EX_REGIONALS: &[&str] = &["w", "I0", "sigma"];
const EX_STATES: &[&str] = &["x", "r", "S"];

/// Inhibitory coupling finalized by the backend under FIC
pub const FIC_COUPLING: &str = "wIE";

/// Excitatory firing rate state used by the FIC penalty
pub const FIC_RATE_STATE: &str = "r_E";

/// How a parameter is laid out per batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// One value per simulation, shape `(N,)`
    Global,
    /// One value per region per simulation, shape `(N, nodes)`
    Regional,
    /// Conduction velocity, shape `(N,)`
    Velocity,
}

/// Feedback inhibition control options of the excitatory/inhibitory variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FicOptions {
    pub do_fic: bool,
    pub max_fic_trials: u32,
    pub fic_penalty: bool,
}

/// Active neural mass model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    /// Reduced Wong-Wang with excitatory and inhibitory pools
    Fic(FicOptions),
    /// Reduced Wong-Wang with an excitatory pool only
    ExcitatoryOnly,
}

impl ModelVariant {
    /// Select the variant from configuration.
    ///
    /// Numerical FIC adjustment is unsupported in serial-node mode, so the
    /// trial cap is forced to 0 there.
    pub fn from_config(model: &ModelConfig, serial_nodes: bool) -> Self {
        match model.variant {
            ModelKind::Rww => {
                let mut max_fic_trials = model.max_fic_trials;
                if serial_nodes && max_fic_trials > 0 {
                    warn!(
                        requested = max_fic_trials,
                        "Numerical FIC is not supported in serial_nodes mode. Setting max_fic_trials to 0."
                    );
                    max_fic_trials = 0;
                }
                ModelVariant::Fic(FicOptions {
                    do_fic: model.do_fic,
                    max_fic_trials,
                    fic_penalty: model.fic_penalty,
                })
            }
            ModelKind::RwwEx => ModelVariant::ExcitatoryOnly,
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelVariant::Fic(_) => ModelKind::Rww,
            ModelVariant::ExcitatoryOnly => ModelKind::RwwEx,
        }
    }

    /// Model identifier understood by the backend
    pub fn backend_name(&self) -> &'static str {
        match self {
            ModelVariant::Fic(_) => "rWW",
            ModelVariant::ExcitatoryOnly => "rWWEx",
        }
    }

    pub fn global_param_names(&self) -> &'static [&'static str] {
        match self {
            ModelVariant::Fic(_) => FIC_GLOBALS,
            ModelVariant::ExcitatoryOnly => EX_GLOBALS,
        }
    }

    pub fn regional_param_names(&self) -> &'static [&'static str] {
        match self {
            ModelVariant::Fic(_) => FIC_REGIONALS,
            ModelVariant::ExcitatoryOnly => EX_REGIONALS,
        }
    }

    /// State variables in backend row order
    pub fn state_names(&self) -> &'static [&'static str] {
        match self {
            ModelVariant::Fic(_) => FIC_STATES,
            ModelVariant::ExcitatoryOnly => EX_STATES,
        }
    }

    /// All declared parameters: globals, regionals, then velocity
    pub fn param_names(&self) -> Vec<&'static str> {
        self.global_param_names()
            .iter()
            .chain(self.regional_param_names())
            .copied()
            .chain(std::iter::once(VELOCITY))
            .collect()
    }

    pub fn param_kind(&self, name: &str) -> Option<ParamKind> {
        if name == VELOCITY {
            Some(ParamKind::Velocity)
        } else if self.global_param_names().contains(&name) {
            Some(ParamKind::Global)
        } else if self.regional_param_names().contains(&name) {
            Some(ParamKind::Regional)
        } else {
            None
        }
    }

    /// Literature defaults for smoke runs. Velocity is handled by the store.
    ///
    /// Under FIC the inhibitory coupling is left to the backend.
    pub fn default_values(&self) -> Vec<(&'static str, f64)> {
        match self {
            ModelVariant::Fic(fic) => {
                let mut values = vec![("G", 0.5), ("wEE", 0.21), ("wEI", 0.15)];
                if !fic.do_fic {
                    values.push((FIC_COUPLING, 1.0));
                }
                values
            }
            ModelVariant::ExcitatoryOnly => vec![("G", 0.5), ("w", 0.9), ("I0", 0.3), ("sigma", 0.001)],
        }
    }

    /// Parameters zero-filled whenever the batch size changes
    pub fn placeholders(&self) -> &'static [&'static str] {
        match self {
            ModelVariant::Fic(fic) if fic.do_fic => &[FIC_COUPLING],
            _ => &[],
        }
    }

    pub fn fic(&self) -> Option<&FicOptions> {
        match self {
            ModelVariant::Fic(fic) => Some(fic),
            ModelVariant::ExcitatoryOnly => None,
        }
    }

    pub fn fic_enabled(&self) -> bool {
        self.fic().is_some_and(|fic| fic.do_fic)
    }

    /// FIC requires state variables and diagnostics from the backend
    pub fn forces_extended_output(&self) -> bool {
        self.fic_enabled()
    }

    /// Whether scoring adds `-fic_penalty`
    pub fn computes_fic_penalty(&self) -> bool {
        self.fic().is_some_and(|fic| fic.do_fic && fic.fic_penalty)
    }

    /// Regional row the backend overwrites with finalized values
    pub fn fic_writeback_row(&self) -> Option<usize> {
        if self.fic_enabled() {
            self.regional_param_names().iter().position(|&name| name == FIC_COUPLING)
        } else {
            None
        }
    }

    /// Variant entries of the backend configuration record
    pub fn backend_flags(&self) -> Vec<(&'static str, String)> {
        match self {
            ModelVariant::Fic(fic) => vec![
                ("do_fic", (fic.do_fic as u8).to_string()),
                ("max_fic_trials", fic.max_fic_trials.to_string()),
            ],
            ModelVariant::ExcitatoryOnly => Vec::new(),
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.backend_name())
    }
}
