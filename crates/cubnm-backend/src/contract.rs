// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Backend call contract
//!
//! Inputs and outputs of the single blocking `run_simulations` call.
//!
//! Parameter layout:
//! - global parameters: `(P_g, N)`, one row per declared global parameter
//! - regional parameters: `(P_r, N * nodes)`, rows flattened simulation-major
//! - velocity: `(N,)`
//!
//! Output layout (all row-major, simulation-major):
//! - BOLD: `N * timepoints * nodes`
//! - FC / FCD lower triangles: `N * n_pairs` / `N * n_window_pairs`
//! - state variables: `(n_states, N * nodes)` or `(n_states, N * timepoints * nodes)`
//! - diagnostics: boolean rows `(n_bools, N)`, integer rows `(n_ints, N)`

use crate::Result;
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;

/// String-keyed configuration record passed to the backend
pub type BackendConfigRecord = BTreeMap<String, String>;

/// Which outputs the backend must produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// BOLD, FC and FCD only
    Basic,
    /// Additionally state variables and diagnostics; `timeseries` returns
    /// per-TR state traces instead of time means
    Extended { timeseries: bool },
}

impl OutputMode {
    pub fn from_flags(extended_output: bool, extended_output_ts: bool) -> Self {
        if extended_output {
            OutputMode::Extended {
                timeseries: extended_output_ts,
            }
        } else {
            OutputMode::Basic
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, OutputMode::Extended { .. })
    }

    pub fn is_timeseries(&self) -> bool {
        matches!(self, OutputMode::Extended { timeseries: true })
    }
}

/// Execution switches of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    pub output: OutputMode,
    pub delay_enabled: bool,
    /// Re-establish buffers, connectome upload and noise before running
    pub force_reinit: bool,
    pub use_cpu: bool,
}

/// Dimensions and timing of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDims {
    /// Number of simulations
    pub n_sims: usize,
    pub nodes: usize,
    pub duration_msec: u32,
    pub tr_msec: u32,
    pub window_size: u32,
    pub window_step: u32,
    pub rand_seed: u64,
}

impl RunDims {
    /// BOLD volumes per simulation
    pub fn timepoints(&self) -> usize {
        if self.tr_msec == 0 {
            return 0;
        }
        (self.duration_msec / self.tr_msec) as usize
    }

    pub fn n_pairs(&self) -> usize {
        self.nodes * self.nodes.saturating_sub(1) / 2
    }
}

/// Dense parameter arrays in backend order.
///
/// The backend may overwrite regional rows in place (FIC-adjusted values).
#[derive(Debug, Clone, PartialEq)]
pub struct PackedParameters {
    pub global: Array2<f64>,
    pub regional: Array2<f64>,
    pub velocity: Array1<f64>,
}

/// Everything the backend receives for one batch
#[derive(Debug)]
pub struct BackendCall<'a> {
    pub model_name: &'a str,
    pub sc_strength: &'a [f64],
    pub sc_distance: &'a [f64],
    pub params: &'a mut PackedParameters,
    pub config: &'a BackendConfigRecord,
    pub flags: RunFlags,
    pub dims: RunDims,
}

/// BOLD, FC and FCD buffers
#[derive(Debug, Clone, PartialEq)]
pub struct RawBasicOutput {
    pub bold: Vec<f64>,
    pub fc_trils: Vec<f64>,
    pub fcd_trils: Vec<f64>,
}

/// Basic buffers plus stacked states and diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtendedOutput {
    pub basic: RawBasicOutput,
    pub states: Array2<f64>,
    pub global_bools: Array2<bool>,
    pub global_ints: Array2<i64>,
}

/// Flat output buffers of one call
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Basic(RawBasicOutput),
    Extended(RawExtendedOutput),
}

impl RawOutput {
    /// Number of buffers (3 basic, 6 extended)
    pub fn arity(&self) -> usize {
        match self {
            RawOutput::Basic(_) => 3,
            RawOutput::Extended(_) => 6,
        }
    }

    pub fn basic(&self) -> &RawBasicOutput {
        match self {
            RawOutput::Basic(basic) => basic,
            RawOutput::Extended(extended) => &extended.basic,
        }
    }
}

/// A native compute backend.
///
/// Backend-persistent state (device/host buffers, uploaded connectome, noise
/// cache) belongs to the implementation and is re-established when
/// [`RunFlags::force_reinit`] is set. Calls are blocking and must not be
/// interleaved from several threads.
pub trait SimulationBackend {
    /// Backend name for logging/debugging
    fn backend_name(&self) -> &str;

    /// Set a model constant (e.g. Balloon-Windkessel `k1`)
    fn set_const(&mut self, key: &str, value: f64) -> Result<()>;

    /// Run the whole batch, returning after every simulation completed
    fn run_simulations(&mut self, call: BackendCall<'_>) -> Result<RawOutput>;
}

impl<B: SimulationBackend + ?Sized> SimulationBackend for Box<B> {
    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }

    fn set_const(&mut self, key: &str, value: f64) -> Result<()> {
        (**self).set_const(key, value)
    }

    fn run_simulations(&mut self, call: BackendCall<'_>) -> Result<RawOutput> {
        (**self).run_simulations(call)
    }
}

impl<B: SimulationBackend + ?Sized> SimulationBackend for &mut B {
    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }

    fn set_const(&mut self, key: &str, value: f64) -> Result<()> {
        (**self).set_const(key, value)
    }

    fn run_simulations(&mut self, call: BackendCall<'_>) -> Result<RawOutput> {
        (**self).run_simulations(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_mode_from_flags() {
        assert_eq!(OutputMode::from_flags(false, true), OutputMode::Basic);
        assert_eq!(
            OutputMode::from_flags(true, true),
            OutputMode::Extended { timeseries: true }
        );
        assert!(OutputMode::from_flags(true, false).is_extended());
        assert!(!OutputMode::from_flags(true, false).is_timeseries());
    }

    #[test]
    fn test_run_dims() {
        let dims = RunDims {
            n_sims: 2,
            nodes: 4,
            duration_msec: 60_000,
            tr_msec: 1_000,
            window_size: 10,
            window_step: 2,
            rand_seed: 410,
        };
        assert_eq!(dims.timepoints(), 60);
        assert_eq!(dims.n_pairs(), 6);
    }
}
