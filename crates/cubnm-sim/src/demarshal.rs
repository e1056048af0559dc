// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Output demarshaler
//!
//! Reshapes flat backend buffers into per-simulation arrays:
//! - BOLD: `(N, timepoints, nodes)`
//! - FC / FCD lower triangles: `(N, n_pairs)` / `(N, n_window_pairs)`
//! - states: one named array per variable, `(N, nodes)` time means or
//!   `(N, timepoints, nodes)` traces
//! - FIC diagnostics: `unstable`, `failed` and `ntrials`, each `(N,)`

use crate::model::{ModelVariant, FIC_COUPLING};
use crate::params::ParameterStore;
use crate::{Result, SimError};
use cubnm_backend::{OutputMode, PackedParameters, RawBasicOutput, RawExtendedOutput, RawOutput};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

/// BOLD, FC and FCD of every simulation
#[derive(Debug, Clone, PartialEq)]
pub struct BasicOutput {
    pub bold: Array3<f64>,
    pub fc_trils: Array2<f64>,
    pub fcd_trils: Array2<f64>,
}

impl BasicOutput {
    pub fn n_sims(&self) -> usize {
        self.bold.len_of(Axis(0))
    }
}

/// One state variable of every simulation
#[derive(Debug, Clone, PartialEq)]
pub enum StateArray {
    /// `(N, nodes)` time averages
    Mean(Array2<f64>),
    /// `(N, timepoints, nodes)` traces sampled every TR
    Timeseries(Array3<f64>),
}

impl StateArray {
    /// `(N, nodes)` time average
    pub fn time_mean(&self) -> Array2<f64> {
        match self {
            StateArray::Mean(mean) => mean.clone(),
            StateArray::Timeseries(ts) => ts
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array2::from_elem((ts.len_of(Axis(0)), ts.len_of(Axis(2))), f64::NAN)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            StateArray::Mean(mean) => mean.shape(),
            StateArray::Timeseries(ts) => ts.shape(),
        }
    }
}

/// Named state variables in backend order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateVariables {
    entries: Vec<(&'static str, StateArray)>,
}

impl StateVariables {
    pub fn get(&self, name: &str) -> Option<&StateArray> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, state)| state)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &StateArray)> {
        self.entries.iter().map(|(name, state)| (*name, state))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-simulation feedback inhibition control diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct FicDiagnostics {
    pub unstable: Array1<bool>,
    pub failed: Array1<bool>,
    pub ntrials: Array1<i64>,
}

/// Basic output plus states and diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedOutput {
    pub basic: BasicOutput,
    pub states: StateVariables,
    pub fic: Option<FicDiagnostics>,
}

/// Output of one run
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationOutput {
    Basic(BasicOutput),
    Extended(ExtendedOutput),
}

impl SimulationOutput {
    pub fn basic(&self) -> &BasicOutput {
        match self {
            SimulationOutput::Basic(basic) => basic,
            SimulationOutput::Extended(extended) => &extended.basic,
        }
    }

    pub fn states(&self) -> Option<&StateVariables> {
        match self {
            SimulationOutput::Basic(_) => None,
            SimulationOutput::Extended(extended) => Some(&extended.states),
        }
    }

    pub fn fic(&self) -> Option<&FicDiagnostics> {
        match self {
            SimulationOutput::Basic(_) => None,
            SimulationOutput::Extended(extended) => extended.fic.as_ref(),
        }
    }
}

/// Layout of the batch the output belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputShape {
    pub n_sims: usize,
    pub nodes: usize,
    /// Output mode requested from the backend
    pub mode: OutputMode,
}

/// Reshape raw buffers into structured output.
///
/// The requested mode selects the layout; buffers that disagree with it
/// are rejected.
pub fn demarshal(raw: RawOutput, variant: &ModelVariant, shape: OutputShape) -> Result<SimulationOutput> {
    match (raw, shape.mode) {
        (RawOutput::Basic(basic), OutputMode::Basic) => Ok(SimulationOutput::Basic(reshape_basic(basic, shape)?)),
        (RawOutput::Extended(extended), OutputMode::Extended { .. }) => {
            Ok(SimulationOutput::Extended(reshape_extended(extended, variant, shape)?))
        }
        (raw, OutputMode::Basic) => Err(layout_error("output", 3, raw.arity())),
        (raw, OutputMode::Extended { .. }) => Err(layout_error("output", 6, raw.arity())),
    }
}

fn layout_error(buffer: &'static str, expected: usize, found: usize) -> SimError {
    SimError::OutputLayout {
        buffer,
        expected,
        found,
    }
}

/// Row length per simulation for a buffer of `len` values
fn per_sim(buffer: &'static str, len: usize, n_sims: usize, unit: usize) -> Result<usize> {
    let block = n_sims * unit;
    if block == 0 || len % block != 0 {
        return Err(layout_error(buffer, block, len));
    }
    Ok(len / block)
}

fn reshape_basic(raw: RawBasicOutput, shape: OutputShape) -> Result<BasicOutput> {
    let OutputShape { n_sims, nodes, .. } = shape;
    let bold_len = raw.bold.len();
    let timepoints = per_sim("bold", bold_len, n_sims, nodes)?;
    let bold = Array3::from_shape_vec((n_sims, timepoints, nodes), raw.bold)
        .map_err(|_| layout_error("bold", n_sims * timepoints * nodes, bold_len))?;

    let n_pairs = nodes * nodes.saturating_sub(1) / 2;
    let fc_len = raw.fc_trils.len();
    if fc_len != n_sims * n_pairs {
        return Err(layout_error("fc_trils", n_sims * n_pairs, fc_len));
    }
    let fc_trils = Array2::from_shape_vec((n_sims, n_pairs), raw.fc_trils)
        .map_err(|_| layout_error("fc_trils", n_sims * n_pairs, fc_len))?;

    let fcd_len = raw.fcd_trils.len();
    let n_window_pairs = if fcd_len == 0 { 0 } else { per_sim("fcd_trils", fcd_len, n_sims, 1)? };
    let fcd_trils = Array2::from_shape_vec((n_sims, n_window_pairs), raw.fcd_trils)
        .map_err(|_| layout_error("fcd_trils", n_sims * n_window_pairs, fcd_len))?;

    Ok(BasicOutput {
        bold,
        fc_trils,
        fcd_trils,
    })
}

fn reshape_extended(raw: RawExtendedOutput, variant: &ModelVariant, shape: OutputShape) -> Result<ExtendedOutput> {
    let basic = reshape_basic(raw.basic, shape)?;
    let states = reshape_states(raw.states.view(), variant, shape)?;
    let fic = if variant.fic_enabled() {
        Some(extract_fic(&raw.global_bools, &raw.global_ints, shape.n_sims)?)
    } else {
        None
    };
    Ok(ExtendedOutput { basic, states, fic })
}

/// Slice stacked `(n_states, N * nodes[* timepoints])` states into named arrays
pub fn reshape_states(stacked: ArrayView2<'_, f64>, variant: &ModelVariant, shape: OutputShape) -> Result<StateVariables> {
    let OutputShape { n_sims, nodes, mode } = shape;
    let names = variant.state_names();
    if stacked.nrows() != names.len() {
        return Err(layout_error("states", names.len(), stacked.nrows()));
    }
    let timeseries = mode.is_timeseries();
    let steps = per_sim("states", stacked.ncols(), n_sims, nodes)?;
    if !timeseries && steps != 1 {
        return Err(layout_error("states", n_sims * nodes, stacked.ncols()));
    }

    let mut entries = Vec::with_capacity(names.len());
    for (&name, row) in names.iter().zip(stacked.rows()) {
        let values = row.to_vec();
        let state = if timeseries {
            StateArray::Timeseries(
                Array3::from_shape_vec((n_sims, steps, nodes), values)
                    .map_err(|_| layout_error("states", n_sims * steps * nodes, row.len()))?,
            )
        } else {
            StateArray::Mean(
                Array2::from_shape_vec((n_sims, nodes), values)
                    .map_err(|_| layout_error("states", n_sims * nodes, row.len()))?,
            )
        };
        entries.push((name, state));
    }
    Ok(StateVariables { entries })
}

fn extract_fic(bools: &Array2<bool>, ints: &Array2<i64>, n_sims: usize) -> Result<FicDiagnostics> {
    if bools.nrows() < 2 || bools.ncols() != n_sims {
        return Err(layout_error("global_bools", 2 * n_sims, bools.len()));
    }
    if ints.nrows() < 1 || ints.ncols() != n_sims {
        return Err(layout_error("global_ints", n_sims, ints.len()));
    }
    Ok(FicDiagnostics {
        unstable: bools.row(0).to_owned(),
        failed: bools.row(1).to_owned(),
        ntrials: ints.row(0).to_owned(),
    })
}

/// Copy backend-finalized inhibitory coupling back into the store
pub fn write_back_fic(store: &mut ParameterStore, packed: &PackedParameters) -> Result<()> {
    let Some(row) = store.variant().fic_writeback_row() else {
        return Ok(());
    };
    if row >= packed.regional.nrows() {
        return Err(layout_error("regional parameters", row + 1, packed.regional.nrows()));
    }
    store.write_back_regional(FIC_COUPLING, packed.regional.row(row))
}
