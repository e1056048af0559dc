// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Synthetic backend
//!
//! Deterministic in-process backend that honors the call contract without
//! integrating any model. Every output value is a closed-form function of
//! its indices so demarshaling can be checked exactly. Calls and constant
//! updates are recorded for inspection.

use crate::{
    BackendCall, BackendConfigRecord, BackendError, OutputMode, RawBasicOutput, RawExtendedOutput,
    RawOutput, Result, RunDims, RunFlags, SimulationBackend,
};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use tracing::debug;

/// Snapshot of one `run_simulations` call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model_name: String,
    pub flags: RunFlags,
    pub dims: RunDims,
    pub config: BackendConfigRecord,
    pub global: Array2<f64>,
    pub regional: Array2<f64>,
    pub velocity: Array1<f64>,
}

/// Contract-conformant fake backend
#[derive(Debug, Default)]
pub struct SyntheticBackend {
    calls: Vec<RecordedCall>,
    consts: Vec<(String, f64)>,
    fc_override: Option<Vec<f64>>,
    fcd_override: Option<Vec<f64>>,
    state_override: BTreeMap<usize, f64>,
    extra_state_columns: usize,
    fail_next: Option<String>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this FC triangle for every simulation
    pub fn with_fc(mut self, fc_tril: Vec<f64>) -> Self {
        self.fc_override = Some(fc_tril);
        self
    }

    /// Return this FCD triangle for every simulation
    pub fn with_fcd(mut self, fcd_tril: Vec<f64>) -> Self {
        self.fcd_override = Some(fcd_tril);
        self
    }

    /// Fill state variable `index` with a constant
    pub fn with_state_value(mut self, index: usize, value: f64) -> Self {
        self.state_override.insert(index, value);
        self
    }

    /// Append `columns` stray values to every state row, breaking the layout
    pub fn with_extra_state_columns(mut self, columns: usize) -> Self {
        self.extra_state_columns = columns;
        self
    }

    /// Make the next call fail with an execution error
    pub fn fail_next_run(&mut self, message: &str) {
        self.fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    pub fn last_call(&self) -> Option<&RecordedCall> {
        self.calls.last()
    }

    pub fn consts(&self) -> &[(String, f64)] {
        &self.consts
    }

    /// BOLD value at (simulation, timepoint, node)
    pub fn bold_value(sim: usize, t: usize, node: usize) -> f64 {
        sim as f64 * 10_000.0 + t as f64 * 10.0 + node as f64
    }

    /// FC triangle value at (simulation, pair)
    pub fn fc_value(sim: usize, pair: usize, n_pairs: usize) -> f64 {
        (pair as f64 + 1.0) / n_pairs as f64 / (sim as f64 + 1.0)
    }

    /// FCD triangle value at (simulation, window pair)
    pub fn fcd_value(sim: usize, pair: usize) -> f64 {
        (pair % 17) as f64 / 17.0 + sim as f64 * 0.01
    }

    /// State value at (variable, simulation, timepoint, node); `t` is 0 for means
    pub fn state_value(var: usize, sim: usize, t: usize, node: usize) -> f64 {
        var as f64 * 100.0 + sim as f64 * 10.0 + node as f64 * 0.1 + t as f64 * 0.001
    }

    /// FIC-adjusted inhibitory coupling written back for (simulation, node)
    pub fn fic_value(sim: usize, node: usize) -> f64 {
        1.0 + sim as f64 * 0.1 + node as f64 * 0.01
    }

    /// Dynamic FC window pairs for `timepoints` volumes
    pub fn window_pairs(timepoints: usize, window_size: u32, window_step: u32) -> usize {
        let size = window_size as usize;
        let step = (window_step as usize).max(1);
        let windows = if timepoints >= size {
            (timepoints - size) / step + 1
        } else {
            1
        };
        windows * windows.saturating_sub(1) / 2
    }

    fn state_count(model_name: &str) -> Result<usize> {
        match model_name {
            "rWW" => Ok(6),
            "rWWEx" => Ok(3),
            other => Err(BackendError::UnknownModel(other.to_string())),
        }
    }

    fn check_call(call: &BackendCall<'_>) -> Result<()> {
        let RunDims { n_sims, nodes, .. } = call.dims;
        if call.sc_strength.len() != nodes * nodes || call.sc_distance.len() != nodes * nodes {
            return Err(BackendError::Contract(format!(
                "SC arrays must hold {} values, got {} and {}",
                nodes * nodes,
                call.sc_strength.len(),
                call.sc_distance.len()
            )));
        }
        if call.params.global.ncols() != n_sims {
            return Err(BackendError::Contract(format!(
                "global parameters have {} columns, expected {}",
                call.params.global.ncols(),
                n_sims
            )));
        }
        if call.params.regional.ncols() != n_sims * nodes {
            return Err(BackendError::Contract(format!(
                "regional parameters have {} columns, expected {}",
                call.params.regional.ncols(),
                n_sims * nodes
            )));
        }
        if call.params.velocity.len() != n_sims {
            return Err(BackendError::Contract(format!(
                "velocity has {} values, expected {}",
                call.params.velocity.len(),
                n_sims
            )));
        }
        Ok(())
    }
}

impl SimulationBackend for SyntheticBackend {
    fn backend_name(&self) -> &str {
        "synthetic"
    }

    fn set_const(&mut self, key: &str, value: f64) -> Result<()> {
        match key {
            "k1" | "k2" | "k3" => {
                self.consts.push((key.to_string(), value));
                Ok(())
            }
            other => Err(BackendError::UnknownConstant(other.to_string())),
        }
    }

    fn run_simulations(&mut self, call: BackendCall<'_>) -> Result<RawOutput> {
        if let Some(message) = self.fail_next.take() {
            return Err(BackendError::Execution(message));
        }
        Self::check_call(&call)?;
        let n_states = Self::state_count(call.model_name)?;

        let dims = call.dims;
        let RunDims { n_sims, nodes, .. } = dims;
        let timepoints = dims.timepoints();
        let n_pairs = dims.n_pairs();
        let n_window_pairs = Self::window_pairs(timepoints, dims.window_size, dims.window_step);
        debug!(n_sims, nodes, timepoints, force_reinit = call.flags.force_reinit, "Synthetic run");

        let do_fic = call.model_name == "rWW" && call.config.get("do_fic").map(String::as_str) == Some("1");
        if do_fic {
            for sim in 0..n_sims {
                for node in 0..nodes {
                    call.params.regional[[2, sim * nodes + node]] = Self::fic_value(sim, node);
                }
            }
        }

        self.calls.push(RecordedCall {
            model_name: call.model_name.to_string(),
            flags: call.flags,
            dims,
            config: call.config.clone(),
            global: call.params.global.clone(),
            regional: call.params.regional.clone(),
            velocity: call.params.velocity.clone(),
        });

        let mut bold = Vec::with_capacity(n_sims * timepoints * nodes);
        for sim in 0..n_sims {
            for t in 0..timepoints {
                for node in 0..nodes {
                    bold.push(Self::bold_value(sim, t, node));
                }
            }
        }

        let mut fc_trils = Vec::with_capacity(n_sims * n_pairs);
        let mut fcd_trils = Vec::with_capacity(n_sims * n_window_pairs);
        for sim in 0..n_sims {
            match &self.fc_override {
                Some(fc) => fc_trils.extend_from_slice(fc),
                None => fc_trils.extend((0..n_pairs).map(|p| Self::fc_value(sim, p, n_pairs))),
            }
            match &self.fcd_override {
                Some(fcd) => fcd_trils.extend_from_slice(fcd),
                None => fcd_trils.extend((0..n_window_pairs).map(|p| Self::fcd_value(sim, p))),
            }
        }

        let basic = RawBasicOutput {
            bold,
            fc_trils,
            fcd_trils,
        };

        match call.flags.output {
            OutputMode::Basic => Ok(RawOutput::Basic(basic)),
            OutputMode::Extended { timeseries } => {
                let steps = if timeseries { timepoints } else { 1 };
                let width = n_sims * steps * nodes + self.extra_state_columns;
                let states = Array2::from_shape_fn((n_states, width), |(var, idx)| {
                    if let Some(value) = self.state_override.get(&var) {
                        return *value;
                    }
                    let sim = idx / (steps * nodes);
                    let t = (idx / nodes) % steps;
                    let node = idx % nodes;
                    Self::state_value(var, sim, t, node)
                });
                let global_bools = Array2::from_elem((2, n_sims), false);
                let trials = if do_fic { 1 } else { 0 };
                let global_ints = Array2::from_elem((1, n_sims), trials);
                Ok(RawOutput::Extended(RawExtendedOutput {
                    basic,
                    states,
                    global_bools,
                    global_ints,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackedParameters;

    fn call_parts(n_sims: usize, nodes: usize) -> (Vec<f64>, PackedParameters, BackendConfigRecord, RunDims) {
        let params = PackedParameters {
            global: Array2::zeros((1, n_sims)),
            regional: Array2::zeros((3, n_sims * nodes)),
            velocity: Array1::zeros(n_sims),
        };
        let mut config = BackendConfigRecord::new();
        config.insert("do_fic".to_string(), "1".to_string());
        let dims = RunDims {
            n_sims,
            nodes,
            duration_msec: 20_000,
            tr_msec: 1_000,
            window_size: 4,
            window_step: 2,
            rand_seed: 1,
        };
        (vec![0.0; nodes * nodes], params, config, dims)
    }

    #[test]
    fn test_extended_output_shapes_and_fic_writeback() {
        let mut backend = SyntheticBackend::new();
        let (sc, mut params, config, dims) = call_parts(2, 3);
        let out = backend
            .run_simulations(BackendCall {
                model_name: "rWW",
                sc_strength: &sc,
                sc_distance: &sc,
                params: &mut params,
                config: &config,
                flags: RunFlags {
                    output: OutputMode::Extended { timeseries: false },
                    delay_enabled: false,
                    force_reinit: true,
                    use_cpu: true,
                },
                dims,
            })
            .unwrap();

        assert_eq!(out.arity(), 6);
        assert_eq!(out.basic().bold.len(), 2 * 20 * 3);
        assert_eq!(out.basic().fc_trils.len(), 2 * 3);
        assert_eq!(params.regional[[2, 4]], SyntheticBackend::fic_value(1, 1));
        match out {
            RawOutput::Extended(ext) => assert_eq!(ext.states.dim(), (6, 6)),
            RawOutput::Basic(_) => panic!("expected extended output"),
        }
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_contract_violation_rejected() {
        let mut backend = SyntheticBackend::new();
        let (sc, mut params, config, mut dims) = call_parts(2, 3);
        dims.n_sims = 3;
        let err = backend
            .run_simulations(BackendCall {
                model_name: "rWW",
                sc_strength: &sc,
                sc_distance: &sc,
                params: &mut params,
                config: &config,
                flags: RunFlags {
                    output: OutputMode::Basic,
                    delay_enabled: false,
                    force_reinit: false,
                    use_cpu: true,
                },
                dims,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::Contract(_)));
    }

    #[test]
    fn test_window_pairs() {
        assert_eq!(SyntheticBackend::window_pairs(20, 4, 2), 9 * 8 / 2);
        assert_eq!(SyntheticBackend::window_pairs(3, 4, 2), 0);
    }
}
