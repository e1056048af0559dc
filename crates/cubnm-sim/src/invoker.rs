// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Backend invoker
//!
//! Packs the parameter store into backend order, builds the string-keyed
//! configuration record and issues the blocking call.

use crate::model::{ModelVariant, VELOCITY};
use crate::params::ParameterStore;
use crate::{Result, SimError};
use cubnm_backend::{BackendCall, BackendConfigRecord, OutputMode, PackedParameters, RawOutput, SimulationBackend};
use cubnm_config::BatchConfig;
use ndarray::{Array1, Array2};
use std::time::Instant;
use tracing::{debug, info};

/// Pack parameters into `(P_g, N)`, `(P_r, N * nodes)` and `(N,)` arrays.
///
/// Row order follows the variant's declaration order, independent of the
/// order parameters were set in.
pub fn pack_parameters(store: &ParameterStore) -> Result<PackedParameters> {
    store.validate_complete()?;
    let n_sims = store.n_sims();
    let nodes = store.nodes();
    let variant = store.variant();
    let missing = |name: &str| SimError::MissingParameter {
        name: name.to_string(),
        n_sims,
    };

    let globals = variant.global_param_names();
    let mut global = Array2::zeros((globals.len(), n_sims));
    for (row, &name) in globals.iter().enumerate() {
        let values = store.vector(name).ok_or_else(|| missing(name))?;
        global.row_mut(row).assign(values);
    }

    let regionals = variant.regional_param_names();
    let mut regional = Array2::zeros((regionals.len(), n_sims * nodes));
    for (row, &name) in regionals.iter().enumerate() {
        let values = store.matrix(name).ok_or_else(|| missing(name))?;
        for (dst, src) in regional.row_mut(row).iter_mut().zip(values.iter()) {
            *dst = *src;
        }
    }

    let velocity: Array1<f64> = store.velocity().cloned().ok_or_else(|| missing(VELOCITY))?;

    Ok(PackedParameters {
        global,
        regional,
        velocity,
    })
}

/// String-keyed backend configuration record
pub fn build_config_record(config: &BatchConfig, variant: &ModelVariant, sync_msec: bool) -> BackendConfigRecord {
    let flag = |value: bool| (value as u8).to_string();
    let mut record = BackendConfigRecord::new();
    record.insert("exc_interhemispheric".to_string(), flag(config.exc_interhemispheric));
    record.insert("sync_msec".to_string(), flag(sync_msec));
    record.insert("bold_remove_s".to_string(), config.bold_remove_s.to_string());
    record.insert("drop_edges".to_string(), flag(config.fcd_drop_edges));
    record.insert("noise_time_steps".to_string(), config.noise_time_steps().to_string());
    record.insert("verbose".to_string(), flag(config.sim_verbose));
    record.insert("progress_interval".to_string(), config.progress_interval.to_string());
    record.insert("serial".to_string(), flag(config.serial_nodes));
    for (key, value) in variant.backend_flags() {
        record.insert(key.to_string(), value);
    }
    record
}

/// Issue the blocking backend call and check the output arity
pub fn invoke<B: SimulationBackend + ?Sized>(backend: &mut B, call: BackendCall<'_>) -> Result<RawOutput> {
    let output_mode = call.flags.output;
    let dims = call.dims;
    info!(
        backend = backend.backend_name(),
        model = call.model_name,
        n_sims = dims.n_sims,
        nodes = dims.nodes,
        force_reinit = call.flags.force_reinit,
        use_cpu = call.flags.use_cpu,
        "Running simulations"
    );

    let started = Instant::now();
    let raw = backend.run_simulations(call)?;
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Backend call completed");

    let expected = match output_mode {
        OutputMode::Basic => 3,
        OutputMode::Extended { .. } => 6,
    };
    if raw.arity() != expected {
        return Err(SimError::OutputLayout {
            buffer: "output tuple",
            expected,
            found: raw.arity(),
        });
    }
    Ok(raw)
}
