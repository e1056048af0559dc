// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Simulation batch
//!
//! Owns the connectome, configuration, parameter store, config cache and
//! the current output of one batch and drives the backend:
//!
//! ```text
//! set_batch_size -> set_parameter* -> run -> output / score / save
//! ```
//!
//! Runs must not be interleaved: every operation takes `&mut self`.

use crate::demarshal::{demarshal, write_back_fic, OutputShape, SimulationOutput};
use crate::invoker::{build_config_record, invoke, pack_parameters};
use crate::model::{ModelVariant, FIC_RATE_STATE};
use crate::params::ParameterStore;
use crate::persistence::{archive_file_name, save_archive, unix_timestamp, ArchiveMetadata, RunArchive, SaveFormat};
use crate::reinit::{ConfigCache, ReinitDecision, ReinitSnapshot};
use crate::scoring::{score_batch, FicPenaltyInput, GofTerm, ScoreInputs, ScoreTable};
use crate::{Result, SimError};
use cubnm_backend::{
    plan_node_sync, resolve_target, warn_serial_mode, BackendCall, BackendCapabilities, ExecutionTarget, OutputMode,
    RunDims, RunFlags, SimulationBackend,
};
use cubnm_config::{BatchConfig, BwParams, ModelConfig, OutDir};
use cubnm_connectome::StructuralConnectome;
use ndarray::{ArrayD, ArrayView1};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Serializable summary of a batch configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub duration: f64,
    #[serde(rename = "TR")]
    pub tr: f64,
    pub sc_path: PathBuf,
    pub sc_dist_path: Option<PathBuf>,
    pub extended_output: bool,
    pub extended_output_ts: bool,
    pub window_size: u32,
    pub window_step: u32,
    pub rand_seed: u64,
    pub exc_interhemispheric: bool,
    pub force_cpu: bool,
    pub bw_params: String,
    pub bold_remove_s: f64,
    pub fcd_drop_edges: bool,
    pub noise_segment_length: Option<f64>,
    pub out_dir: OutDir,
    pub gof_terms: Vec<String>,
    #[serde(rename = "N", skip_serializing_if = "Option::is_none")]
    pub n_sims: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_fic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fic_trials: Option<u32>,
}

/// A batch of simulations sharing connectome and configuration
pub struct SimulationBatch<B: SimulationBackend> {
    config: BatchConfig,
    model: ModelConfig,
    variant: ModelVariant,
    capabilities: BackendCapabilities,
    backend: B,
    connectome: StructuralConnectome,
    params: ParameterStore,
    gof_terms: Vec<GofTerm>,
    cache: ConfigCache,
    target: ExecutionTarget,
    sync_msec: bool,
    output: Option<SimulationOutput>,
    iteration: u64,
}

impl<B: SimulationBackend> SimulationBatch<B> {
    /// Load the connectome from `config.sc_path` (and `sc_dist_path`) and
    /// build the batch
    pub fn new(
        config: BatchConfig,
        model: &ModelConfig,
        capabilities: BackendCapabilities,
        backend: B,
    ) -> Result<Self> {
        let connectome = StructuralConnectome::load(&config.sc_path, config.sc_dist_path.as_ref())?;
        Self::from_connectome(config, model, connectome, capabilities, backend)
    }

    /// Build the batch around an already loaded connectome.
    ///
    /// # Errors
    ///
    /// Unknown goodness-of-fit terms, node counts beyond the GPU capacity
    /// class, and rejected backend constants.
    pub fn from_connectome(
        mut config: BatchConfig,
        model: &ModelConfig,
        connectome: StructuralConnectome,
        capabilities: BackendCapabilities,
        mut backend: B,
    ) -> Result<Self> {
        let variant = ModelVariant::from_config(model, config.serial_nodes);
        if variant.forces_extended_output() && !config.extended_output {
            debug!("FIC requires extended output, enabling it");
            config.extended_output = true;
        }
        let gof_terms = GofTerm::parse_list(config.gof_terms.as_slice())?;

        let decision = resolve_target(config.force_cpu, &capabilities);
        info!(target_device = %decision.target, reason = %decision.reason, "Execution target");
        let nodes = connectome.nodes();
        let delay_enabled = connectome.has_delay();
        let sync_msec = plan_node_sync(nodes, delay_enabled, decision.target, &capabilities)?;
        warn_serial_mode(config.serial_nodes, decision.target);

        for update in config.bw_params.const_updates() {
            backend.set_const(update.key, update.value)?;
        }

        info!(
            model = %variant,
            nodes,
            delay = delay_enabled,
            backend = backend.backend_name(),
            "Simulation batch created"
        );

        Ok(Self {
            params: ParameterStore::new(variant, nodes, delay_enabled),
            config,
            model: model.clone(),
            variant,
            capabilities,
            backend,
            connectome,
            gof_terms,
            cache: ConfigCache::new(),
            target: decision.target,
            sync_msec,
            output: None,
            iteration: 0,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model
    }

    pub fn variant(&self) -> &ModelVariant {
        &self.variant
    }

    pub fn connectome(&self) -> &StructuralConnectome {
        &self.connectome
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn nodes(&self) -> usize {
        self.connectome.nodes()
    }

    pub fn n_sims(&self) -> usize {
        self.params.n_sims()
    }

    pub fn target(&self) -> ExecutionTarget {
        self.target
    }

    pub fn sync_msec(&self) -> bool {
        self.sync_msec
    }

    /// Number of successful runs
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn delay_enabled(&self) -> bool {
        self.connectome.has_delay()
    }

    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_flags(self.config.extended_output, self.config.extended_output_ts)
    }

    /// Size the batch for `n_sims` simulations, dropping every parameter
    pub fn set_batch_size(&mut self, n_sims: usize) -> Result<()> {
        if n_sims == 0 {
            return Err(SimError::EmptyBatch);
        }
        self.params.reset(n_sims);
        Ok(())
    }

    /// Replace one parameter array; see [`ParameterStore::set_parameter`]
    pub fn set_parameter(&mut self, name: &str, values: ArrayD<f64>) -> Result<()> {
        if self.params.n_sims() == 0 {
            return Err(SimError::EmptyBatch);
        }
        self.params.set_parameter(name, values)
    }

    /// Populate every parameter with literature defaults (smoke runs only)
    pub fn apply_default_parameters(&mut self) -> Result<()> {
        if self.params.n_sims() == 0 {
            return Err(SimError::EmptyBatch);
        }
        self.params.apply_defaults()
    }

    /// Switch the hemodynamic parameter set, issuing the backend constant updates
    pub fn set_bw_params(&mut self, bw_params: BwParams) -> Result<()> {
        let (config, updates) = self.config.clone().with_bw_params(bw_params);
        for update in &updates {
            self.backend.set_const(update.key, update.value)?;
        }
        debug!(bw_params = %bw_params, "Hemodynamic parameters updated");
        self.config = config;
        Ok(())
    }

    /// Replace the batch configuration.
    ///
    /// A changed connectome path reloads the connectome and resets the
    /// parameter store. Reinit-relevant changes make the next run dirty.
    pub fn reconfigure(&mut self, mut config: BatchConfig) -> Result<()> {
        let gof_terms = GofTerm::parse_list(config.gof_terms.as_slice())?;
        let variant = ModelVariant::from_config(&self.model, config.serial_nodes);
        if variant.forces_extended_output() {
            config.extended_output = true;
        }

        let sc_changed = config.sc_path != self.config.sc_path || config.sc_dist_path != self.config.sc_dist_path;
        let connectome = if sc_changed {
            Some(StructuralConnectome::load(&config.sc_path, config.sc_dist_path.as_ref())?)
        } else {
            None
        };
        let nodes = connectome.as_ref().map_or(self.nodes(), |c| c.nodes());
        let delay_enabled = connectome.as_ref().map_or(self.delay_enabled(), |c| c.has_delay());

        let decision = resolve_target(config.force_cpu, &self.capabilities);
        let sync_msec = plan_node_sync(nodes, delay_enabled, decision.target, &self.capabilities)?;
        warn_serial_mode(config.serial_nodes, decision.target);

        if config.bw_params != self.config.bw_params {
            for update in config.bw_params.const_updates() {
                self.backend.set_const(update.key, update.value)?;
            }
        }

        if let Some(connectome) = connectome {
            let n_sims = self.params.n_sims();
            self.connectome = connectome;
            self.params = ParameterStore::new(variant, nodes, delay_enabled);
            if n_sims > 0 {
                self.params.reset(n_sims);
            }
            self.output = None;
        }
        self.set_variant(variant);
        self.config = config;
        self.gof_terms = gof_terms;
        self.target = decision.target;
        self.sync_msec = sync_msec;
        Ok(())
    }

    /// Replace the model options.
    ///
    /// Switching between model kinds drops every parameter. Toggling FIC
    /// swaps the inhibitory coupling placeholder. FIC option changes make
    /// the next run dirty.
    pub fn set_model_config(&mut self, model: ModelConfig) -> Result<()> {
        let variant = ModelVariant::from_config(&model, self.config.serial_nodes);
        if variant.forces_extended_output() && !self.config.extended_output {
            debug!("FIC requires extended output, enabling it");
            self.config.extended_output = true;
        }
        self.set_variant(variant);
        self.model = model;
        Ok(())
    }

    /// Replace the backend capability descriptor, re-resolving the
    /// execution target and node sync
    pub fn set_capabilities(&mut self, capabilities: BackendCapabilities) -> Result<()> {
        let decision = resolve_target(self.config.force_cpu, &capabilities);
        let sync_msec = plan_node_sync(self.nodes(), self.delay_enabled(), decision.target, &capabilities)?;
        if decision.target != self.target {
            info!(target_device = %decision.target, reason = %decision.reason, "Execution target changed");
        }
        self.capabilities = capabilities;
        self.target = decision.target;
        self.sync_msec = sync_msec;
        Ok(())
    }

    fn set_variant(&mut self, variant: ModelVariant) {
        if variant == self.variant {
            return;
        }
        if variant.kind() != self.variant.kind() {
            self.output = None;
        }
        debug!(previous = %self.variant, current = %variant, "Model variant changed");
        self.params.set_variant(variant);
        self.variant = variant;
    }

    pub fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn snapshot(&self) -> ReinitSnapshot {
        ReinitSnapshot::capture(&self.config, &self.variant, self.delay_enabled())
    }

    /// Whether the next run must reinitialize backend state
    pub fn reinit_decision(&self, force_reinit: bool) -> ReinitDecision {
        self.cache.decide(force_reinit, &self.snapshot(), self.params.n_sims())
    }

    fn dims(&self) -> RunDims {
        RunDims {
            n_sims: self.params.n_sims(),
            nodes: self.nodes(),
            duration_msec: self.config.duration_msec(),
            tr_msec: self.config.tr_msec(),
            window_size: self.config.window_size,
            window_step: self.config.window_step,
            rand_seed: self.config.rand_seed,
        }
    }

    /// Run every simulation of the batch.
    ///
    /// The previous output is dropped before the backend is called, so a
    /// failed run never leaves stale results behind; the config cache is
    /// only updated after a successful call.
    pub fn run(&mut self, force_reinit: bool) -> Result<()> {
        let decision = self.reinit_decision(force_reinit);
        let force_reinit = match &decision {
            ReinitDecision::Clean => false,
            ReinitDecision::Dirty(reason) => {
                debug!(%reason, "Backend reinitialization required");
                true
            }
        };

        let mut packed = pack_parameters(&self.params)?;
        let record = build_config_record(&self.config, &self.variant, self.sync_msec);
        let sc_strength = self.connectome.flat_strength();
        let sc_distance = self.connectome.flat_distance();
        let dims = self.dims();
        let flags = RunFlags {
            output: self.output_mode(),
            delay_enabled: self.delay_enabled(),
            force_reinit,
            use_cpu: self.target.is_cpu(),
        };

        self.output = None;
        let raw = invoke(
            &mut self.backend,
            BackendCall {
                model_name: self.variant.backend_name(),
                sc_strength: &sc_strength,
                sc_distance: &sc_distance,
                params: &mut packed,
                config: &record,
                flags,
                dims,
            },
        )?;

        self.cache.commit(self.snapshot(), dims.n_sims);
        self.iteration += 1;

        write_back_fic(&mut self.params, &packed)?;
        let shape = OutputShape {
            n_sims: dims.n_sims,
            nodes: dims.nodes,
            mode: flags.output,
        };
        let output = demarshal(raw, &self.variant, shape)?;
        if let Some(fic) = output.fic() {
            let failed = fic.failed.iter().filter(|&&f| f).count();
            if failed > 0 {
                warn!(failed, n_sims = dims.n_sims, "FIC failed for some simulations");
            }
        }
        self.output = Some(output);
        info!(iteration = self.iteration, n_sims = dims.n_sims, "Simulations completed");
        Ok(())
    }

    pub fn output(&self) -> Option<&SimulationOutput> {
        self.output.as_ref()
    }

    /// Release the current output
    pub fn clear(&mut self) {
        self.output = None;
    }

    /// Score every simulation against empirical FC and FCD triangles.
    ///
    /// For FIC batches with the penalty enabled `-fic_penalty` is added,
    /// scaled by `fic_penalty_scale`; it only enters `+gof` when selected.
    pub fn score(
        &self,
        emp_fc_tril: ArrayView1<'_, f64>,
        emp_fcd_tril: ArrayView1<'_, f64>,
        fic_penalty_scale: f64,
    ) -> Result<ScoreTable> {
        let output = self.output.as_ref().ok_or(SimError::NoOutput)?;
        let basic = output.basic();

        let mean_rates = if self.variant.computes_fic_penalty() {
            let state = output
                .states()
                .and_then(|states| states.get(FIC_RATE_STATE))
                .ok_or_else(|| SimError::UnavailableGofTerm {
                    term: GofTerm::FicPenalty.name().to_string(),
                    model: self.variant.to_string(),
                })?;
            Some(state.time_mean())
        } else {
            None
        };

        let inputs = ScoreInputs {
            sim_fc: basic.fc_trils.view(),
            sim_fcd: basic.fcd_trils.view(),
            emp_fc: emp_fc_tril,
            emp_fcd: emp_fcd_tril,
            fic: mean_rates.as_ref().map(|rates| FicPenaltyInput {
                mean_rates: rates.view(),
                scale: fic_penalty_scale,
            }),
        };
        score_batch(&inputs, &self.gof_terms, self.variant.backend_name())
    }

    /// Write the current output and parameters to the output directory.
    ///
    /// Returns the written path.
    pub fn save(&self, format: SaveFormat) -> Result<PathBuf> {
        if format == SaveFormat::Text {
            return Err(SimError::Unimplemented("saving as text".to_string()));
        }
        let output = self.output.as_ref().ok_or(SimError::NoOutput)?;
        let out_dir = self.config.resolved_out_dir();
        std::fs::create_dir_all(&out_dir)?;
        let path = out_dir.join(archive_file_name(self.iteration));

        let metadata = ArchiveMetadata {
            timestamp: unix_timestamp(),
            model: self.variant.backend_name().to_string(),
            iteration: self.iteration,
            config_json: serde_json::to_string(&self.get_config(true))?,
        };
        let archive = RunArchive::collect(metadata, output, &self.params);
        save_archive(&archive, &path)?;
        info!(path = %path.display(), "Saved simulation outputs");
        Ok(path)
    }

    /// Summary of the batch configuration, optionally with the batch size
    pub fn get_config(&self, include_n: bool) -> BatchSummary {
        let fic = self.variant.fic();
        BatchSummary {
            duration: self.config.duration,
            tr: self.config.tr,
            sc_path: self.config.sc_path.clone(),
            sc_dist_path: self.config.sc_dist_path.clone(),
            extended_output: self.config.extended_output,
            extended_output_ts: self.config.extended_output_ts,
            window_size: self.config.window_size,
            window_step: self.config.window_step,
            rand_seed: self.config.rand_seed,
            exc_interhemispheric: self.config.exc_interhemispheric,
            force_cpu: self.config.force_cpu,
            bw_params: self.config.bw_params.to_string(),
            bold_remove_s: self.config.bold_remove_s,
            fcd_drop_edges: self.config.fcd_drop_edges,
            noise_segment_length: self.config.noise_segment_length,
            out_dir: self.config.out_dir.clone(),
            gof_terms: self.config.gof_terms.clone(),
            n_sims: include_n.then(|| self.params.n_sims()),
            do_fic: fic.map(|f| f.do_fic),
            max_fic_trials: fic.map(|f| f.max_fic_trials),
        }
    }

    /// Output directory with `same` resolved against the SC path
    pub fn out_dir(&self) -> PathBuf {
        self.config.resolved_out_dir()
    }

    pub fn sc_path(&self) -> &Path {
        &self.config.sc_path
    }
}

impl<B: SimulationBackend> std::fmt::Debug for SimulationBatch<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationBatch")
            .field("model", &self.variant)
            .field("backend", &self.backend.backend_name())
            .field("nodes", &self.nodes())
            .field("n_sims", &self.params.n_sims())
            .field("iteration", &self.iteration)
            .finish()
    }
}
