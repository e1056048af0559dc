// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # cuBNM - batch simulation of biophysical network models
//!
//! Orchestrates batches of whole-brain neural mass model simulations run by
//! a native compute backend, and scores the simulated BOLD functional
//! connectivity against empirical data.
//!
//! ## Crates
//!
//! - **`config`**: TOML configuration with environment and CLI overrides
//! - **`observability`**: tracing setup and per-crate debug flags
//! - **`connectome`**: structural connectome text loader
//! - **`backend`**: backend call contract, capabilities and target selection
//! - **`sim`**: parameter store, reinit cache, demarshaling, scoring, persistence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cubnm::prelude::*;
//!
//! let config = cubnm::config::load_config(None, None)?;
//! let debug_flags = cubnm::observability::parse_debug_flags();
//! let _guard = cubnm::observability::init_from_config(&config.logging, &debug_flags)?;
//! let mut batch = cubnm::open_batch(&config, BackendCapabilities::cpu_only(), backend)?;
//! batch.set_batch_size(4)?;
//! batch.apply_default_parameters()?;
//! batch.run(false)?;
//! let scores = batch.score(emp_fc.view(), emp_fcd.view(), DEFAULT_FIC_PENALTY_SCALE)?;
//! batch.save(SaveFormat::Archive)?;
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use cubnm_backend as backend;
pub use cubnm_config as config;
pub use cubnm_connectome as connectome;
pub use cubnm_observability as observability;
pub use cubnm_sim as sim;

use cubnm_backend::{BackendCapabilities, SimulationBackend};
use cubnm_config::{validate_config, CubnmConfig};
use cubnm_sim::SimulationBatch;

/// Validate a loaded configuration and build a batch from it.
///
/// The structural connectome is read from `batch.sc_path` (and
/// `batch.sc_dist_path` when set).
///
/// # Errors
///
/// Configuration validation failures, connectome loading errors and the
/// batch construction errors of [`SimulationBatch::new`].
pub fn open_batch<B: SimulationBackend>(
    config: &CubnmConfig,
    capabilities: BackendCapabilities,
    backend: B,
) -> sim::Result<SimulationBatch<B>> {
    validate_config(config)?;
    SimulationBatch::new(config.batch.clone(), &config.model, capabilities, backend)
}

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::backend::{BackendCapabilities, ExecutionTarget, SimulationBackend};
    pub use crate::config::{BatchConfig, BwParams, BwPreset, CubnmConfig, ModelConfig, ModelKind, OutDir};
    pub use crate::connectome::StructuralConnectome;
    pub use crate::sim::{
        GofTerm, ModelVariant, ScoreTable, SaveFormat, SimError, SimulationBatch, SimulationOutput,
        DEFAULT_FIC_PENALTY_SCALE,
    };
}
