// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # cuBNM Simulation Batches
//!
//! Orchestrates batches of whole-brain simulations executed by a
//! [`cubnm_backend::SimulationBackend`] and scores them against empirical
//! functional connectivity.
//!
//! ## Pipeline
//! 1. [`ParameterStore`]: named global/regional parameter arrays, validated
//!    against the active [`ModelVariant`]
//! 2. [`ConfigCache`]: decides whether backend state must be reinitialized
//! 3. [`invoker`]: packs parameters and issues the blocking backend call
//! 4. [`demarshal`]: reshapes flat buffers into [`SimulationOutput`]
//! 5. [`scoring`]: goodness-of-fit terms and their aggregate
//! 6. [`persistence`]: compressed per-iteration archives
//!
//! ## Usage
//! ```ignore
//! use cubnm_sim::{SimulationBatch, SaveFormat};
//!
//! let mut batch = SimulationBatch::new(config.batch, &config.model, capabilities, backend)?;
//! batch.set_batch_size(32)?;
//! batch.apply_default_parameters()?;
//! batch.run(false)?;
//! let scores = batch.score(emp_fc.view(), emp_fcd.view(), 2.0)?;
//! batch.save(SaveFormat::Archive)?;
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod batch;
pub mod demarshal;
mod error;
pub mod invoker;
pub mod model;
pub mod params;
pub mod persistence;
pub mod reinit;
pub mod scoring;

pub use batch::{BatchSummary, SimulationBatch};
pub use demarshal::{BasicOutput, ExtendedOutput, FicDiagnostics, SimulationOutput, StateArray, StateVariables};
pub use error::{Result, SimError};
pub use model::{FicOptions, ModelVariant, ParamKind};
pub use params::ParameterStore;
pub use persistence::{load_archive, save_archive, ArchiveError, NamedArray, RunArchive, SaveFormat};
pub use reinit::{ConfigCache, ReinitDecision, ReinitReason, ReinitSnapshot};
pub use scoring::{GofTerm, ScoreRow, ScoreTable, DEFAULT_FIC_PENALTY_SCALE};
