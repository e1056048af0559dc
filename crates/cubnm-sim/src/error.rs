// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulation batch errors

use cubnm_backend::BackendError;
use cubnm_config::ConfigError;
use cubnm_connectome::ConnectomeError;
use thiserror::Error;

/// Errors raised while configuring, running, scoring or saving a batch
#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Connectome(#[from] ConnectomeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Parameter {name:?} must have shape {expected:?}, got {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Unknown parameter {name:?} for model {model} (expected one of {known:?})")]
    UnknownParameter {
        name: String,
        model: String,
        known: Vec<String>,
    },

    #[error("Parameter {name:?} is not set for the current batch of {n_sims} simulations")]
    MissingParameter { name: String, n_sims: usize },

    #[error("Batch size must be at least 1")]
    EmptyBatch,

    #[error("Backend output {buffer} has {found} values, expected {expected}")]
    OutputLayout {
        buffer: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("No simulation output available; run the batch first")]
    NoOutput,

    #[error("Unknown goodness-of-fit term {0:?}")]
    UnknownGofTerm(String),

    #[error("Goodness-of-fit term {term:?} is not computed for model {model}")]
    UnavailableGofTerm { term: String, model: String },

    #[error("Empirical {what} has {found} values, simulated has {expected}")]
    EmpiricalLength {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Not implemented: {0}")]
    Unimplemented(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Archive(#[from] crate::persistence::ArchiveError),
}

pub type Result<T> = std::result::Result<T, SimError>;
