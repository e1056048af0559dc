// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # cuBNM Compute Backend Boundary
//!
//! The neural mass model integration, Balloon-Windkessel BOLD generation and
//! the parallel execution strategy live in a native compute backend. This
//! crate describes the narrow contract used to drive it:
//!
//! - [`SimulationBackend`]: one blocking `run_simulations` call per batch and
//!   `set_const` for model constants
//! - [`BackendCall`] / [`RawOutput`]: packed inputs and flat output buffers
//! - [`BackendCapabilities`]: what the backend was built with (GPU support,
//!   many-nodes capacity class) and what hardware it sees
//! - [`resolve_target`] / [`plan_node_sync`]: execution target fallback and
//!   node-capacity checks

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod capabilities;
mod contract;
#[cfg(any(test, feature = "testing"))]
mod synthetic;

pub use capabilities::*;
pub use contract::*;
#[cfg(any(test, feature = "testing"))]
pub use synthetic::{RecordedCall, SyntheticBackend};

use thiserror::Error;

/// Backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error(
        "{nodes} nodes exceed the {capacity}-node capacity of this backend build{}",
        capacity_hint(.many_nodes_compiled)
    )]
    NodeCapacity {
        nodes: usize,
        capacity: usize,
        many_nodes_compiled: bool,
    },

    #[error("Malformed backend call: {0}")]
    Contract(String),

    #[error("Unknown model {0:?}")]
    UnknownModel(String),

    #[error("Unknown backend constant {0:?}")]
    UnknownConstant(String),

    #[error("Backend execution failed: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

fn capacity_hint(many_nodes_compiled: &bool) -> &'static str {
    if *many_nodes_compiled {
        ""
    } else {
        " (rebuild with many-nodes support for up to 10000 nodes)"
    }
}
