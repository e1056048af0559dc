// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # cubnm-observability
//!
//! Logging infrastructure shared by all cuBNM crates, with per-crate debug
//! flag support and optional per-crate JSON log files.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known cuBNM crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "cubnm",
    "cubnm-config",
    "cubnm-connectome",
    "cubnm-backend",
    "cubnm-sim",
];

/// Tracing target of a crate (module paths use underscores)
pub fn crate_target(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}
