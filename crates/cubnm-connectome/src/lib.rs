// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # cuBNM Structural Connectome
//!
//! Loads structural connectivity (SC) strength and, optionally, distance
//! matrices from unlabeled whitespace-delimited text files.
//!
//! ## Usage
//! ```ignore
//! use cubnm_connectome::StructuralConnectome;
//!
//! let sc = StructuralConnectome::load("sc.txt", Some("sc_dist.txt"))?;
//! assert!(sc.has_delay());
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use ndarray::Array2;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

mod text;

pub use text::{load_matrix, parse_matrix};

/// Connectome loading errors
#[derive(Error, Debug)]
pub enum ConnectomeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}: line {line}: cannot parse {token:?} as a number")]
    Parse {
        origin: String,
        line: usize,
        token: String,
    },

    #[error("{origin}: row {line} has {found} values, expected {expected}")]
    RaggedRow {
        origin: String,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{origin}: matrix is empty")]
    Empty { origin: String },

    #[error("{origin}: matrix must be square, got {rows}x{cols}")]
    NotSquare {
        origin: String,
        rows: usize,
        cols: usize,
    },

    #[error("SC distance matrix has {distance_nodes} nodes but SC strength matrix has {strength_nodes}")]
    NodeMismatch {
        strength_nodes: usize,
        distance_nodes: usize,
    },
}

pub type Result<T> = std::result::Result<T, ConnectomeError>;

/// SC strength and optional distance matrices of one parcellation
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralConnectome {
    strength: Array2<f64>,
    distance: Option<Array2<f64>>,
    strength_path: Option<PathBuf>,
    distance_path: Option<PathBuf>,
}

impl StructuralConnectome {
    /// Load the connectome from text files.
    ///
    /// Inter-regional delay is enabled when a distance matrix is given.
    pub fn load<P: AsRef<Path>>(strength_path: P, distance_path: Option<P>) -> Result<Self> {
        let strength_path = strength_path.as_ref();
        let strength = load_matrix(strength_path)?;
        let (distance, distance_path) = match distance_path {
            Some(path) => {
                let path = path.as_ref();
                (Some(load_matrix(path)?), Some(path.to_path_buf()))
            }
            None => (None, None),
        };

        let mut sc = Self::from_matrices(strength, distance)?;
        sc.strength_path = Some(strength_path.to_path_buf());
        sc.distance_path = distance_path;
        debug!(
            nodes = sc.nodes(),
            delay = sc.has_delay(),
            path = %strength_path.display(),
            "Loaded structural connectome"
        );
        Ok(sc)
    }

    /// Build a connectome from in-memory matrices
    pub fn from_matrices(strength: Array2<f64>, distance: Option<Array2<f64>>) -> Result<Self> {
        check_square("SC strength", &strength)?;
        if let Some(distance) = &distance {
            check_square("SC distance", distance)?;
            if distance.nrows() != strength.nrows() {
                return Err(ConnectomeError::NodeMismatch {
                    strength_nodes: strength.nrows(),
                    distance_nodes: distance.nrows(),
                });
            }
        }

        let sc = Self {
            strength,
            distance,
            strength_path: None,
            distance_path: None,
        };
        if sc.has_nonzero_diagonal() {
            warn!(
                "The diagonal of the SC matrix is not 0. Self-connections are not ignored \
                 by default in the simulations. If you want to ignore them set the diagonal \
                 of the SC matrix to 0."
            );
        }
        Ok(sc)
    }

    pub fn nodes(&self) -> usize {
        self.strength.nrows()
    }

    pub fn strength(&self) -> &Array2<f64> {
        &self.strength
    }

    pub fn distance(&self) -> Option<&Array2<f64>> {
        self.distance.as_ref()
    }

    pub fn strength_path(&self) -> Option<&Path> {
        self.strength_path.as_deref()
    }

    pub fn distance_path(&self) -> Option<&Path> {
        self.distance_path.as_deref()
    }

    /// Whether inter-regional conduction delay applies
    pub fn has_delay(&self) -> bool {
        self.distance.is_some()
    }

    pub fn has_nonzero_diagonal(&self) -> bool {
        self.strength.diag().iter().any(|&v| v != 0.0)
    }

    /// Row-major strength values
    pub fn flat_strength(&self) -> Vec<f64> {
        self.strength.iter().copied().collect()
    }

    /// Row-major distance values; all zeros when delay is disabled
    pub fn flat_distance(&self) -> Vec<f64> {
        match &self.distance {
            Some(distance) => distance.iter().copied().collect(),
            None => vec![0.0; self.nodes() * self.nodes()],
        }
    }

    /// Number of unique off-diagonal pairs
    pub fn n_pairs(&self) -> usize {
        let nodes = self.nodes();
        nodes * nodes.saturating_sub(1) / 2
    }
}

fn check_square(origin: &str, matrix: &Array2<f64>) -> Result<()> {
    let (rows, cols) = matrix.dim();
    if rows == 0 {
        return Err(ConnectomeError::Empty {
            origin: origin.to_string(),
        });
    }
    if rows != cols {
        return Err(ConnectomeError::NotSquare {
            origin: origin.to_string(),
            rows,
            cols,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;

    fn write_matrix(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_strength_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_matrix(dir.path(), "sc.txt", "0 0.5 0.1\n0.5 0 0.2\n0.1 0.2 0\n");

        let sc = StructuralConnectome::load(&path, None).unwrap();
        assert_eq!(sc.nodes(), 3);
        assert_eq!(sc.n_pairs(), 3);
        assert!(!sc.has_delay());
        assert_eq!(sc.flat_distance(), vec![0.0; 9]);
        assert_eq!(sc.strength_path(), Some(path.as_path()));
    }

    #[test]
    fn test_load_with_distance() {
        let dir = tempfile::tempdir().unwrap();
        let sc_path = write_matrix(dir.path(), "sc.txt", "0 1\n1 0\n");
        let dist_path = write_matrix(dir.path(), "dist.txt", "0 30.5\n30.5 0\n");

        let sc = StructuralConnectome::load(&sc_path, Some(&dist_path)).unwrap();
        assert!(sc.has_delay());
        assert_eq!(sc.flat_distance(), vec![0.0, 30.5, 30.5, 0.0]);
    }

    #[test]
    fn test_distance_node_mismatch() {
        let err = StructuralConnectome::from_matrices(
            Array2::zeros((3, 3)),
            Some(Array2::zeros((2, 2))),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConnectomeError::NodeMismatch {
                strength_nodes: 3,
                distance_nodes: 2
            }
        ));
    }

    #[test]
    fn test_non_square_rejected() {
        let err = StructuralConnectome::from_matrices(Array2::zeros((2, 3)), None).unwrap_err();
        assert!(err.to_string().contains("2x3"));
    }

    #[test]
    fn test_nonzero_diagonal_is_flagged_not_rejected() {
        let sc = StructuralConnectome::from_matrices(array![[1.0, 0.2], [0.2, 0.0]], None).unwrap();
        assert!(sc.has_nonzero_diagonal());
    }
}
