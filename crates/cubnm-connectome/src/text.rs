// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Whitespace-delimited numeric matrix reader

use crate::{ConnectomeError, Result};
use ndarray::Array2;
use std::path::Path;

/// Read a dense matrix from a text file
pub fn load_matrix<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConnectomeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_matrix(&content, &path.display().to_string())
}

/// Parse a dense matrix, one row per non-empty line.
///
/// Lines starting with `#` are skipped.
pub fn parse_matrix(content: &str, origin: &str) -> Result<Array2<f64>> {
    let mut values = Vec::new();
    let mut cols = None;
    let mut rows = 0;

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let before = values.len();
        for token in line.split_whitespace() {
            let value = token.parse::<f64>().map_err(|_| ConnectomeError::Parse {
                origin: origin.to_string(),
                line: idx + 1,
                token: token.to_string(),
            })?;
            values.push(value);
        }
        let found = values.len() - before;

        match cols {
            None => cols = Some(found),
            Some(expected) if expected != found => {
                return Err(ConnectomeError::RaggedRow {
                    origin: origin.to_string(),
                    line: idx + 1,
                    expected,
                    found,
                });
            }
            Some(_) => {}
        }
        rows += 1;
    }

    let cols = cols.ok_or_else(|| ConnectomeError::Empty {
        origin: origin.to_string(),
    })?;
    Array2::from_shape_vec((rows, cols), values).map_err(|_| ConnectomeError::Empty {
        origin: origin.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_whitespace() {
        let m = parse_matrix("0\t1.5  2\n\n3 4e-1 5\n", "inline").unwrap();
        assert_eq!(m.dim(), (2, 3));
        assert_eq!(m[[0, 1]], 1.5);
        assert_eq!(m[[1, 1]], 0.4);
    }

    #[test]
    fn test_parse_ragged() {
        let err = parse_matrix("1 2\n3\n", "inline").unwrap_err();
        assert!(matches!(err, ConnectomeError::RaggedRow { line: 2, expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_parse_bad_token() {
        let err = parse_matrix("1 x\n", "inline").unwrap_err();
        assert!(err.to_string().contains("\"x\""));
    }

    #[test]
    fn test_parse_empty() {
        assert!(matches!(parse_matrix("\n\n", "inline"), Err(ConnectomeError::Empty { .. })));
    }
}
