// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Run archives
//!
//! One compressed file per run iteration holding BOLD/FC/FCD, state
//! variables, every parameter array and FIC diagnostics.
//!
//! ## Format
//! ```text
//! [Header]
//! - Magic: "CUBNM" (5 bytes)
//! - Version: u32 (4 bytes)
//! - Flags: u8 (1 byte) - bit 0: compressed
//! - Uncompressed Size: u64 (8 bytes)
//! - Checksum: u64 (8 bytes, FNV-1a of data)
//! [Data]
//! - Bincode-serialized RunArchive, LZ4 compressed
//! ```

use crate::demarshal::{SimulationOutput, StateArray};
use crate::params::ParameterStore;
use ndarray::{Array, ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Archive I/O errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive serialization error: {0}")]
    Serialization(String),

    #[error("Archive deserialization error: {0}")]
    Deserialization(String),

    #[error("Archive version mismatch: file version {file_version}, expected {expected_version}")]
    VersionMismatch { file_version: u32, expected_version: u32 },

    #[error("Invalid magic number: expected CUBNM, got {0:?}")]
    InvalidMagic([u8; 5]),

    #[error("Archive checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Archive compression error: {0}")]
    Compression(String),

    #[error("Array {name:?} has {len} values, shape {shape:?} needs {expected}")]
    Shape {
        name: String,
        shape: Vec<usize>,
        len: usize,
        expected: usize,
    },
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Magic number of run archives: "CUBNM"
const MAGIC: &[u8; 5] = b"CUBNM";

/// Current format version
const FORMAT_VERSION: u32 = 1;

/// File extension of run archives
pub const ARCHIVE_EXTENSION: &str = "cbnm";

/// How [`crate::SimulationBatch::save`] writes outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFormat {
    /// Every simulation in one compressed archive
    #[default]
    Archive,
    /// One text file per simulation (not implemented)
    Text,
}

impl FromStr for SaveFormat {
    type Err = crate::SimError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "archive" | "cbnm" => Ok(SaveFormat::Archive),
            "txt" | "text" => Ok(SaveFormat::Text),
            other => Err(crate::SimError::Unimplemented(format!("save format {other:?}"))),
        }
    }
}

/// Archive file name of a run iteration
pub fn archive_file_name(iteration: u64) -> String {
    format!("it{iteration}.{ARCHIVE_EXTENSION}")
}

/// Shape and row-major data of one array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArray<T> {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T: Clone> NamedArray<T> {
    pub fn from_array<D: Dimension>(name: &str, array: &Array<T, D>) -> Self {
        Self {
            name: name.to_string(),
            shape: array.shape().to_vec(),
            data: array.iter().cloned().collect(),
        }
    }

    pub fn to_array(&self) -> ArchiveResult<ArrayD<T>> {
        let expected: usize = self.shape.iter().product();
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone()).map_err(|_| ArchiveError::Shape {
            name: self.name.clone(),
            shape: self.shape.clone(),
            len: self.data.len(),
            expected,
        })
    }
}

/// Provenance of an archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    pub model: String,
    pub iteration: u64,
    /// Batch configuration as JSON
    pub config_json: String,
}

/// Contents of one run archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArchive {
    pub version: u32,
    pub metadata: ArchiveMetadata,
    pub arrays: Vec<NamedArray<f64>>,
    pub flags: Vec<NamedArray<bool>>,
    pub counters: Vec<NamedArray<i64>>,
}

impl RunArchive {
    /// Collect outputs and parameters of the current run
    pub fn collect(
        metadata: ArchiveMetadata,
        output: &SimulationOutput,
        params: &ParameterStore,
    ) -> Self {
        let basic = output.basic();
        let mut arrays = vec![
            NamedArray::from_array("sim_bold", &basic.bold),
            NamedArray::from_array("sim_fc_trils", &basic.fc_trils),
            NamedArray::from_array("sim_fcd_trils", &basic.fcd_trils),
        ];
        if let Some(states) = output.states() {
            for (name, state) in states.iter() {
                let name = format!("sim_states.{name}");
                arrays.push(match state {
                    StateArray::Mean(mean) => NamedArray::from_array(&name, mean),
                    StateArray::Timeseries(ts) => NamedArray::from_array(&name, ts),
                });
            }
        }
        for (name, shape, data) in params.snapshot() {
            arrays.push(NamedArray {
                name: name.to_string(),
                shape,
                data,
            });
        }

        let mut flags = Vec::new();
        let mut counters = Vec::new();
        if let Some(fic) = output.fic() {
            flags.push(NamedArray::from_array("fic_unstable", &fic.unstable));
            flags.push(NamedArray::from_array("fic_failed", &fic.failed));
            counters.push(NamedArray::from_array("fic_ntrials", &fic.ntrials));
        }

        Self {
            version: FORMAT_VERSION,
            metadata,
            arrays,
            flags,
            counters,
        }
    }

    pub fn array(&self, name: &str) -> Option<&NamedArray<f64>> {
        self.arrays.iter().find(|a| a.name == name)
    }

    pub fn flag(&self, name: &str) -> Option<&NamedArray<bool>> {
        self.flags.iter().find(|a| a.name == name)
    }

    pub fn counter(&self, name: &str) -> Option<&NamedArray<i64>> {
        self.counters.iter().find(|a| a.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.arrays
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.flags.iter().map(|a| a.name.as_str()))
            .chain(self.counters.iter().map(|a| a.name.as_str()))
            .collect()
    }
}

/// Current time as seconds since the Unix epoch
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write an archive with LZ4 compression
pub fn save_archive<P: AsRef<Path>>(archive: &RunArchive, path: P) -> ArchiveResult<()> {
    let mut file = BufWriter::new(File::create(path)?);

    file.write_all(MAGIC)?;
    file.write_all(&FORMAT_VERSION.to_le_bytes())?;

    let data = bincode::serialize(archive).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
    let uncompressed_size = data.len() as u64;
    let compressed =
        lz4::block::compress(&data, None, false).map_err(|e| ArchiveError::Compression(e.to_string()))?;

    // Flag bit 0 = compressed
    file.write_all(&[1u8])?;
    file.write_all(&uncompressed_size.to_le_bytes())?;
    file.write_all(&calculate_checksum(&compressed).to_le_bytes())?;
    file.write_all(&compressed)?;
    file.flush()?;
    Ok(())
}

/// Read an archive, verifying magic, version and checksum
pub fn load_archive<P: AsRef<Path>>(path: P) -> ArchiveResult<RunArchive> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 5];
    file.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ArchiveError::InvalidMagic(magic));
    }

    let mut version_bytes = [0u8; 4];
    file.read_exact(&mut version_bytes)?;
    let version = u32::from_le_bytes(version_bytes);
    if version != FORMAT_VERSION {
        return Err(ArchiveError::VersionMismatch {
            file_version: version,
            expected_version: FORMAT_VERSION,
        });
    }

    let mut flags = [0u8; 1];
    file.read_exact(&mut flags)?;
    let is_compressed = (flags[0] & 1) != 0;

    let mut size_bytes = [0u8; 8];
    file.read_exact(&mut size_bytes)?;
    let uncompressed_size = u64::from_le_bytes(size_bytes);

    let mut checksum_bytes = [0u8; 8];
    file.read_exact(&mut checksum_bytes)?;
    let expected_checksum = u64::from_le_bytes(checksum_bytes);

    let mut payload = Vec::new();
    file.read_to_end(&mut payload)?;
    if calculate_checksum(&payload) != expected_checksum {
        return Err(ArchiveError::ChecksumMismatch);
    }

    let data = if is_compressed {
        let size = i32::try_from(uncompressed_size)
            .map_err(|_| ArchiveError::Compression(format!("archive too large: {uncompressed_size} bytes")))?;
        lz4::block::decompress(&payload, Some(size))
            .map_err(|e| ArchiveError::Compression(format!("Decompression failed: {e}")))?
    } else {
        payload
    };

    bincode::deserialize(&data).map_err(|e| ArchiveError::Deserialization(e.to_string()))
}

/// FNV-1a hash
fn calculate_checksum(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
