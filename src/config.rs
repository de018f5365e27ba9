//! Storage options for writing spectrum containers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default byte budget of one compressed chunk.
pub const TARGET_CHUNK_BYTES: usize = 100_000;

/// Default gzip compression level.
pub const COMPRESSION_LEVEL: u32 = 1;

/// Knobs applied when a library is saved.
///
/// Every field has a default, so a JSON file only needs the keys it changes:
///
/// ```json
/// { "target_chunk_bytes": 250000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Target size in bytes of one (N, 2, C) chunk of the spectrum tensor.
    pub target_chunk_bytes: usize,
    /// Gzip level for the spectrum tensor (0–9).
    pub compression_level: u32,
    /// Byte-shuffle floating point values before compression.
    pub shuffle: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            target_chunk_bytes: TARGET_CHUNK_BYTES,
            compression_level: COMPRESSION_LEVEL,
            shuffle: true,
        }
    }
}

impl StorageOptions {
    /// Read options from a JSON file; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
