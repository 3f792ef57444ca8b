//! Machine configuration.
//!
//! A configuration file is JSON; every field is optional:
//!
//! ```json
//! { "memory_size": 4096, "load_segment": 0, "load_offset": 0,
//!   "data_segment": 16, "max_cycles": 100000 }
//! ```

use crate::cpu::memory::{flat_address, DEFAULT_MEMORY_SIZE};
use crate::cpu::registers::INITIAL_DATA_SEGMENT;
use serde::{Serialize, Deserialize};
use std::path::Path;
use thiserror::Error;

/// Size, load address and run limits of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Backing store size in bytes.
    pub memory_size: usize,
    /// Segment the program is loaded into; becomes cs.
    pub load_segment: u8,
    /// Offset the program is loaded at; becomes ip.
    pub load_offset: u8,
    /// Initial ds.
    pub data_segment: u8,
    /// Stop after this many instructions if the program has not halted.
    pub max_cycles: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            load_segment: 0,
            load_offset: 0,
            data_segment: INITIAL_DATA_SEGMENT,
            max_cycles: None,
        }
    }
}

impl MachineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json(&source)
    }

    /// Check that the load address lies inside memory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_size == 0 {
            return Err(ConfigError::Invalid("memory_size must be non-zero".into()));
        }

        let entry = flat_address(self.load_segment, self.load_offset);
        if entry >= self.memory_size {
            return Err(ConfigError::Invalid(format!(
                "load address 0x{:02X}:0x{:02X} lies outside {} bytes of memory",
                self.load_segment, self.load_offset, self.memory_size
            )));
        }

        Ok(())
    }
}

/// Errors that can occur while loading a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
