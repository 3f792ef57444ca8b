//! Segmented memory.
//!
//! Memory is a flat byte array addressed as `segment:offset`, where a segment
//! is 16 bytes wide. The flat location is `segment * 16 + offset`; offsets
//! larger than a segment simply reach into the following segments.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Width of one segment in bytes.
pub const SEGMENT_SIZE: usize = 16;

/// Default backing store size: 256 segments.
pub const DEFAULT_MEMORY_SIZE: usize = 256 * SEGMENT_SIZE;

/// Byte-addressable segmented memory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Create a zeroed memory of the default size.
    pub fn new() -> Self {
        Self::with_size(DEFAULT_MEMORY_SIZE)
    }

    /// Create a zeroed memory of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self { bytes: vec![0; size] }
    }

    /// Size of the backing store in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Resolve `segment:offset` to a flat index.
    pub fn resolve(&self, segment: u8, offset: u8) -> Result<usize, MemoryError> {
        let index = flat_address(segment, offset);
        if index >= self.bytes.len() {
            return Err(MemoryError::OutOfBounds {
                segment,
                offset,
                size: self.bytes.len(),
            });
        }
        Ok(index)
    }

    /// Read the byte at `segment:offset`.
    #[inline]
    pub fn read(&self, segment: u8, offset: u8) -> Result<u8, MemoryError> {
        let index = self.resolve(segment, offset)?;
        Ok(self.bytes[index])
    }

    /// Write `value` to `segment:offset`.
    #[inline]
    pub fn write(&mut self, segment: u8, offset: u8, value: u8) -> Result<(), MemoryError> {
        let index = self.resolve(segment, offset)?;
        self.bytes[index] = value;
        Ok(())
    }

    /// Read by flat index, `None` past the end.
    pub fn peek(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Copy `program` into memory starting at `segment:offset`.
    pub fn load(&mut self, segment: u8, offset: u8, program: &[u8]) -> Result<(), MemoryError> {
        let start = self.resolve(segment, offset)?;
        let available = self.bytes.len() - start;
        if program.len() > available {
            return Err(MemoryError::ProgramTooLarge {
                size: program.len(),
                available,
            });
        }

        self.bytes[start..start + program.len()].copy_from_slice(program);
        Ok(())
    }

    /// Bytes in `start..start + count`, clipped to the store.
    pub fn dump(&self, start: usize, count: usize) -> &[u8] {
        let start = start.min(self.bytes.len());
        let end = start.saturating_add(count).min(self.bytes.len());
        &self.bytes[start..end]
    }
}

/// Flat index of `segment:offset`, without bounds checking.
pub fn flat_address(segment: u8, offset: u8) -> usize {
    segment as usize * SEGMENT_SIZE + offset as usize
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.bytes.iter().filter(|b| **b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_bytes", &non_zero)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Address resolves outside the backing store.
    #[error("memory access out of bounds: 0x{segment:02X}:0x{offset:02X} (size {size})")]
    OutOfBounds { segment: u8, offset: u8, size: usize },

    /// Program does not fit between the load address and the end of memory.
    #[error("program size {size} exceeds available space {available}")]
    ProgramTooLarge { size: usize, available: usize },
}
