//! CPU register file.
//!
//! The machine has six byte-wide registers addressed by a single index space:
//! - r0-r3: general purpose
//! - r4 (cs): code segment
//! - r5 (ds): data segment
//!
//! Alongside them sit the instruction pointer (an offset into the code
//! segment) and the flags byte written by `cmp`.

use serde::{Serialize, Deserialize};
use std::fmt;
use thiserror::Error;

/// Number of slots in the unified register space.
pub const REGISTER_COUNT: usize = 6;

/// Index of the code segment register.
pub const CS: u8 = 4;

/// Index of the data segment register.
pub const DS: u8 = 5;

/// Data segment selected at power-on.
pub const INITIAL_DATA_SEGMENT: u8 = 0x10;

/// Result of the last comparison.
///
/// Stored as a single byte: Equal = 0x00, Less = 0xFF, Greater = 0x01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Flags {
    #[default]
    Equal = 0x00,
    Less = 0xFF,
    Greater = 0x01,
}

impl Flags {
    /// Unsigned comparison of two register values.
    pub fn compare(lhs: u8, rhs: u8) -> Self {
        match lhs.cmp(&rhs) {
            std::cmp::Ordering::Equal => Flags::Equal,
            std::cmp::Ordering::Less => Flags::Less,
            std::cmp::Ordering::Greater => Flags::Greater,
        }
    }

    /// Raw byte encoding.
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn is_equal(self) -> bool {
        self == Flags::Equal
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.bits())
    }
}

/// The register file plus instruction pointer and flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// r0-r3, cs, ds in index order.
    slots: [u8; REGISTER_COUNT],

    /// Offset of the next instruction within the code segment.
    pub ip: u8,

    /// Outcome of the most recent `cmp`.
    pub flags: Flags,
}

impl Registers {
    /// Power-on state: everything zero except ds = 0x10.
    pub fn new() -> Self {
        let mut slots = [0u8; REGISTER_COUNT];
        slots[DS as usize] = INITIAL_DATA_SEGMENT;
        Self {
            slots,
            ip: 0,
            flags: Flags::Equal,
        }
    }

    /// Read register `index`.
    #[inline]
    pub fn get(&self, index: u8) -> Result<u8, RegisterError> {
        self.slots
            .get(index as usize)
            .copied()
            .ok_or(RegisterError::InvalidRegister(index))
    }

    /// Write register `index`.
    #[inline]
    pub fn set(&mut self, index: u8, value: u8) -> Result<(), RegisterError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(RegisterError::InvalidRegister(index))?;
        *slot = value;
        Ok(())
    }

    /// Code segment.
    pub fn cs(&self) -> u8 {
        self.slots[CS as usize]
    }

    pub fn set_cs(&mut self, segment: u8) {
        self.slots[CS as usize] = segment;
    }

    /// Data segment.
    pub fn ds(&self) -> u8 {
        self.slots[DS as usize]
    }

    pub fn set_ds(&mut self, segment: u8) {
        self.slots[DS as usize] = segment;
    }

    /// Move the instruction pointer forward by `len` bytes.
    /// The offset wraps within its 8-bit range.
    pub fn advance_ip(&mut self, len: u8) {
        self.ip = self.ip.wrapping_add(len);
    }

    /// Transfer control to `ip`, optionally switching code segment.
    pub fn jump(&mut self, ip: u8, segment: Option<u8>) {
        self.ip = ip;
        if let Some(segment) = segment {
            self.set_cs(segment);
        }
    }

    /// Human-readable snapshot used by the CLI and debugger.
    pub fn dump(&self) -> String {
        format!(
            "********** Registers **********\n\
             r0: 0x{:02X}\tr1: 0x{:02X}\n\
             r2: 0x{:02X}\tr3: 0x{:02X}\n\
             cs: 0x{:02X}\tds: 0x{:02X}\n\
             ip: 0x{:02X}\tfl: 0x{:02X}\n",
            self.slots[0],
            self.slots[1],
            self.slots[2],
            self.slots[3],
            self.cs(),
            self.ds(),
            self.ip,
            self.flags.bits(),
        )
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised by register access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("invalid register access: r{0}")]
    InvalidRegister(u8),
}
