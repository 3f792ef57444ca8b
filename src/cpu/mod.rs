//! CPU emulation.
//!
//! This module implements the complete machine:
//! - segmented byte memory (16-byte segments)
//! - 6 registers: r0-r3, cs, ds, plus ip and flags
//! - 8-instruction set with one- and two-byte encodings

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{Memory, MemoryError};
pub use registers::{Flags, Registers, RegisterError};
pub use decode::{Instruction, Opcode, Operand, MemAccess, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, Halt, Step};
