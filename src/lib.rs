//! # segcpu
//!
//! A minimal 8-bit virtual CPU with segmented memory.
//!
//! The machine runs a fetch-decode-execute loop over an eight-instruction
//! set, with four general registers, code and data segment registers and a
//! comparison flags byte. It is small enough to trace by hand.

pub mod cpu;
pub mod asm;
pub mod config;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuState, CpuError, Halt, Step, Flags, Memory, Registers, Instruction};
pub use asm::{assemble, assemble_at, disassemble, AssemblerError, load_image, save_image, ImageError};
pub use config::{MachineConfig, ConfigError};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
