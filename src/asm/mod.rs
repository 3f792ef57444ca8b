//! Assembler and disassembler.
//!
//! This module provides:
//! - A two-pass assembler (text → raw program bytes)
//! - A disassembler (raw bytes → readable text)
//! - Raw image file I/O

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, assemble_at, AssemblerError};
pub use disasm::{disassemble, disassemble_instruction};
pub use image::{load_image, save_image, ImageError};
