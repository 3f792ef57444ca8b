//! WebAssembly bindings.
//!
//! This module provides JavaScript-friendly wrappers around the core machine.

use wasm_bindgen::prelude::*;
use crate::{Cpu, MachineConfig, Step};
use crate::cpu::MemoryError;
use crate::asm::assembler::{assemble, assemble_at};
use crate::asm::disasm::disassemble_instruction;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    program: Vec<u8>,
    config: MachineConfig,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            program: Vec::new(),
            config: MachineConfig::default(),
        }
    }

    /// Load a program from assembly source code. Returns its size in bytes.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let program = assemble_at(source, self.config.load_offset)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.load_bytes(&program)
    }

    /// Load a raw program image.
    #[wasm_bindgen]
    pub fn load_bytes(&mut self, program: &[u8]) -> Result<usize, JsError> {
        self.cpu = Self::boot(&self.config, program)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.program = program.to_vec();
        Ok(program.len())
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        match self.cpu.step().map_err(|e| JsError::new(&e.to_string()))? {
            Step::Continue(instr) => Ok(instr.to_string()),
            Step::Halted(flags) => Ok(format!("hlt ; program exited with flags {}", flags)),
        }
    }

    /// Run until halt, fault or `max_cycles`. Returns the total cycle count.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> Result<u64, JsError> {
        self.cpu.run_limited(max_cycles as u64)
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(self.cpu.cycles)
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) -> Result<(), JsError> {
        self.cpu = Self::boot(&self.config, &self.program)
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(())
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get register `index` (0-5), or `undefined` for an invalid index.
    #[wasm_bindgen]
    pub fn register(&self, index: u8) -> Option<u8> {
        self.cpu.regs.get(index).ok()
    }

    /// Get instruction pointer.
    #[wasm_bindgen]
    pub fn ip(&self) -> u8 {
        self.cpu.regs.ip
    }

    /// Get flags byte.
    #[wasm_bindgen]
    pub fn flags(&self) -> u8 {
        self.cpu.regs.flags.bits()
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Disassembly of the instruction at cs:ip.
    #[wasm_bindgen]
    pub fn current_instruction(&self) -> String {
        match self.cpu.fetch() {
            Ok(instr) => instr.to_string(),
            Err(e) => format!("??? ; {}", e),
        }
    }

    /// Get memory byte at flat index, 0 past the end.
    #[wasm_bindgen]
    pub fn memory_at(&self, index: usize) -> u8 {
        self.cpu.mem.peek(index).unwrap_or(0)
    }

    /// Copy of `count` bytes starting at flat index `start`.
    #[wasm_bindgen]
    pub fn memory_range(&self, start: usize, count: usize) -> js_sys::Uint8Array {
        js_sys::Uint8Array::from(self.cpu.mem.dump(start, count))
    }

    /// Get registers as JSON string.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.cpu.regs)
            .map_err(|e| JsError::new(&e.to_string()))
    }
}

impl WasmCpu {
    /// Build a machine from `config` with `program` loaded at its entry point.
    fn boot(config: &MachineConfig, program: &[u8]) -> Result<Cpu, MemoryError> {
        let mut cpu = Cpu::with_config(config);
        cpu.load_with_config(config, program)?;
        Ok(cpu)
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the program bytes.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<Vec<u8>, JsError> {
    assemble(source).map_err(|e| JsError::new(&e.to_string()))
}

/// Disassemble one instruction from up to two bytes.
#[wasm_bindgen]
pub fn wasm_disassemble(bytes: &[u8]) -> String {
    disassemble_instruction(bytes)
        .map(|(text, _)| text)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_places_program_at_entry() {
        let config = MachineConfig { load_segment: 1, load_offset: 2, ..MachineConfig::default() };
        let cpu = WasmCpu::boot(&config, &[0xE0]).unwrap();
        assert_eq!(cpu.regs.cs(), 1);
        assert_eq!(cpu.regs.ip, 2);
        assert_eq!(cpu.mem.peek(0x12), Some(0xE0));
    }

    #[test]
    fn test_boot_reports_oversized_program() {
        let config = MachineConfig { memory_size: 16, ..MachineConfig::default() };
        let err = WasmCpu::boot(&config, &[0u8; 17]).unwrap_err();
        assert!(matches!(err, MemoryError::ProgramTooLarge { .. }));
    }
}
