//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::config::MachineConfig;
use crate::cpu::{Memory, Registers};
use crate::cpu::decode::{self, Instruction, MemAccess, Operand, DecodeError};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::{Flags, RegisterError};
use serde::{Serialize, Deserialize};
use std::fmt;
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU executed `hlt`.
    Halted,
    /// CPU stopped on a fault.
    Faulted,
}

/// Outcome of a single successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The instruction executed and the machine keeps running.
    Continue(Instruction),
    /// `hlt` executed; carries the final flags.
    Halted(Flags),
}

/// A completed run: the program stopped itself with `hlt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Halt {
    /// Flags at the moment of the halt.
    pub flags: Flags,
    /// Instructions executed by the run, including the `hlt`.
    pub cycles: u64,
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program exited with flags {}", self.flags)
    }
}

/// The virtual CPU together with the memory it owns.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// Register file, instruction pointer and flags.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU in its power-on state with default-sized memory.
    pub fn new() -> Self {
        Self::with_memory(Memory::new())
    }

    /// Create a CPU around an existing memory.
    pub fn with_memory(mem: Memory) -> Self {
        Self {
            regs: Registers::new(),
            mem,
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Create a CPU sized and positioned according to `config`.
    pub fn with_config(config: &MachineConfig) -> Self {
        let mut cpu = Self::with_memory(Memory::with_size(config.memory_size));
        cpu.apply_entry(config);
        cpu
    }

    fn apply_entry(&mut self, config: &MachineConfig) {
        self.regs.set_cs(config.load_segment);
        self.regs.ip = config.load_offset;
        self.regs.set_ds(config.data_segment);
    }

    /// Load a program at 0:0, where execution starts after power-on.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MemoryError> {
        self.mem.load(0, 0, program)
    }

    /// Load a program at the configured load address and point cs:ip at it.
    pub fn load_with_config(&mut self, config: &MachineConfig, program: &[u8]) -> Result<(), MemoryError> {
        self.mem.load(config.load_segment, config.load_offset, program)?;
        self.apply_entry(config);
        tracing::debug!(
            bytes = program.len(),
            segment = config.load_segment,
            offset = config.load_offset,
            "program loaded"
        );
        Ok(())
    }

    /// Fetch and decode the instruction at cs:ip without executing it.
    ///
    /// The byte after the opcode is always fetched, even by one-byte forms.
    pub fn fetch(&self) -> Result<Instruction, CpuError> {
        let cs = self.regs.cs();
        let ip = self.regs.ip;
        let byte1 = self.mem.read(cs, ip)?;
        let byte2 = self.mem.read(cs, ip.wrapping_add(1))?;
        Ok(decode::decode(byte1, byte2)?)
    }

    /// Execute a single instruction.
    ///
    /// Any error is terminal: the CPU moves to [`CpuState::Faulted`] and
    /// further steps fail with [`CpuError::NotRunning`].
    pub fn step(&mut self) -> Result<Step, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        let (cs, ip) = (self.regs.cs(), self.regs.ip);
        match self.step_inner() {
            Ok(step) => {
                if let Step::Halted(flags) = step {
                    self.state = CpuState::Halted;
                    tracing::debug!(flags = %flags, cycles = self.cycles, "halted");
                }
                Ok(step)
            }
            Err(e) => {
                self.state = CpuState::Faulted;
                tracing::warn!(
                    cs,
                    ip,
                    error = %e,
                    "terminal fault"
                );
                Err(e)
            }
        }
    }

    fn step_inner(&mut self) -> Result<Step, CpuError> {
        // Fetch and decode
        let instr = self.fetch()?;
        tracing::trace!(cs = self.regs.cs(), ip = self.regs.ip, "{}", instr);

        // Advance before executing so jumps are not overwritten
        self.regs.advance_ip(instr.len());

        // Execute
        self.cycles += 1;
        self.last_instr = Some(instr);
        self.execute(instr)
    }

    /// Run until `hlt` or a fault.
    pub fn run(&mut self) -> Result<Halt, CpuError> {
        let start_cycles = self.cycles;

        loop {
            if let Step::Halted(flags) = self.step()? {
                return Ok(Halt {
                    flags,
                    cycles: self.cycles - start_cycles,
                });
            }
        }
    }

    /// Run for at most `max_cycles` instructions.
    ///
    /// Returns `Ok(None)` if the limit was reached while still running.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<Option<Halt>, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles + max_cycles;

        while self.cycles < limit {
            if let Step::Halted(flags) = self.step()? {
                return Ok(Some(Halt {
                    flags,
                    cycles: self.cycles - start_cycles,
                }));
            }
        }

        Ok(None)
    }

    /// Execute a decoded instruction.
    ///
    /// All operands are read before any register or memory is written, so a
    /// fault leaves registers and memory as the decoder left them.
    fn execute(&mut self, instr: Instruction) -> Result<Step, CpuError> {
        match instr {
            Instruction::Jmp { target, segment } => {
                let ip = self.regs.get(target)?;
                self.regs.jump(ip, segment);
            }

            Instruction::Movr { dst, src } => {
                let value = self.operand(src)?;
                self.regs.set(dst, value)?;
            }

            Instruction::Movm(MemAccess::Load { dst, addr }) => {
                let offset = self.regs.get(addr)?;
                // Validate the destination before touching memory.
                self.regs.get(dst)?;
                let value = self.mem.read(self.regs.ds(), offset)?;
                self.regs.set(dst, value)?;
            }

            Instruction::Movm(MemAccess::Store { addr, src }) => {
                let offset = self.regs.get(addr)?;
                let value = self.regs.get(src)?;
                self.mem.write(self.regs.ds(), offset, value)?;
            }

            Instruction::Add { dst, src } => {
                let lhs = self.regs.get(dst)?;
                let rhs = self.operand(src)?;
                let sum = lhs as u16 + rhs as u16;
                if sum > 0xFF {
                    return Err(CpuError::ArithmeticOverflow { lhs, rhs });
                }
                self.regs.set(dst, (sum & 0xFF) as u8)?;
            }

            Instruction::Xor { dst, src } => {
                let lhs = self.regs.get(dst)?;
                let rhs = self.operand(src)?;
                self.regs.set(dst, lhs ^ rhs)?;
            }

            Instruction::Cmp { lhs, rhs } => {
                let a = self.regs.get(lhs)?;
                let b = self.operand(rhs)?;
                self.regs.flags = Flags::compare(a, b);
            }

            Instruction::Jmpe { target, segment } => {
                if self.regs.flags.is_equal() {
                    let ip = self.regs.get(target)?;
                    let segment = segment.map(|r| self.regs.get(r)).transpose()?;
                    self.regs.jump(ip, segment);
                }
            }

            Instruction::Hlt { .. } => {
                return Ok(Step::Halted(self.regs.flags));
            }
        }

        Ok(Step::Continue(instr))
    }

    /// Resolve a register/immediate operand to its value.
    fn operand(&self, operand: Operand) -> Result<u8, CpuError> {
        match operand {
            Operand::Register(r) => Ok(self.regs.get(r)?),
            Operand::Immediate(imm) => Ok(imm),
        }
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that end a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error(transparent)]
    InvalidRegister(#[from] RegisterError),

    #[error(transparent)]
    InvalidOpcode(#[from] DecodeError),

    #[error("add overflow: 0x{lhs:02X} + 0x{rhs:02X} exceeds 0xFF")]
    ArithmeticOverflow { lhs: u8, rhs: u8 },

    #[error(transparent)]
    OutOfBounds(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::registers::{CS, DS};
    use proptest::prelude::*;

    fn make_program(instructions: &[Instruction]) -> Vec<u8> {
        instructions.iter().flat_map(encode).collect()
    }

    fn cpu_with(instructions: &[Instruction]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(instructions)).unwrap();
        cpu
    }

    const HLT: Instruction = Instruction::Hlt { operand: None };

    fn movi(dst: u8, imm: u8) -> Instruction {
        Instruction::Movr { dst, src: Operand::Immediate(imm) }
    }

    #[test]
    fn test_cpu_halt() {
        let mut cpu = cpu_with(&[HLT]);

        let halt = cpu.run().unwrap();

        assert_eq!(halt, Halt { flags: Flags::Equal, cycles: 1 });
        assert!(cpu.is_halted());
        assert_eq!(halt.to_string(), "program exited with flags 0x00");
    }

    #[test]
    fn test_movr_then_hlt_scenario() {
        let mut cpu = Cpu::new();
        cpu.load_program(&[0x31, 0x05, 0xE0, 0x00]).unwrap();

        let halt = cpu.run().unwrap();

        assert_eq!(cpu.regs.get(1).unwrap(), 0x05);
        assert_eq!(halt.flags.bits(), 0x00);
        assert_eq!(cpu.regs.ip, 3);
    }

    #[test]
    fn test_movr_register_mode_reads_register() {
        // Mode bit clear: operand2 = 5 names ds.
        let mut cpu = Cpu::new();
        cpu.load_program(&[0x21, 0x05, 0xE0]).unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(1).unwrap(), 0x10);
    }

    #[test]
    fn test_movm_roundtrip() {
        let mut cpu = cpu_with(&[
            movi(0, 0x03),
            movi(1, 0xAB),
            Instruction::Movm(MemAccess::Store { addr: 0, src: 1 }),
            Instruction::Movm(MemAccess::Load { dst: 2, addr: 0 }),
            HLT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(2).unwrap(), 0xAB);
        assert_eq!(cpu.mem.read(0x10, 0x03).unwrap(), 0xAB);
    }

    #[test]
    fn test_add_overflow() {
        let mut cpu = cpu_with(&[
            movi(1, 0xF0),
            movi(2, 0x20),
            Instruction::Add { dst: 1, src: Operand::Register(2) },
            HLT,
        ]);

        let err = cpu.run().unwrap_err();

        assert_eq!(err, CpuError::ArithmeticOverflow { lhs: 0xF0, rhs: 0x20 });
        assert_eq!(cpu.regs.get(1).unwrap(), 0xF0);
        assert_eq!(cpu.state, CpuState::Faulted);
    }

    #[test]
    fn test_add_immediate() {
        let mut cpu = cpu_with(&[
            movi(1, 0x0A),
            Instruction::Add { dst: 1, src: Operand::Immediate(0x05) },
            HLT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(1).unwrap(), 0x0F);
    }

    #[test]
    fn test_add_to_exactly_ff() {
        let mut cpu = cpu_with(&[
            movi(0, 0xF0),
            Instruction::Add { dst: 0, src: Operand::Immediate(0x0F) },
            HLT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(0).unwrap(), 0xFF);
    }

    #[test]
    fn test_xor() {
        let mut cpu = cpu_with(&[
            movi(0, 0b1100),
            movi(1, 0b1010),
            Instruction::Xor { dst: 0, src: Operand::Register(1) },
            Instruction::Xor { dst: 1, src: Operand::Immediate(0xFF) },
            HLT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(0).unwrap(), 0b0110);
        assert_eq!(cpu.regs.get(1).unwrap(), 0xF5);
    }

    #[test]
    fn test_cmp_flags() {
        let mut cpu = cpu_with(&[
            movi(0, 3),
            Instruction::Cmp { lhs: 0, rhs: Operand::Immediate(7) },
            HLT,
        ]);

        let halt = cpu.run().unwrap();

        assert_eq!(halt.flags, Flags::Less);
        assert_eq!(halt.to_string(), "program exited with flags 0xFF");
    }

    #[test]
    fn test_jmp_skips_instructions() {
        // 0: movr r0, $0x05   (2 bytes)
        // 2: jmp r0           (1 byte)
        // 3: movr r1, $0x01   (2 bytes, skipped)
        // 5: hlt
        let mut cpu = cpu_with(&[
            movi(0, 0x05),
            Instruction::Jmp { target: 0, segment: None },
            movi(1, 0x01),
            HLT,
        ]);

        let halt = cpu.run().unwrap();

        assert_eq!(halt.cycles, 3);
        assert_eq!(cpu.regs.get(1).unwrap(), 0x00);
    }

    #[test]
    fn test_jmp_far_switches_code_segment() {
        let mut cpu = cpu_with(&[
            movi(0, 0x04),
            Instruction::Jmp { target: 0, segment: Some(0x02) },
        ]);
        // 0x02:0x04 = flat 36
        cpu.mem.load(0x02, 0x04, &encode(&HLT)).unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.regs.cs(), 0x02);
        assert_eq!(cpu.regs.ip, 0x05);
    }

    #[test]
    fn test_jmpe_taken_when_equal() {
        // 0: movr r0, $0x07
        // 2: cmp r0, $0x07
        // 4: movr r2, $0x0A
        // 6: jmpe r2
        // 7: movr r1, $0x01 (skipped)
        // 9: hlt
        // 10: movr r3, $0x01
        // 12: hlt
        let mut cpu = cpu_with(&[
            movi(0, 0x07),
            Instruction::Cmp { lhs: 0, rhs: Operand::Immediate(0x07) },
            movi(2, 0x0A),
            Instruction::Jmpe { target: 2, segment: None },
            movi(1, 0x01),
            HLT,
            movi(3, 0x01),
            HLT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(1).unwrap(), 0x00);
        assert_eq!(cpu.regs.get(3).unwrap(), 0x01);
    }

    #[test]
    fn test_jmpe_not_taken_when_unequal() {
        let mut cpu = cpu_with(&[
            movi(0, 0x01),
            Instruction::Cmp { lhs: 0, rhs: Operand::Immediate(0x02) },
            Instruction::Jmpe { target: 0, segment: Some(1) },
        ]);

        cpu.step().unwrap();
        cpu.step().unwrap();
        cpu.step().unwrap();

        assert_eq!(cpu.regs.ip, 6);
        assert_eq!(cpu.regs.cs(), 0);
    }

    #[test]
    fn test_jmpe_far_reads_segment_register() {
        let mut cpu = cpu_with(&[
            movi(0, 0x00),
            movi(1, 0x03),
            Instruction::Jmpe { target: 0, segment: Some(1) },
        ]);
        cpu.mem.load(0x03, 0x00, &encode(&HLT)).unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.regs.cs(), 0x03);
    }

    #[test]
    fn test_invalid_register_before_mutation() {
        // movr r6, $0x01
        let mut cpu = Cpu::new();
        cpu.load_program(&[0x36, 0x01]).unwrap();
        let before = cpu.regs.clone();

        let err = cpu.run().unwrap_err();

        assert_eq!(err, CpuError::InvalidRegister(RegisterError::InvalidRegister(6)));
        assert_eq!(cpu.regs.flags, before.flags);
        for i in 0..6 {
            assert_eq!(cpu.regs.get(i).unwrap(), before.get(i).unwrap());
        }
    }

    #[test]
    fn test_invalid_register_on_store_leaves_memory_alone() {
        let mut cpu = cpu_with(&[
            movi(0, 0x01),
            Instruction::Movm(MemAccess::Store { addr: 0, src: 9 }),
        ]);

        assert!(matches!(cpu.run(), Err(CpuError::InvalidRegister(_))));
        assert_eq!(cpu.mem.read(0x10, 0x01).unwrap(), 0);
    }

    #[test]
    fn test_segment_register_via_index() {
        let mut cpu = cpu_with(&[
            movi(DS, 0x20),
            movi(0, 0x01),
            movi(1, 0x99),
            Instruction::Movm(MemAccess::Store { addr: 0, src: 1 }),
            HLT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.mem.read(0x20, 0x01).unwrap(), 0x99);
        assert_eq!(cpu.regs.get(CS).unwrap(), 0x00);
    }

    #[test]
    fn test_out_of_bounds_fetch_faults() {
        let mut cpu = Cpu::with_memory(Memory::with_size(2));
        cpu.regs.ip = 2;

        let err = cpu.run().unwrap_err();

        assert!(matches!(err, CpuError::OutOfBounds(MemoryError::OutOfBounds { .. })));
    }

    #[test]
    fn test_out_of_bounds_data_access() {
        let mut cpu = Cpu::with_memory(Memory::with_size(64));
        cpu.load_program(&make_program(&[
            movi(0, 0x00),
            Instruction::Movm(MemAccess::Load { dst: 1, addr: 0 }),
            HLT,
        ]))
        .unwrap();

        // ds = 0x10 lies beyond 64 bytes
        assert!(matches!(cpu.run(), Err(CpuError::OutOfBounds(_))));
    }

    #[test]
    fn test_no_resumption_after_halt() {
        let mut cpu = cpu_with(&[HLT]);
        cpu.run().unwrap();

        assert_eq!(cpu.step(), Err(CpuError::NotRunning(CpuState::Halted)));
    }

    #[test]
    fn test_no_resumption_after_fault() {
        let mut cpu = Cpu::new();
        cpu.load_program(&[0x37, 0x00]).unwrap();
        assert!(cpu.run().is_err());

        assert_eq!(cpu.step(), Err(CpuError::NotRunning(CpuState::Faulted)));
    }

    #[test]
    fn test_run_limited() {
        // jmp r0 with r0 = 0 loops forever
        let mut cpu = cpu_with(&[Instruction::Jmp { target: 0, segment: None }]);

        let result = cpu.run_limited(100).unwrap();

        assert_eq!(result, None);
        assert_eq!(cpu.cycles, 100);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_with_config_entry_point() {
        let config = MachineConfig {
            load_segment: 0x02,
            load_offset: 0x04,
            ..MachineConfig::default()
        };
        let mut cpu = Cpu::with_config(&config);
        cpu.load_with_config(&config, &make_program(&[movi(0, 0x42), HLT])).unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(0).unwrap(), 0x42);
        assert_eq!(cpu.regs.cs(), 0x02);
    }

    #[test]
    fn test_last_instruction() {
        let mut cpu = cpu_with(&[movi(0, 1), HLT]);
        cpu.step().unwrap();
        assert_eq!(cpu.last_instruction(), Some(movi(0, 1)));
    }

    #[test]
    fn test_run_with_trace_logging_enabled() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut cpu = Cpu::new();
            cpu.load_program(&[0x31, 0x05, 0x73, 0xFF, 0xE0]).unwrap();
            assert!(cpu.run().is_ok());
            assert_eq!(cpu.regs.get(3).unwrap(), 0xFF);

            // add r3, $0x01 with r3 = 0xFF faults
            let mut cpu = Cpu::new();
            cpu.load_program(&[0x73, 0xFF, 0x73, 0x01]).unwrap();
            assert!(matches!(
                cpu.run(),
                Err(CpuError::ArithmeticOverflow { lhs: 0xFF, rhs: 0x01 })
            ));
        });
    }

    proptest! {
        #[test]
        fn cmp_registers_sets_unsigned_flags(a in any::<u8>(), b in any::<u8>()) {
            let mut cpu = cpu_with(&[
                movi(0, a),
                movi(1, b),
                Instruction::Cmp { lhs: 0, rhs: Operand::Register(1) },
                HLT,
            ]);

            let halt = cpu.run().unwrap();

            let expected = match a.cmp(&b) {
                std::cmp::Ordering::Equal => 0x00,
                std::cmp::Ordering::Less => 0xFF,
                std::cmp::Ordering::Greater => 0x01,
            };
            prop_assert_eq!(halt.flags.bits(), expected);
        }

        #[test]
        fn add_faults_exactly_when_sum_overflows(a in any::<u8>(), b in any::<u8>()) {
            let mut cpu = cpu_with(&[
                movi(0, a),
                Instruction::Add { dst: 0, src: Operand::Immediate(b) },
                HLT,
            ]);

            let result = cpu.run();

            if a as u16 + b as u16 > 0xFF {
                prop_assert_eq!(result, Err(CpuError::ArithmeticOverflow { lhs: a, rhs: b }));
            } else {
                prop_assert!(result.is_ok());
                prop_assert_eq!(cpu.regs.get(0).unwrap(), a + b);
            }
        }

        #[test]
        fn jmpe_only_moves_ip_on_equal(a in any::<u8>(), b in any::<u8>(), target in any::<u8>()) {
            let mut cpu = cpu_with(&[
                movi(0, a),
                Instruction::Cmp { lhs: 0, rhs: Operand::Immediate(b) },
                movi(2, target),
                Instruction::Jmpe { target: 2, segment: None },
            ]);
            for _ in 0..4 {
                cpu.step().unwrap();
            }

            let expected_ip = if a == b { target } else { 7 };
            prop_assert_eq!(cpu.regs.ip, expected_ip);
            prop_assert_eq!(cpu.regs.cs(), 0);
        }
    }
}
