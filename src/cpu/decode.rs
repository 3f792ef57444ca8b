//! Instruction decoder.
//!
//! Every instruction starts with one byte laid out as:
//!
//! ```text
//!   7 6 5   4    3 2 1 0
//!  [opcode][mode][operand1]
//! ```
//!
//! and may be followed by a second byte, `operand2`. Operand1 is always a
//! register index. The mode bit selects how operand2 is read: clear means
//! a register index, set means an immediate value or target segment.
//!
//! `jmp`, `jmpe` and `hlt` with the mode bit clear are one byte long; every
//! other encoding is two bytes.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Mask of the mode bit in the first instruction byte.
pub const MODE_BIT: u8 = 0x10;

/// Mask of operand1 in the first instruction byte.
pub const OPERAND1_MASK: u8 = 0x0F;

/// The eight opcodes, numbered as they appear in the top three bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Jmp = 0,
    Movr = 1,
    Movm = 2,
    Add = 3,
    Xor = 4,
    Cmp = 5,
    Jmpe = 6,
    Hlt = 7,
}

impl Opcode {
    /// Map a 3-bit opcode value to its opcode.
    pub fn from_bits(bits: u8) -> Result<Self, DecodeError> {
        let opcode = match bits {
            0 => Opcode::Jmp,
            1 => Opcode::Movr,
            2 => Opcode::Movm,
            3 => Opcode::Add,
            4 => Opcode::Xor,
            5 => Opcode::Cmp,
            6 => Opcode::Jmpe,
            7 => Opcode::Hlt,
            _ => return Err(DecodeError::InvalidOpcode(bits)),
        };
        Ok(opcode)
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Opcodes that drop operand2 when the mode bit is clear.
    pub fn is_short_form(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jmpe | Opcode::Hlt)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Jmp => "jmp",
            Opcode::Movr => "movr",
            Opcode::Movm => "movm",
            Opcode::Add => "add",
            Opcode::Xor => "xor",
            Opcode::Cmp => "cmp",
            Opcode::Jmpe => "jmpe",
            Opcode::Hlt => "hlt",
        }
    }
}

/// Second operand of the register/immediate instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Mode 0: a register index.
    Register(u8),
    /// Mode 1: the byte itself.
    Immediate(u8),
}

impl Operand {
    fn from_mode(mode: bool, byte: u8) -> Self {
        if mode {
            Operand::Immediate(byte)
        } else {
            Operand::Register(byte)
        }
    }

    fn encode(self) -> (bool, u8) {
        match self {
            Operand::Register(r) => (false, r),
            Operand::Immediate(imm) => (true, imm),
        }
    }
}

/// Direction of a `movm` transfer. Both forms address memory at `ds:reg[addr]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemAccess {
    /// Mode 0: `reg[dst] <- mem[ds:reg[addr]]`
    Load { dst: u8, addr: u8 },
    /// Mode 1: `mem[ds:reg[addr]] <- reg[src]`
    Store { addr: u8, src: u8 },
}

/// A decoded instruction.
///
/// Register fields hold raw indices. They are validated when the
/// instruction executes, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// `ip <- reg[target]`, and with mode 1 also `cs <- segment` (immediate).
    Jmp { target: u8, segment: Option<u8> },

    /// `reg[dst] <- src`
    Movr { dst: u8, src: Operand },

    /// Load from or store to the data segment.
    Movm(MemAccess),

    /// `reg[dst] <- reg[dst] + src`, faulting on overflow.
    Add { dst: u8, src: Operand },

    /// `reg[dst] <- reg[dst] ^ src`
    Xor { dst: u8, src: Operand },

    /// `flags <- compare(reg[lhs], rhs)`
    Cmp { lhs: u8, rhs: Operand },

    /// If flags == Equal: `ip <- reg[target]`, and with mode 1 also
    /// `cs <- reg[segment]` (a register index, unlike `jmp`).
    Jmpe { target: u8, segment: Option<u8> },

    /// Stop the machine. The mode 1 form carries an ignored second byte.
    Hlt { operand: Option<u8> },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Jmp { .. } => Opcode::Jmp,
            Instruction::Movr { .. } => Opcode::Movr,
            Instruction::Movm(_) => Opcode::Movm,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Xor { .. } => Opcode::Xor,
            Instruction::Cmp { .. } => Opcode::Cmp,
            Instruction::Jmpe { .. } => Opcode::Jmpe,
            Instruction::Hlt { .. } => Opcode::Hlt,
        }
    }

    /// Encoded length in bytes (1 or 2).
    pub fn len(&self) -> u8 {
        match self {
            Instruction::Jmp { segment: None, .. }
            | Instruction::Jmpe { segment: None, .. }
            | Instruction::Hlt { operand: None } => 1,
            _ => 2,
        }
    }
}

/// Number of bytes an instruction starting with `byte1` occupies.
pub fn instruction_length(byte1: u8) -> u8 {
    let short = byte1 & MODE_BIT == 0
        && matches!(Opcode::from_bits(byte1 >> 5), Ok(op) if op.is_short_form());
    if short {
        1
    } else {
        2
    }
}

/// Decode an instruction from its first byte and the byte that follows it.
///
/// `byte2` is ignored by the one-byte forms.
pub fn decode(byte1: u8, byte2: u8) -> Result<Instruction, DecodeError> {
    let opcode = Opcode::from_bits(byte1 >> 5)?;
    let mode = byte1 & MODE_BIT != 0;
    let op1 = byte1 & OPERAND1_MASK;
    let op2 = byte2;

    let instruction = match opcode {
        Opcode::Jmp => Instruction::Jmp {
            target: op1,
            segment: mode.then_some(op2),
        },
        Opcode::Movr => Instruction::Movr {
            dst: op1,
            src: Operand::from_mode(mode, op2),
        },
        Opcode::Movm => {
            if mode {
                Instruction::Movm(MemAccess::Store { addr: op1, src: op2 })
            } else {
                Instruction::Movm(MemAccess::Load { dst: op1, addr: op2 })
            }
        }
        Opcode::Add => Instruction::Add {
            dst: op1,
            src: Operand::from_mode(mode, op2),
        },
        Opcode::Xor => Instruction::Xor {
            dst: op1,
            src: Operand::from_mode(mode, op2),
        },
        Opcode::Cmp => Instruction::Cmp {
            lhs: op1,
            rhs: Operand::from_mode(mode, op2),
        },
        Opcode::Jmpe => Instruction::Jmpe {
            target: op1,
            segment: mode.then_some(op2),
        },
        Opcode::Hlt => Instruction::Hlt {
            operand: mode.then_some(op2),
        },
    };

    Ok(instruction)
}

/// Encode an instruction back to its bytes.
///
/// Operand1 is truncated to its four encodable bits.
pub fn encode(instr: &Instruction) -> Vec<u8> {
    let (op1, mode, op2): (u8, bool, Option<u8>) = match *instr {
        Instruction::Jmp { target, segment } => (target, segment.is_some(), segment),
        Instruction::Movr { dst, src } => {
            let (mode, op2) = src.encode();
            (dst, mode, Some(op2))
        }
        Instruction::Movm(MemAccess::Load { dst, addr }) => (dst, false, Some(addr)),
        Instruction::Movm(MemAccess::Store { addr, src }) => (addr, true, Some(src)),
        Instruction::Add { dst, src } => {
            let (mode, op2) = src.encode();
            (dst, mode, Some(op2))
        }
        Instruction::Xor { dst, src } => {
            let (mode, op2) = src.encode();
            (dst, mode, Some(op2))
        }
        Instruction::Cmp { lhs, rhs } => {
            let (mode, op2) = rhs.encode();
            (lhs, mode, Some(op2))
        }
        Instruction::Jmpe { target, segment } => (target, segment.is_some(), segment),
        Instruction::Hlt { operand } => (0, operand.is_some(), operand),
    };

    let mut byte1 = (instr.opcode().bits() << 5) | (op1 & OPERAND1_MASK);
    if mode {
        byte1 |= MODE_BIT;
    }

    match op2 {
        Some(op2) => vec![byte1, op2],
        None => vec![byte1],
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_movr_immediate() {
        // movr r1, $0x05
        let instr = decode(0x31, 0x05).unwrap();
        assert_eq!(instr, Instruction::Movr { dst: 1, src: Operand::Immediate(0x05) });
        assert_eq!(instr.len(), 2);
    }

    #[test]
    fn test_decode_field_extraction() {
        // opcode 3 (add), mode 0, operand1 2, operand2 3
        let instr = decode(0x62, 0x03).unwrap();
        assert_eq!(instr, Instruction::Add { dst: 2, src: Operand::Register(3) });
    }

    #[test]
    fn test_decode_hlt() {
        let instr = decode(0xE0, 0x00).unwrap();
        assert_eq!(instr, Instruction::Hlt { operand: None });
        assert_eq!(instr.len(), 1);
    }

    #[test]
    fn test_decode_jumps() {
        assert_eq!(
            decode(0x01, 0xAA).unwrap(),
            Instruction::Jmp { target: 1, segment: None }
        );
        assert_eq!(
            decode(0x11, 0x02).unwrap(),
            Instruction::Jmp { target: 1, segment: Some(0x02) }
        );
        assert_eq!(
            decode(0xD1, 0x02).unwrap(),
            Instruction::Jmpe { target: 1, segment: Some(0x02) }
        );
    }

    #[test]
    fn test_decode_movm_directions() {
        assert_eq!(
            decode(0x40, 0x01).unwrap(),
            Instruction::Movm(MemAccess::Load { dst: 0, addr: 1 })
        );
        assert_eq!(
            decode(0x50, 0x01).unwrap(),
            Instruction::Movm(MemAccess::Store { addr: 0, src: 1 })
        );
    }

    #[test]
    fn test_operand1_out_of_register_space_still_decodes() {
        // movr r6, $0x01: the bad index is caught at execution time.
        let instr = decode(0x36, 0x01).unwrap();
        assert_eq!(instr, Instruction::Movr { dst: 6, src: Operand::Immediate(1) });
    }

    #[test]
    fn test_opcode_from_bits() {
        assert_eq!(Opcode::from_bits(7).unwrap(), Opcode::Hlt);
        assert_eq!(Opcode::from_bits(8), Err(DecodeError::InvalidOpcode(8)));
    }

    #[test]
    fn test_encode_examples() {
        assert_eq!(
            encode(&Instruction::Movr { dst: 1, src: Operand::Immediate(5) }),
            vec![0x31, 0x05]
        );
        assert_eq!(encode(&Instruction::Hlt { operand: None }), vec![0xE0]);
        assert_eq!(
            encode(&Instruction::Jmpe { target: 1, segment: None }),
            vec![0xC1]
        );
        assert_eq!(
            encode(&Instruction::Movm(MemAccess::Store { addr: 2, src: 3 })),
            vec![0x52, 0x03]
        );
    }

    proptest! {
        #[test]
        fn length_rule(byte1 in any::<u8>(), byte2 in any::<u8>()) {
            let opcode = byte1 >> 5;
            let mode = byte1 & MODE_BIT != 0;
            let expected = if !mode && (opcode == 0 || opcode == 6 || opcode == 7) { 1 } else { 2 };

            prop_assert_eq!(instruction_length(byte1), expected);
            prop_assert_eq!(decode(byte1, byte2).unwrap().len(), expected);
        }

        #[test]
        fn decode_never_fails_on_three_bit_opcodes(byte1 in any::<u8>(), byte2 in any::<u8>()) {
            let instr = decode(byte1, byte2).unwrap();
            prop_assert_eq!(instr.opcode().bits(), byte1 >> 5);
        }

        #[test]
        fn encode_reproduces_consumed_bytes(byte1 in any::<u8>(), byte2 in any::<u8>()) {
            // hlt drops its operand1 bits, so compare it on the opcode/mode bits only.
            let instr = decode(byte1, byte2).unwrap();
            let bytes = encode(&instr);
            prop_assert_eq!(bytes.len(), instr.len() as usize);
            if instr.opcode() == Opcode::Hlt {
                prop_assert_eq!(bytes[0], byte1 & 0xF0);
            } else {
                prop_assert_eq!(bytes[0], byte1);
            }
            if bytes.len() == 2 {
                prop_assert_eq!(bytes[1], byte2);
            }
        }
    }
}
