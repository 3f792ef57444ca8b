//! Disassembler.
//!
//! Converts raw program bytes back to readable assembly.

use crate::cpu::decode::{decode, instruction_length, Instruction, MemAccess, Operand};
use std::fmt;

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "r{}", r),
            Operand::Immediate(imm) => write!(f, "$0x{:02X}", imm),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.opcode().mnemonic();
        match self {
            Instruction::Jmp { target, segment: None }
            | Instruction::Jmpe { target, segment: None } => write!(f, "{} r{}", mnemonic, target),
            Instruction::Jmp { target, segment: Some(seg) } => {
                write!(f, "{} $0x{:02X}:r{}", mnemonic, seg, target)
            }
            Instruction::Jmpe { target, segment: Some(seg) } => {
                write!(f, "{} r{}:r{}", mnemonic, seg, target)
            }
            Instruction::Movr { dst, src }
            | Instruction::Add { dst, src }
            | Instruction::Xor { dst, src }
            | Instruction::Cmp { lhs: dst, rhs: src } => write!(f, "{} r{}, {}", mnemonic, dst, src),
            Instruction::Movm(MemAccess::Load { dst, addr }) => {
                write!(f, "{} r{}, [ds:r{}]", mnemonic, dst, addr)
            }
            Instruction::Movm(MemAccess::Store { addr, src }) => {
                write!(f, "{} [ds:r{}], r{}", mnemonic, addr, src)
            }
            Instruction::Hlt { operand: None } => f.write_str(mnemonic),
            Instruction::Hlt { operand: Some(byte) } => write!(f, "{} $0x{:02X}", mnemonic, byte),
        }
    }
}

/// Disassemble the instruction at the start of `bytes`.
///
/// Returns the text and the number of bytes consumed, or `None` for an
/// empty slice. A two-byte form cut off by the end of the slice renders
/// as a `.byte` directive.
pub fn disassemble_instruction(bytes: &[u8]) -> Option<(String, usize)> {
    let byte1 = *bytes.first()?;
    let len = instruction_length(byte1) as usize;
    if len > bytes.len() {
        return Some((format!(".byte 0x{:02X}", byte1), 1));
    }

    let byte2 = bytes.get(1).copied().unwrap_or(0);
    match decode(byte1, byte2) {
        Ok(instr) => Some((instr.to_string(), len)),
        Err(_) => Some((format!(".byte 0x{:02X}", byte1), 1)),
    }
}

/// Disassemble a program image into a listing.
///
/// `origin` is the flat address of the first byte.
pub fn disassemble(bytes: &[u8], origin: usize) -> String {
    let mut output = String::new();
    output.push_str("; Disassembly\n");
    output.push_str("; -----------\n\n");

    let mut pos = 0;
    while let Some((text, len)) = disassemble_instruction(&bytes[pos..]) {
        let raw: Vec<String> = bytes[pos..pos + len]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect();
        output.push_str(&format!("{:04X}:  {:<6} {}\n", origin + pos, raw.join(" "), text));
        pos += len;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;

    #[test]
    fn test_display_forms() {
        let cases = [
            (Instruction::Movr { dst: 0, src: Operand::Immediate(5) }, "movr r0, $0x05"),
            (Instruction::Movr { dst: 1, src: Operand::Register(2) }, "movr r1, r2"),
            (Instruction::Jmp { target: 1, segment: None }, "jmp r1"),
            (Instruction::Jmp { target: 1, segment: Some(0x02) }, "jmp $0x02:r1"),
            (Instruction::Movm(MemAccess::Load { dst: 0, addr: 1 }), "movm r0, [ds:r1]"),
            (Instruction::Movm(MemAccess::Store { addr: 0, src: 1 }), "movm [ds:r0], r1"),
            (Instruction::Add { dst: 3, src: Operand::Immediate(0xFF) }, "add r3, $0xFF"),
            (Instruction::Xor { dst: 2, src: Operand::Register(2) }, "xor r2, r2"),
            (Instruction::Cmp { lhs: 0, rhs: Operand::Register(1) }, "cmp r0, r1"),
            (Instruction::Jmpe { target: 1, segment: Some(2) }, "jmpe r2:r1"),
            (Instruction::Hlt { operand: None }, "hlt"),
            (Instruction::Hlt { operand: Some(0x2A) }, "hlt $0x2A"),
        ];

        for (instr, text) in cases {
            assert_eq!(instr.to_string(), text);
        }
    }

    #[test]
    fn test_disassemble_instruction_lengths() {
        let jmp = encode(&Instruction::Jmp { target: 1, segment: None });
        assert_eq!(disassemble_instruction(&jmp), Some(("jmp r1".to_string(), 1)));

        assert_eq!(disassemble_instruction(&[0x31, 0x05, 0xE0]).unwrap().1, 2);
        assert_eq!(disassemble_instruction(&[]), None);
    }

    #[test]
    fn test_truncated_instruction() {
        let (text, len) = disassemble_instruction(&[0x31]).unwrap();
        assert_eq!(text, ".byte 0x31");
        assert_eq!(len, 1);
    }

    #[test]
    fn test_listing() {
        let listing = disassemble(&[0x31, 0x05, 0xE0], 0x20);
        assert!(listing.contains("0020:  31 05  movr r1, $0x05"));
        assert!(listing.contains("0022:  E0     hlt"));
    }
}
