//! Simple assembler.
//!
//! Syntax mirrors the disassembler output:
//! ```text
//! ; Comment
//!         movr r0, $0x05      ; immediate
//!         movr r1, r0         ; register
//! loop:   add r1, $1
//!         cmp r1, $0x0A
//!         movr r2, $done      ; label value (ip of the label)
//!         jmpe r2
//!         movr r3, $loop
//!         jmp r3
//! done:   movm [ds:r0], r1    ; store
//!         movm r2, [ds:r0]    ; load
//!         jmp $0x02:r0        ; far jump, immediate segment
//!         jmpe r3:r0          ; far conditional jump, segment in r3
//!         hlt
//!         hlt $0x07           ; two-byte form
//!
//!         .org 0x20           ; pad with zeros up to offset 0x20
//!         .byte 0x01, 2, $loop
//! ```
//!
//! Registers are `r0`-`r15` (the encodable range) with `cs` and `ds` as
//! aliases for `r4` and `r5`.
//!
//! Label values and `.org` targets are offsets within the code segment, so
//! they depend on where the image is loaded. [`assemble_at`] takes that load
//! offset; [`assemble`] assumes the image starts at offset 0.

use crate::cpu::decode::{encode, Instruction, MemAccess, Operand};
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to raw program bytes.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblerError> {
    assemble_at(source, 0)
}

/// Assemble an image that will be loaded at `origin` within cs.
pub fn assemble_at(source: &str, origin: u8) -> Result<Vec<u8>, AssemblerError> {
    let mut asm = Assembler::new(origin);
    asm.assemble(source)
}

/// The assembler state.
struct Assembler {
    /// Offset of the first output byte within cs.
    origin: usize,
    /// Symbol table (label -> offset within cs).
    symbols: HashMap<String, usize>,
    /// Pending references: (output index, label, source line).
    pending: Vec<(usize, String, usize)>,
    /// Output bytes; the current offset is `output.len()`.
    output: Vec<u8>,
}

impl Assembler {
    fn new(origin: u8) -> Self {
        Self {
            origin: origin as usize,
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u8>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve forward references
        self.resolve_references()?;

        tracing::debug!(
            bytes = self.output.len(),
            labels = self.symbols.len(),
            origin = self.origin,
            "assembled"
        );
        Ok(std::mem::take(&mut self.output))
    }

    /// Offset within cs of the next output byte.
    fn here(&self) -> usize {
        self.origin + self.output.len()
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Remove comments
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let mut line = line.trim();

        if line.is_empty() {
            return Ok(());
        }

        // Label definition: a leading `name:` token
        let first = line.split_whitespace().next().unwrap_or("");
        if let Some(label) = first.strip_suffix(':') {
            if !is_identifier(label) {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("invalid label name '{}'", label),
                });
            }
            let label = label.to_lowercase();
            if self.symbols.insert(label.clone(), self.here()).is_some() {
                return Err(AssemblerError::DuplicateLabel { line: line_num, label });
            }
            line = line[first.len()..].trim();
            if line.is_empty() {
                return Ok(());
            }
        }

        self.process_statement(line, line_num)
    }

    fn process_statement(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };
        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        match mnemonic.as_str() {
            // Directives
            ".org" => {
                let [target] = expect_operands::<1>(&operands, &mnemonic, line_num)?;
                let target = parse_number(target, line_num)? as usize;
                if target < self.here() {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!(".org 0x{:X} moves backwards", target),
                    });
                }
                self.output.resize(target - self.origin, 0);
            }

            ".byte" | ".db" => {
                if operands.is_empty() {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: ".byte requires at least one value".into(),
                    });
                }
                for value in operands {
                    let index = self.output.len();
                    let value = self.parse_value(value, index, line_num)?;
                    self.output.push(value);
                }
            }

            // Instructions
            _ => {
                let instr = self.parse_instruction(&mnemonic, &operands, line_num)?;
                self.output.extend(encode(&instr));
            }
        }

        Ok(())
    }

    fn parse_instruction(&mut self, mnemonic: &str, operands: &[&str], line_num: usize)
        -> Result<Instruction, AssemblerError>
    {
        // operand2 always lands in the byte after the opcode byte
        let op2_index = self.output.len() + 1;

        let instr = match mnemonic {
            "jmp" => {
                let [target] = expect_operands::<1>(operands, mnemonic, line_num)?;
                match target.split_once(':') {
                    Some((segment, target)) => {
                        let segment = segment.trim().strip_prefix('$').ok_or_else(|| {
                            AssemblerError::SyntaxError {
                                line: line_num,
                                message: "jmp segment must be an immediate ($seg:rN)".into(),
                            }
                        })?;
                        Instruction::Jmp {
                            target: parse_register(target.trim(), line_num)?,
                            segment: Some(self.parse_value_bare(segment, op2_index, line_num)?),
                        }
                    }
                    None => Instruction::Jmp {
                        target: parse_register(target, line_num)?,
                        segment: None,
                    },
                }
            }

            "jmpe" => {
                let [target] = expect_operands::<1>(operands, mnemonic, line_num)?;
                match target.split_once(':') {
                    Some((segment, target)) => Instruction::Jmpe {
                        target: parse_register(target.trim(), line_num)?,
                        segment: Some(parse_register(segment.trim(), line_num)?),
                    },
                    None => Instruction::Jmpe {
                        target: parse_register(target, line_num)?,
                        segment: None,
                    },
                }
            }

            "movr" | "add" | "xor" | "cmp" => {
                let [reg, src] = expect_operands::<2>(operands, mnemonic, line_num)?;
                let reg = parse_register(reg, line_num)?;
                let src = self.parse_operand(src, op2_index, line_num)?;
                match mnemonic {
                    "movr" => Instruction::Movr { dst: reg, src },
                    "add" => Instruction::Add { dst: reg, src },
                    "xor" => Instruction::Xor { dst: reg, src },
                    _ => Instruction::Cmp { lhs: reg, rhs: src },
                }
            }

            "movm" => {
                let [first, second] = expect_operands::<2>(operands, mnemonic, line_num)?;
                if let Some(addr) = parse_memory_ref(first) {
                    Instruction::Movm(MemAccess::Store {
                        addr: parse_register(addr, line_num)?,
                        src: parse_register(second, line_num)?,
                    })
                } else if let Some(addr) = parse_memory_ref(second) {
                    Instruction::Movm(MemAccess::Load {
                        dst: parse_register(first, line_num)?,
                        addr: parse_register(addr, line_num)?,
                    })
                } else {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: "movm needs one [ds:rN] operand".into(),
                    });
                }
            }

            "hlt" => match operands {
                [] => Instruction::Hlt { operand: None },
                [operand] => Instruction::Hlt {
                    operand: Some(self.parse_value(operand, op2_index, line_num)?),
                },
                _ => return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("hlt takes at most 1 operand, found {}", operands.len()),
                }),
            },

            _ => return Err(AssemblerError::UnknownMnemonic {
                line: line_num,
                mnemonic: mnemonic.to_string(),
            }),
        };

        Ok(instr)
    }

    /// Parse `rN` or `$value`.
    fn parse_operand(&mut self, operand: &str, index: usize, line_num: usize)
        -> Result<Operand, AssemblerError>
    {
        if operand.starts_with('$') {
            Ok(Operand::Immediate(self.parse_value(operand, index, line_num)?))
        } else {
            Ok(Operand::Register(parse_register(operand, line_num)?))
        }
    }

    /// Parse a `$`-prefixed immediate, or a bare number/label in `.byte`.
    fn parse_value(&mut self, operand: &str, index: usize, line_num: usize) -> Result<u8, AssemblerError> {
        let operand = operand.strip_prefix('$').unwrap_or(operand);
        self.parse_value_bare(operand, index, line_num)
    }

    fn parse_value_bare(&mut self, operand: &str, index: usize, line_num: usize) -> Result<u8, AssemblerError> {
        let operand = operand.trim();
        if operand.starts_with(|c: char| c.is_ascii_digit()) {
            return parse_number(operand, line_num);
        }

        if !is_identifier(operand) {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid value '{}'", operand),
            });
        }

        // Label reference - patched in pass 2
        self.pending.push((index, operand.to_lowercase(), line_num));
        Ok(0)
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (index, label, line_num) in &self.pending {
            let offset = *self.symbols.get(label)
                .ok_or_else(|| AssemblerError::UndefinedLabel {
                    line: *line_num,
                    label: label.clone(),
                })?;

            let value = u8::try_from(offset).map_err(|_| AssemblerError::ValueOutOfRange {
                line: *line_num,
                value: offset as i64,
            })?;
            self.output[*index] = value;
        }
        Ok(())
    }
}

/// Split operands into exactly `N` parts.
fn expect_operands<'a, const N: usize>(operands: &[&'a str], mnemonic: &str, line_num: usize)
    -> Result<[&'a str; N], AssemblerError>
{
    <[&str; N]>::try_from(operands).map_err(|_| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("{} takes {} operand(s), found {}", mnemonic, N, operands.len()),
    })
}

/// Parse a register name: `r0`-`r15`, `cs` or `ds`.
fn parse_register(name: &str, line_num: usize) -> Result<u8, AssemblerError> {
    let lower = name.trim().to_lowercase();
    let index = match lower.as_str() {
        "cs" => Some(crate::cpu::registers::CS),
        "ds" => Some(crate::cpu::registers::DS),
        other => other
            .strip_prefix('r')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| *n <= 0x0F),
    };

    index.ok_or_else(|| AssemblerError::InvalidRegister {
        line: line_num,
        name: name.trim().to_string(),
    })
}

/// Extract `rN` from `[ds:rN]`.
fn parse_memory_ref(operand: &str) -> Option<&str> {
    let inner = operand.strip_prefix('[')?.strip_suffix(']')?.trim();
    let (segment, reg) = inner.split_once(':')?;
    segment.trim().eq_ignore_ascii_case("ds").then(|| reg.trim())
}

/// Parse a decimal or `0x` hex byte.
fn parse_number(text: &str, line_num: usize) -> Result<u8, AssemblerError> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse::<i64>(),
    };

    let value = parsed.map_err(|_| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("invalid number '{}'", text),
    })?;

    u8::try_from(value).map_err(|_| AssemblerError::ValueOutOfRange { line: line_num, value })
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("invalid register on line {line}: {name}")]
    InvalidRegister { line: usize, name: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },
}
