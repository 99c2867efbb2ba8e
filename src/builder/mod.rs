//! Normalization of raw decodes into ISA-neutral instruction records.
//!
//! The builder resolves widths and signedness the backend left implicit,
//! checks that each decode has a shape the relations can represent, and
//! leaves operand interning to the single writer that owns the operand table.

mod arity;
mod width;

use serde::Serialize;

use crate::decoder::{DecodeFailure, OpcodeClass, PrefixFlags, RawInstruction, RawOperand};
use crate::operand::{FpImmediate, Immediate, MemoryRef, Operand, OperandId, OperandTable, OperandTableError, Register, Special};
use crate::{Address, Isa};

/// One decoded instruction whose operands reference the operand table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstructionRecord {
    pub address: Address,
    pub size: u8,
    pub isa: Isa,
    pub opcode: OpcodeClass,
    /// Operand identities in the ISA's canonical order
    pub operands: Vec<OperandId>,
    pub prefixes: PrefixFlags,
    /// False when the encoding decodes but is illegal in context
    pub valid: bool,
}

impl InstructionRecord {
    /// Address one past the last byte of this instruction
    pub fn end(&self) -> Address {
        self.address + self.size as Address
    }
}

/// A normalized instruction whose operands are not interned yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInstruction {
    pub address: Address,
    pub size: u8,
    pub isa: Isa,
    pub opcode: OpcodeClass,
    pub operands: Vec<Operand>,
    pub prefixes: PrefixFlags,
    pub valid: bool,
}

impl NormalizedInstruction {
    /// Intern every operand and produce the final record.
    pub fn intern_into(self, table: &mut OperandTable) -> Result<InstructionRecord, OperandTableError> {
        let mut operands = Vec::with_capacity(self.operands.len());
        for operand in self.operands {
            operands.push(table.intern(operand)?);
        }

        Ok(InstructionRecord {
            address: self.address,
            size: self.size,
            isa: self.isa,
            opcode: self.opcode,
            operands,
            prefixes: self.prefixes,
            valid: self.valid,
        })
    }
}

/// Turns raw decodes for one ISA into normalized instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionBuilder {
    isa: Isa,
}

impl InstructionBuilder {
    /// Create a new builder for `isa`
    pub fn new(isa: Isa) -> Self {
        Self { isa }
    }

    pub fn isa(&self) -> Isa {
        self.isa
    }

    /// Normalize one raw decode found at `address`.
    ///
    /// Only ever fails with [`DecodeFailure::Malformed`]: a decode that the
    /// backend reported as successful but whose shape breaks an invariant of
    /// the relations.
    pub fn normalize(&self, raw: RawInstruction, address: Address) -> Result<NormalizedInstruction, DecodeFailure> {
        self.check_shape(&raw)?;

        let RawInstruction {
            size,
            opcode,
            operands: raw_operands,
            prefixes,
            ..
        } = raw;

        let first_register = raw_operands.iter().find_map(|op| match op {
            RawOperand::Register { name, size } => Some(self.register_width(name, *size)),
            _ => None,
        });

        let mut operands = Vec::with_capacity(raw_operands.len());
        for raw_operand in raw_operands {
            operands.push(self.normalize_operand(raw_operand, &opcode, prefixes, first_register)?);
        }

        let valid = self.is_legal_in_context(prefixes, &operands);

        Ok(NormalizedInstruction {
            address,
            size,
            isa: self.isa,
            opcode,
            operands,
            prefixes,
            valid,
        })
    }

    fn check_shape(&self, raw: &RawInstruction) -> Result<(), DecodeFailure> {
        if raw.size == 0 {
            return Err(DecodeFailure::Malformed("zero-length decode".to_string()));
        }
        if raw.size as usize > self.isa.max_insn_len() {
            return Err(DecodeFailure::Malformed(format!(
                "{} bytes exceeds the {} maximum of {}",
                raw.size,
                self.isa,
                self.isa.max_insn_len()
            )));
        }

        let count = raw.operands.len();
        if count != raw.declared_operands {
            return Err(DecodeFailure::Malformed(format!(
                "'{}' declares {} operands but carries {}",
                raw.opcode.mnemonic, raw.declared_operands, count
            )));
        }
        if count > self.isa.max_operands() {
            return Err(DecodeFailure::Malformed(format!(
                "'{}' has {} operands, more than {} allows",
                raw.opcode.mnemonic, count, self.isa
            )));
        }
        if let Some(range) = arity::expected_arity(self.isa, &raw.opcode.name) {
            if !range.contains(&count) {
                return Err(DecodeFailure::Malformed(format!(
                    "'{}' takes {:?} operands, decoded with {}",
                    raw.opcode.name, range, count
                )));
            }
        }
        Ok(())
    }

    fn register_width(&self, name: &str, size: u8) -> u8 {
        if size > 0 {
            size
        } else {
            width::register_width(self.isa, name)
        }
    }

    fn legal_scale(&self, scale: i32) -> bool {
        if self.isa.is_x86() {
            matches!(scale, 1 | 2 | 4 | 8)
        } else {
            scale != 0 && scale.unsigned_abs().is_power_of_two()
        }
    }

    fn normalize_operand(
        &self,
        raw: RawOperand,
        opcode: &OpcodeClass,
        prefixes: PrefixFlags,
        first_register: Option<u8>,
    ) -> Result<Operand, DecodeFailure> {
        let operand = match raw {
            RawOperand::Register { name, size } => {
                if name.is_empty() {
                    return Err(DecodeFailure::Malformed(format!(
                        "'{}' has an unnamed register operand",
                        opcode.mnemonic
                    )));
                }
                let width = self.register_width(&name, size);
                Operand::Register(Register { name, width })
            }
            RawOperand::Immediate { value, size } => Operand::Immediate(Immediate {
                value,
                width: if size > 0 {
                    size
                } else {
                    width::default_immediate_width(self.isa, prefixes)
                },
                signed: !width::is_unsigned_immediate(self.isa, &opcode.name),
            }),
            RawOperand::FpImmediate { value } => Operand::FpImmediate(FpImmediate::new(value, 8)),
            RawOperand::Memory {
                segment,
                base,
                index,
                scale,
                displacement,
                size,
            } => {
                // scale only means something next to an index register
                let scale = if index.is_some() { scale } else { 1 };
                if !self.legal_scale(scale) {
                    return Err(DecodeFailure::Malformed(format!(
                        "'{}' has illegal scale {}",
                        opcode.mnemonic, scale
                    )));
                }
                let segment = if self.isa.is_x86() { segment } else { None };
                Operand::Memory(MemoryRef {
                    segment,
                    base,
                    index,
                    scale,
                    displacement,
                    width: if size > 0 {
                        size
                    } else {
                        width::access_width(self.isa, &opcode.name, first_register)
                    },
                })
            }
            RawOperand::Special { kind, text } => Operand::Special(Special {
                kind: kind.to_string(),
                text,
            }),
        };
        Ok(operand)
    }

    /// Encodings that decode but may not execute as written
    fn is_legal_in_context(&self, prefixes: PrefixFlags, operands: &[Operand]) -> bool {
        if self.isa.is_x86() && prefixes.contains(PrefixFlags::LOCK) {
            return operands.iter().any(|op| matches!(op, Operand::Memory(_)));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opcode(name: &str) -> OpcodeClass {
        OpcodeClass::new(1, name, name)
    }

    fn reg(name: &str, size: u8) -> RawOperand {
        RawOperand::Register {
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn test_normalize_x86() {
        let builder = InstructionBuilder::new(Isa::X86_64);
        let raw = RawInstruction::new(
            3,
            opcode("add"),
            vec![reg("eax", 4), RawOperand::Immediate { value: -1, size: 1 }],
        );

        let insn = builder.normalize(raw, 0x1000).unwrap();
        assert_eq!(insn.address, 0x1000);
        assert_eq!(insn.operands[0], Operand::register("eax", 4));
        assert_eq!(insn.operands[1], Operand::immediate(-1, 1, true));
        assert!(insn.valid);
    }

    #[test]
    fn test_implicit_widths_resolved() {
        let builder = InstructionBuilder::new(Isa::Mips32);
        let raw = RawInstruction::new(
            4,
            opcode("lbu"),
            vec![
                reg("t0", 0),
                RawOperand::Memory {
                    segment: None,
                    base: Some("sp".to_string()),
                    index: None,
                    scale: 1,
                    displacement: 16,
                    size: 0,
                },
            ],
        );

        let insn = builder.normalize(raw, 0x400000).unwrap();
        assert_eq!(insn.operands[0], Operand::register("t0", 4));
        match &insn.operands[1] {
            Operand::Memory(mem) => assert_eq!(mem.width, 1),
            other => panic!("expected memory operand, got {:?}", other),
        }
    }

    #[test]
    fn test_unsigned_immediate() {
        let builder = InstructionBuilder::new(Isa::Mips32);
        let raw = RawInstruction::new(
            4,
            opcode("ori"),
            vec![reg("t0", 0), reg("zero", 0), RawOperand::Immediate { value: 0xffff, size: 0 }],
        );

        let insn = builder.normalize(raw, 0).unwrap();
        assert_eq!(insn.operands[2], Operand::immediate(0xffff, 4, false));
    }

    #[test]
    fn test_declared_count_mismatch_is_malformed() {
        let builder = InstructionBuilder::new(Isa::X86_64);
        let raw = RawInstruction::new(2, opcode("add"), vec![reg("eax", 4)]).with_declared(2);

        let err = builder.normalize(raw, 0x1000).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_arity_mismatch_is_malformed() {
        let builder = InstructionBuilder::new(Isa::X86_64);
        let raw = RawInstruction::new(1, opcode("push"), vec![]);
        assert!(matches!(builder.normalize(raw, 0), Err(DecodeFailure::Malformed(_))));
    }

    #[test]
    fn test_empty_register_is_malformed() {
        let builder = InstructionBuilder::new(Isa::AArch64);
        let raw = RawInstruction::new(4, opcode("mov"), vec![reg("", 0), reg("x1", 0)]);
        assert!(matches!(builder.normalize(raw, 0), Err(DecodeFailure::Malformed(_))));
    }

    #[test]
    fn test_illegal_scale_is_malformed() {
        let builder = InstructionBuilder::new(Isa::X86_32);
        let raw = RawInstruction::new(
            3,
            opcode("mov"),
            vec![
                reg("eax", 4),
                RawOperand::Memory {
                    segment: None,
                    base: Some("ebx".to_string()),
                    index: Some("ecx".to_string()),
                    scale: 3,
                    displacement: 0,
                    size: 4,
                },
            ],
        );
        assert!(matches!(builder.normalize(raw, 0), Err(DecodeFailure::Malformed(_))));
    }

    #[test]
    fn test_lock_without_memory_is_invalid() {
        let builder = InstructionBuilder::new(Isa::X86_64);
        let raw = RawInstruction::new(3, opcode("add"), vec![reg("eax", 4), reg("ebx", 4)])
            .with_prefixes(PrefixFlags::LOCK);

        let insn = builder.normalize(raw, 0x1000).unwrap();
        assert!(!insn.valid);
    }

    #[test]
    fn test_intern_into_shares_ids() {
        let builder = InstructionBuilder::new(Isa::X86_32);
        let mut table = OperandTable::new();

        let push = builder
            .normalize(RawInstruction::new(1, opcode("push"), vec![reg("eax", 4)]), 0x1000)
            .unwrap()
            .intern_into(&mut table)
            .unwrap();
        let inc = builder
            .normalize(RawInstruction::new(1, opcode("inc"), vec![reg("eax", 4)]), 0x1001)
            .unwrap()
            .intern_into(&mut table)
            .unwrap();

        assert_eq!(push.operands, inc.operands);
        assert_eq!(table.len(), 1);
        assert_eq!(push.end(), 0x1001);
    }
}
