use capstone::arch::mips::MipsOperand;
use capstone::arch::{ArchDetail, DetailsArchInsn};
use capstone::{Capstone, Insn, InsnDetail};

use super::{opcode_class, operand_reg_name, reg_name, Backend, DecodeFailure, RawInstruction, RawOperand};
use crate::{Address, ByteView};

/// MIPS32/MIPS64 decoder, optionally with microMIPS encodings.
#[derive(Debug, Clone)]
pub struct MipsDecoder {
    pub(crate) backend: Backend,
}

impl MipsDecoder {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub(crate) fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure> {
        self.backend.decode(view, at, lower)
    }
}

fn lower(cs: &Capstone, insn: &Insn<'_>, detail: &InsnDetail<'_>) -> Result<RawInstruction, DecodeFailure> {
    let mips = match detail.arch_detail() {
        ArchDetail::MipsDetail(mips) => mips,
        _ => return Err(DecodeFailure::UnsupportedFeature("missing MIPS operand detail".to_string())),
    };
    let opcode = opcode_class(cs, insn);

    let declared: Vec<MipsOperand> = mips.operands().collect();
    let declared_operands = declared.len();
    let mut operands = Vec::with_capacity(declared_operands);

    for op in declared {
        let raw = match op {
            MipsOperand::Reg(reg) => RawOperand::Register {
                name: operand_reg_name(cs, reg, &opcode)?,
                size: 0,
            },
            MipsOperand::Imm(value) => RawOperand::Immediate { value, size: 0 },
            MipsOperand::Mem(mem) => RawOperand::Memory {
                segment: None,
                base: reg_name(cs, mem.base()),
                index: None,
                scale: 1,
                displacement: mem.disp() as i64,
                size: 0,
            },
            _ => {
                return Err(DecodeFailure::UnsupportedFeature(format!(
                    "unmodeled operand in '{}'",
                    opcode.mnemonic
                )))
            }
        };
        operands.push(raw);
    }

    Ok(RawInstruction::new(insn.bytes().len() as u8, opcode, operands).with_declared(declared_operands))
}
