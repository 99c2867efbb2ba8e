use capstone::arch::x86::{X86Operand, X86OperandType};
use capstone::arch::{ArchDetail, DetailsArchInsn};
use capstone::{Capstone, Insn, InsnDetail};

use super::{opcode_class, operand_reg_name, reg_name, Backend, DecodeFailure, PrefixFlags, RawInstruction, RawOperand};
use crate::{Address, ByteView};

/// x86-32 and x86-64 decoder.
#[derive(Debug, Clone)]
pub struct X86Decoder {
    pub(crate) backend: Backend,
}

impl X86Decoder {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub(crate) fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure> {
        self.backend.decode(view, at, lower)
    }
}

fn lower(cs: &Capstone, insn: &Insn<'_>, detail: &InsnDetail<'_>) -> Result<RawInstruction, DecodeFailure> {
    let x86 = match detail.arch_detail() {
        ArchDetail::X86Detail(x86) => x86,
        _ => return Err(DecodeFailure::UnsupportedFeature("missing x86 operand detail".to_string())),
    };
    let opcode = opcode_class(cs, insn);
    let prefixes = PrefixFlags::from_x86(x86.prefix(), x86.rex());

    let declared: Vec<X86Operand> = x86.operands().collect();
    let declared_operands = declared.len();
    let mut operands = Vec::with_capacity(declared_operands);

    for op in declared {
        let size = op.size;
        let raw = match op.op_type {
            X86OperandType::Reg(reg) => RawOperand::Register {
                name: operand_reg_name(cs, reg, &opcode)?,
                size,
            },
            X86OperandType::Imm(value) => RawOperand::Immediate { value, size },
            X86OperandType::Mem(mem) => RawOperand::Memory {
                segment: reg_name(cs, mem.segment()),
                base: reg_name(cs, mem.base()),
                index: reg_name(cs, mem.index()),
                scale: mem.scale(),
                displacement: mem.disp(),
                size,
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

    Ok(RawInstruction {
        size: insn.bytes().len() as u8,
        opcode,
        operands,
        declared_operands,
        prefixes,
    })
}
