use capstone::arch::riscv::RiscVOperand;
use capstone::arch::{ArchDetail, DetailsArchInsn};
use capstone::{Capstone, Insn, InsnDetail};

use super::{opcode_class, operand_reg_name, reg_name, Backend, DecodeFailure, RawInstruction, RawOperand};
use crate::{Address, ByteView};

/// RV32/RV64 decoder, optionally with compressed encodings.
#[derive(Debug, Clone)]
pub struct RiscVDecoder {
    pub(crate) backend: Backend,
}

impl RiscVDecoder {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub(crate) fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure> {
        self.backend.decode(view, at, lower)
    }
}

fn lower(cs: &Capstone, insn: &Insn<'_>, detail: &InsnDetail<'_>) -> Result<RawInstruction, DecodeFailure> {
    let riscv = match detail.arch_detail() {
        ArchDetail::RiscVDetail(riscv) => riscv,
        _ => return Err(DecodeFailure::UnsupportedFeature("missing RISC-V operand detail".to_string())),
    };
    let opcode = opcode_class(cs, insn);

    let declared: Vec<RiscVOperand> = riscv.operands().collect();
    let declared_operands = declared.len();
    let mut operands = Vec::with_capacity(declared_operands);

    for op in declared {
        let raw = match op {
            RiscVOperand::Reg(reg) => RawOperand::Register {
                name: operand_reg_name(cs, reg, &opcode)?,
                size: 0,
            },
            RiscVOperand::Imm(value) => RawOperand::Immediate { value, size: 0 },
            RiscVOperand::Mem(mem) => RawOperand::Memory {
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
