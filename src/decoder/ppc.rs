use capstone::arch::ppc::PpcOperand;
use capstone::arch::{ArchDetail, DetailsArchInsn};
use capstone::{Capstone, Insn, InsnDetail};

use super::{opcode_class, operand_reg_name, reg_name, Backend, DecodeFailure, RawInstruction, RawOperand};
use crate::{Address, ByteView};

/// 32- and 64-bit PowerPC decoder.
#[derive(Debug, Clone)]
pub struct PpcDecoder {
    pub(crate) backend: Backend,
}

impl PpcDecoder {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub(crate) fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure> {
        self.backend.decode(view, at, lower)
    }
}

fn lower(cs: &Capstone, insn: &Insn<'_>, detail: &InsnDetail<'_>) -> Result<RawInstruction, DecodeFailure> {
    let ppc = match detail.arch_detail() {
        ArchDetail::PpcDetail(ppc) => ppc,
        _ => return Err(DecodeFailure::UnsupportedFeature("missing PPC operand detail".to_string())),
    };
    let opcode = opcode_class(cs, insn);

    let declared: Vec<PpcOperand> = ppc.operands().collect();
    let declared_operands = declared.len();
    let mut operands = Vec::with_capacity(declared_operands);

    for op in declared {
        let raw = match op {
            PpcOperand::Reg(reg) => RawOperand::Register {
                name: operand_reg_name(cs, reg, &opcode)?,
                size: 0,
            },
            PpcOperand::Imm(value) => RawOperand::Immediate { value, size: 0 },
            PpcOperand::Mem(mem) => RawOperand::Memory {
                segment: None,
                base: reg_name(cs, mem.base()),
                index: None,
                scale: 1,
                displacement: mem.disp() as i64,
                size: 0,
            },
            PpcOperand::Invalid => {
                return Err(DecodeFailure::UnsupportedFeature(format!(
                    "invalid operand in '{}'",
                    opcode.mnemonic
                )))
            }
            // condition register field operands
            other => RawOperand::Special {
                kind: "ppc",
                text: format!("{:?}", other).to_lowercase(),
            },
        };
        operands.push(raw);
    }

    Ok(RawInstruction::new(insn.bytes().len() as u8, opcode, operands).with_declared(declared_operands))
}
