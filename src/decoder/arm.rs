use capstone::arch::arm::{ArmOperand, ArmOperandType, ArmShift};
use capstone::arch::{ArchDetail, DetailsArchInsn};
use capstone::{Capstone, Insn, InsnDetail};

use super::{opcode_class, operand_reg_name, reg_name, Backend, DecodeFailure, RawInstruction, RawOperand};
use crate::{Address, ByteView};

/// ARM (A32) and Thumb decoder.
#[derive(Debug, Clone)]
pub struct ArmDecoder {
    pub(crate) backend: Backend,
}

impl ArmDecoder {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub(crate) fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure> {
        self.backend.decode(view, at, lower)
    }
}

fn lower(cs: &Capstone, insn: &Insn<'_>, detail: &InsnDetail<'_>) -> Result<RawInstruction, DecodeFailure> {
    let arm = match detail.arch_detail() {
        ArchDetail::ArmDetail(arm) => arm,
        _ => return Err(DecodeFailure::UnsupportedFeature("missing ARM operand detail".to_string())),
    };
    let opcode = opcode_class(cs, insn);

    let declared: Vec<ArmOperand> = arm.operands().collect();
    let declared_operands = declared.len();
    let mut operands = Vec::with_capacity(declared_operands);

    for op in declared {
        let shifted = !matches!(op.shift, ArmShift::Invalid);
        let raw = match op.op_type {
            ArmOperandType::Reg(reg) if shifted => RawOperand::Special {
                kind: "shifted-register",
                text: format!("{} {:?}", operand_reg_name(cs, reg, &opcode)?, op.shift).to_lowercase(),
            },
            ArmOperandType::Reg(reg) => {
                let name = operand_reg_name(cs, reg, &opcode)?;
                RawOperand::Register {
                    // `d0[1]` names one lane of `d0`
                    name: match op.vector_index {
                        Some(lane) => format!("{}[{}]", name, lane),
                        None => name,
                    },
                    size: 0,
                }
            }
            ArmOperandType::Imm(value) => RawOperand::Immediate {
                value: value as i64,
                size: 0,
            },
            ArmOperandType::Fp(value) => RawOperand::FpImmediate { value },
            ArmOperandType::Mem(mem) => {
                let index = reg_name(cs, mem.index());
                // `[r0, -r1]` subtracts the index
                let sign = if op.subtracted && mem.scale() > 0 { -1 } else { 1 };
                // `[r0, r1, lsl #2]` folds the shift into the scale
                let scale = match op.shift {
                    ArmShift::Lsl(amount) if index.is_some() && amount < 31 => mem.scale() * (1 << amount),
                    _ => mem.scale(),
                };
                RawOperand::Memory {
                    segment: None,
                    base: reg_name(cs, mem.base()),
                    index,
                    scale: sign * scale,
                    displacement: mem.disp() as i64,
                    size: 0,
                }
            }
            ArmOperandType::Invalid => {
                return Err(DecodeFailure::UnsupportedFeature(format!(
                    "invalid operand in '{}'",
                    opcode.mnemonic
                )))
            }
            other => RawOperand::Special {
                kind: "arm",
                text: format!("{:?}", other).to_lowercase(),
            },
        };
        operands.push(raw);
    }

    Ok(RawInstruction::new(insn.bytes().len() as u8, opcode, operands).with_declared(declared_operands))
}
