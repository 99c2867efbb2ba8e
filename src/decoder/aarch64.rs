use capstone::arch::arm64::{Arm64Extender, Arm64Insn, Arm64Operand, Arm64OperandType, Arm64Shift, Arm64Vas};
use capstone::arch::{ArchDetail, DetailsArchInsn};
use capstone::{Capstone, Insn, InsnDetail};

use super::{opcode_class, operand_reg_name, reg_name, Backend, DecodeFailure, OpcodeClass, RawInstruction, RawOperand};
use crate::{Address, ByteView};

/// AArch64 (A64) decoder.
#[derive(Debug, Clone)]
pub struct AArch64Decoder {
    pub(crate) backend: Backend,
}

impl AArch64Decoder {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub(crate) fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure> {
        self.backend.decode(view, at, lower)
    }
}

fn lower(cs: &Capstone, insn: &Insn<'_>, detail: &InsnDetail<'_>) -> Result<RawInstruction, DecodeFailure> {
    let a64 = match detail.arch_detail() {
        ArchDetail::Arm64Detail(a64) => a64,
        _ => return Err(DecodeFailure::UnsupportedFeature("missing AArch64 operand detail".to_string())),
    };
    let opcode = opcode_class(cs, insn);

    // capstone's operand iterator reinterprets system register, barrier and
    // prefetch ids as closed enums that do not cover every encoding, so those
    // operands are read from the printed form or not at all
    let id = insn.id().0;
    if id == Arm64Insn::ARM64_INS_MRS as u32 || id == Arm64Insn::ARM64_INS_MSR as u32 {
        return lower_printed(insn, opcode, "system-register");
    }
    if SYSTEM_FORMS.iter().any(|form| *form as u32 == id) {
        return lower_printed(insn, opcode, "system-operand");
    }
    if id == Arm64Insn::ARM64_INS_PRFM as u32 || id == Arm64Insn::ARM64_INS_PRFUM as u32 {
        return Err(DecodeFailure::UnsupportedFeature(format!(
            "prefetch operation in '{}'",
            opcode.mnemonic
        )));
    }

    let declared: Vec<Arm64Operand> = a64.operands().collect();
    let declared_operands = declared.len();
    let mut operands = Vec::with_capacity(declared_operands);

    for op in declared {
        let extender = extender_name(op.ext);
        let modified = !matches!(op.shift, Arm64Shift::Invalid) || extender.is_some();
        let raw = match op.op_type {
            Arm64OperandType::Reg(reg) if modified => RawOperand::Special {
                kind: "shifted-register",
                text: modifier_text(&vector_name(operand_reg_name(cs, reg, &opcode)?, &op), extender, op.shift),
            },
            Arm64OperandType::Reg(reg) => RawOperand::Register {
                name: vector_name(operand_reg_name(cs, reg, &opcode)?, &op),
                size: 0,
            },
            Arm64OperandType::Imm(value) => match op.shift {
                // `movz x0, #1, lsl #16`
                Arm64Shift::Lsl(amount) if amount < 64 => RawOperand::Immediate {
                    value: value.wrapping_shl(amount),
                    size: 0,
                },
                _ => RawOperand::Immediate { value, size: 0 },
            },
            Arm64OperandType::Fp(value) => RawOperand::FpImmediate { value },
            Arm64OperandType::Mem(mem) => {
                let base = reg_name(cs, mem.base());
                let index = reg_name(cs, mem.index());
                match (extender, index) {
                    // `[x1, w2, sxtw #3]` has no generic memory shape
                    (Some(ext), Some(index)) => RawOperand::Special {
                        kind: "extended-memory",
                        text: format!(
                            "[{}, {}]{:+}",
                            base.as_deref().unwrap_or("?"),
                            modifier_text(&index, Some(ext), op.shift),
                            mem.disp()
                        ),
                    },
                    (_, index) => {
                        let scale = match op.shift {
                            Arm64Shift::Lsl(amount) if index.is_some() && amount < 31 => 1 << amount,
                            _ => 1,
                        };
                        RawOperand::Memory {
                            segment: None,
                            base,
                            index,
                            scale,
                            displacement: mem.disp() as i64,
                            size: 0,
                        }
                    }
                }
            }
            Arm64OperandType::Invalid => {
                return Err(DecodeFailure::UnsupportedFeature(format!(
                    "invalid operand in '{}'",
                    opcode.mnemonic
                )))
            }
            other => RawOperand::Special {
                kind: "aarch64",
                text: format!("{:?}", other).to_lowercase(),
            },
        };
        operands.push(raw);
    }

    Ok(RawInstruction::new(insn.bytes().len() as u8, opcode, operands).with_declared(declared_operands))
}

/// Instructions whose operands are system operations or barrier options.
const SYSTEM_FORMS: [Arm64Insn; 9] = [
    Arm64Insn::ARM64_INS_SYS,
    Arm64Insn::ARM64_INS_SYSL,
    Arm64Insn::ARM64_INS_IC,
    Arm64Insn::ARM64_INS_DC,
    Arm64Insn::ARM64_INS_AT,
    Arm64Insn::ARM64_INS_TLBI,
    Arm64Insn::ARM64_INS_DMB,
    Arm64Insn::ARM64_INS_DSB,
    Arm64Insn::ARM64_INS_ISB,
];

/// Operands from the printed form: `mrs x0, tpidr_el0`, `msr spsel, #1`,
/// `dc civac, x0`, `dmb ish`. Anything that is neither a general register
/// nor an immediate becomes a `kind` special operand.
fn lower_printed(insn: &Insn<'_>, opcode: OpcodeClass, kind: &'static str) -> Result<RawInstruction, DecodeFailure> {
    let text = insn.op_str().unwrap_or("");
    let mut operands = Vec::new();

    for part in text.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let raw = if let Some(imm) = part.strip_prefix('#') {
            let value = parse_immediate(imm).ok_or_else(|| {
                DecodeFailure::UnsupportedFeature(format!("unreadable immediate '{}' in '{}'", part, opcode.mnemonic))
            })?;
            RawOperand::Immediate { value, size: 0 }
        } else if is_general_register(part) {
            RawOperand::Register {
                name: part.to_string(),
                size: 0,
            }
        } else {
            RawOperand::Special {
                kind,
                text: part.to_string(),
            }
        };
        operands.push(raw);
    }

    let declared = operands.len();
    Ok(RawInstruction::new(insn.bytes().len() as u8, opcode, operands).with_declared(declared))
}

fn is_general_register(name: &str) -> bool {
    if matches!(name, "xzr" | "wzr" | "sp" | "wsp") {
        return true;
    }
    match name.strip_prefix(['x', 'w']) {
        Some(number) => !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn parse_immediate(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    Some(if negative { -value } else { value })
}

/// Register name with its arrangement or lane: `v0.4s`, `v0.s[1]`.
fn vector_name(name: String, op: &Arm64Operand) -> String {
    let arrangement = arrangement_name(op.vas);
    match (arrangement, op.vector_index) {
        (None, None) => name,
        (Some(arr), None) => format!("{}.{}", name, arr),
        // a lane names only the element type
        (Some(arr), Some(lane)) => format!("{}.{}[{}]", name, arr.trim_start_matches(char::is_numeric), lane),
        (None, Some(lane)) => format!("{}[{}]", name, lane),
    }
}

fn arrangement_name(vas: Arm64Vas) -> Option<&'static str> {
    let name = match vas {
        Arm64Vas::ARM64_VAS_INVALID => return None,
        Arm64Vas::ARM64_VAS_16B => "16b",
        Arm64Vas::ARM64_VAS_8B => "8b",
        Arm64Vas::ARM64_VAS_4B => "4b",
        Arm64Vas::ARM64_VAS_1B => "1b",
        Arm64Vas::ARM64_VAS_8H => "8h",
        Arm64Vas::ARM64_VAS_4H => "4h",
        Arm64Vas::ARM64_VAS_2H => "2h",
        Arm64Vas::ARM64_VAS_1H => "1h",
        Arm64Vas::ARM64_VAS_4S => "4s",
        Arm64Vas::ARM64_VAS_2S => "2s",
        Arm64Vas::ARM64_VAS_1S => "1s",
        Arm64Vas::ARM64_VAS_2D => "2d",
        Arm64Vas::ARM64_VAS_1D => "1d",
        Arm64Vas::ARM64_VAS_1Q => "1q",
    };
    Some(name)
}

fn extender_name(ext: Arm64Extender) -> Option<&'static str> {
    let name = match ext {
        Arm64Extender::ARM64_EXT_INVALID => return None,
        Arm64Extender::ARM64_EXT_UXTB => "uxtb",
        Arm64Extender::ARM64_EXT_UXTH => "uxth",
        Arm64Extender::ARM64_EXT_UXTW => "uxtw",
        Arm64Extender::ARM64_EXT_UXTX => "uxtx",
        Arm64Extender::ARM64_EXT_SXTB => "sxtb",
        Arm64Extender::ARM64_EXT_SXTH => "sxth",
        Arm64Extender::ARM64_EXT_SXTW => "sxtw",
        Arm64Extender::ARM64_EXT_SXTX => "sxtx",
    };
    Some(name)
}

/// `w2, sxtw #3` or `x1, lsl #4`
fn modifier_text(register: &str, extender: Option<&str>, shift: Arm64Shift) -> String {
    let shift = match shift {
        Arm64Shift::Invalid => None,
        Arm64Shift::Lsl(n) => Some(("lsl", n)),
        Arm64Shift::Msl(n) => Some(("msl", n)),
        Arm64Shift::Lsr(n) => Some(("lsr", n)),
        Arm64Shift::Asr(n) => Some(("asr", n)),
        Arm64Shift::Ror(n) => Some(("ror", n)),
    };
    match (extender, shift) {
        (Some(ext), Some((_, amount))) => format!("{}, {} #{}", register, ext, amount),
        (Some(ext), None) => format!("{}, {}", register, ext),
        (None, Some((op, amount))) => format!("{}, {} #{}", register, op, amount),
        (None, None) => register.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_registers() {
        assert!(is_general_register("x0"));
        assert!(is_general_register("w30"));
        assert!(is_general_register("xzr"));
        assert!(!is_general_register("tpidr_el0"));
        assert!(!is_general_register("x"));
    }

    #[test]
    fn test_parse_immediate() {
        assert_eq!(parse_immediate("1"), Some(1));
        assert_eq!(parse_immediate("0xf"), Some(15));
        assert_eq!(parse_immediate("-0x10"), Some(-16));
        assert_eq!(parse_immediate("spsel"), None);
    }

    #[test]
    fn test_modifier_text() {
        assert_eq!(modifier_text("w2", Some("sxtw"), Arm64Shift::Lsl(3)), "w2, sxtw #3");
        assert_eq!(modifier_text("w2", Some("uxtw"), Arm64Shift::Invalid), "w2, uxtw");
        assert_eq!(modifier_text("x1", None, Arm64Shift::Asr(4)), "x1, asr #4");
    }
}
