//! Widths and signedness the encoding leaves implicit.

use crate::decoder::PrefixFlags;
use crate::Isa;

/// `name` is `prefix` followed by a register number.
fn numbered(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Split `v0.4s`, `v0.s[1]` or `d0[1]` into the register and its layout.
fn split_layout(name: &str) -> (&str, Option<&str>) {
    match name.find(['.', '[']) {
        Some(at) => (&name[..at], Some(&name[at..])),
        None => (name, None),
    }
}

/// Bytes covered by an AArch64 arrangement (`.4s`) or lane (`.s[1]`).
fn layout_width(layout: &str) -> Option<u8> {
    let layout = layout.strip_prefix('.')?;
    let (shape, lane) = match layout.split_once('[') {
        Some((shape, _)) => (shape, true),
        None => (layout, false),
    };
    let digits = shape.bytes().take_while(u8::is_ascii_digit).count();
    let count: u8 = if digits == 0 { 1 } else { shape[..digits].parse().ok()? };
    let element = match &shape[digits..] {
        "b" => 1,
        "h" => 2,
        "s" => 4,
        "d" => 8,
        "q" => 16,
        _ => return None,
    };
    if lane {
        Some(element)
    } else {
        count.checked_mul(element)
    }
}

/// Width in bytes of a register named `name`.
pub(crate) fn register_width(isa: Isa, name: &str) -> u8 {
    let (name, layout) = split_layout(name);
    if isa == Isa::AArch64 {
        if let Some(width) = layout.and_then(layout_width) {
            return width;
        }
    }
    match isa {
        Isa::X86_32 | Isa::X86_64 => x86_register_width(isa, name),
        Isa::Arm | Isa::Thumb => {
            if numbered(name, "d") {
                8
            } else if numbered(name, "q") {
                16
            } else {
                4
            }
        }
        Isa::AArch64 => {
            if numbered(name, "x") || matches!(name, "sp" | "fp" | "lr" | "xzr") {
                8
            } else if numbered(name, "w") || matches!(name, "wsp" | "wzr") {
                4
            } else if numbered(name, "q") || numbered(name, "v") || numbered(name, "z") {
                16
            } else if numbered(name, "d") {
                8
            } else if numbered(name, "s") {
                4
            } else if numbered(name, "h") {
                2
            } else if numbered(name, "b") {
                1
            } else {
                8
            }
        }
        Isa::Ppc32 | Isa::Ppc64 => {
            if numbered(name, "f") {
                8
            } else if numbered(name, "v") {
                16
            } else if numbered(name, "cr") {
                4
            } else {
                isa.word_size()
            }
        }
        Isa::RiscV32 | Isa::RiscV64 => {
            if numbered(name, "f") || numbered(name, "ft") || numbered(name, "fs") || numbered(name, "fa") {
                8
            } else if numbered(name, "v") {
                16
            } else {
                isa.word_size()
            }
        }
        Isa::Mips32 | Isa::Mips64 => isa.word_size(),
    }
}

fn x86_register_width(isa: Isa, name: &str) -> u8 {
    if numbered(name, "zmm") {
        return 64;
    }
    if numbered(name, "ymm") {
        return 32;
    }
    if numbered(name, "xmm") {
        return 16;
    }
    if numbered(name, "k") || numbered(name, "mm") {
        return 8;
    }
    if numbered(name, "st") {
        return 10;
    }
    match name {
        "al" | "ah" | "bl" | "bh" | "cl" | "ch" | "dl" | "dh" | "spl" | "bpl" | "sil" | "dil" => 1,
        "ax" | "bx" | "cx" | "dx" | "sp" | "bp" | "si" | "di" | "ip" => 2,
        "cs" | "ds" | "es" | "fs" | "gs" | "ss" => 2,
        "eax" | "ebx" | "ecx" | "edx" | "esp" | "ebp" | "esi" | "edi" | "eip" => 4,
        "rax" | "rbx" | "rcx" | "rdx" | "rsp" | "rbp" | "rsi" | "rdi" | "rip" => 8,
        _ if name.starts_with('r') && name.ends_with('b') => 1,
        _ if name.starts_with('r') && name.ends_with('w') => 2,
        _ if name.starts_with('r') && name.ends_with('d') => 4,
        _ if numbered(name, "r") => 8,
        _ => isa.word_size(),
    }
}

/// Width of an immediate whose encoding did not report one.
pub(crate) fn default_immediate_width(isa: Isa, prefixes: PrefixFlags) -> u8 {
    if !isa.is_x86() {
        return isa.word_size();
    }
    if prefixes.contains(PrefixFlags::REX_W) {
        8
    } else if prefixes.contains(PrefixFlags::OPERAND_SIZE) {
        2
    } else {
        4
    }
}

/// Bytes accessed by a memory operand of instruction `name`.
///
/// `first_register` is the width of the instruction's first register
/// operand, which fixes the access size for plain loads and stores on most
/// RISC encodings. `0` means the instruction does not fix a width.
pub(crate) fn access_width(isa: Isa, name: &str, first_register: Option<u8>) -> u8 {
    let loads_or_stores = name.starts_with("ld") || name.starts_with("st");
    match isa {
        Isa::X86_32 | Isa::X86_64 => 0,
        Isa::Arm | Isa::Thumb => {
            if name.starts_with("vld") || name.starts_with("vst") {
                return first_register.unwrap_or(0);
            }
            if !loads_or_stores {
                return 0;
            }
            if name.starts_with("ldm") || name.starts_with("stm") {
                return 4;
            }
            // ldrbt/ldrht/ldrt are the unprivileged forms
            let body = name.strip_suffix('t').unwrap_or(name);
            if body.ends_with('b') {
                1
            } else if body.ends_with('h') {
                2
            } else if body.ends_with('d') {
                8
            } else {
                4
            }
        }
        Isa::AArch64 => {
            if !loads_or_stores {
                return 0;
            }
            if name.ends_with("sw") {
                4
            } else if name.ends_with('b') {
                1
            } else if name.ends_with('h') {
                2
            } else {
                first_register.unwrap_or(0)
            }
        }
        Isa::Mips32 | Isa::Mips64 => match name {
            "lb" | "lbu" | "sb" => 1,
            "lh" | "lhu" | "sh" => 2,
            "lw" | "lwu" | "sw" | "lwl" | "lwr" | "swl" | "swr" | "ll" | "sc" | "lwc1" | "swc1" => 4,
            "ld" | "sd" | "ldl" | "ldr" | "sdl" | "sdr" | "lld" | "scd" | "ldc1" | "sdc1" => 8,
            _ => isa.word_size(),
        },
        Isa::Ppc32 | Isa::Ppc64 => {
            if name.starts_with("lb") || name.starts_with("stb") {
                1
            } else if name.starts_with("lh") || name.starts_with("sth") {
                2
            } else if ["lw", "stw", "lfs", "stfs", "lmw", "stmw"].iter().any(|p| name.starts_with(p)) {
                4
            } else if ["ld", "std", "lfd", "stfd"].iter().any(|p| name.starts_with(p)) {
                8
            } else {
                isa.word_size()
            }
        }
        Isa::RiscV32 | Isa::RiscV64 => {
            let name = name.strip_prefix("c.").unwrap_or(name);
            if name.starts_with("amo") || name.starts_with("lr.") || name.starts_with("sc.") {
                return if name.contains(".d") { 8 } else { 4 };
            }
            match name {
                "lb" | "lbu" | "sb" => 1,
                "lh" | "lhu" | "sh" => 2,
                "lw" | "lwu" | "sw" | "flw" | "fsw" | "lwsp" | "swsp" | "flwsp" | "fswsp" => 4,
                "ld" | "sd" | "fld" | "fsd" | "ldsp" | "sdsp" | "fldsp" | "fsdsp" => 8,
                _ => isa.word_size(),
            }
        }
    }
}

/// Whether instruction `name` zero-extends its immediate.
pub(crate) fn is_unsigned_immediate(isa: Isa, name: &str) -> bool {
    match isa {
        Isa::X86_32 | Isa::X86_64 => false,
        Isa::Arm | Isa::Thumb => matches!(name, "and" | "orr" | "eor" | "bic" | "tst" | "teq" | "movw" | "movt"),
        Isa::AArch64 => matches!(name, "and" | "ands" | "orr" | "eor" | "tst" | "movk" | "movz"),
        Isa::Mips32 | Isa::Mips64 => matches!(name, "andi" | "ori" | "xori" | "lui"),
        Isa::Ppc32 | Isa::Ppc64 => matches!(
            name,
            "andi." | "andis." | "ori" | "oris" | "xori" | "xoris" | "cmplwi" | "cmpldi"
        ),
        Isa::RiscV32 | Isa::RiscV64 => matches!(name, "lui" | "auipc" | "csrrwi" | "csrrsi" | "csrrci"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Isa::X86_64, "rax", 8)]
    #[case(Isa::X86_64, "r10d", 4)]
    #[case(Isa::X86_64, "r8b", 1)]
    #[case(Isa::X86_64, "xmm3", 16)]
    #[case(Isa::X86_32, "ax", 2)]
    #[case(Isa::AArch64, "x0", 8)]
    #[case(Isa::AArch64, "w7", 4)]
    #[case(Isa::AArch64, "q1", 16)]
    #[case(Isa::AArch64, "b2", 1)]
    #[case(Isa::AArch64, "v0.4s", 16)]
    #[case(Isa::AArch64, "v1.8b", 8)]
    #[case(Isa::AArch64, "v0.s[1]", 4)]
    #[case(Isa::AArch64, "v2.d[0]", 8)]
    #[case(Isa::AArch64, "v3[1]", 16)]
    #[case(Isa::Arm, "r3", 4)]
    #[case(Isa::Arm, "d8", 8)]
    #[case(Isa::Arm, "d0[1]", 8)]
    #[case(Isa::Mips64, "t1", 8)]
    #[case(Isa::Ppc32, "f1", 8)]
    #[case(Isa::RiscV32, "a0", 4)]
    fn test_register_width(#[case] isa: Isa, #[case] name: &str, #[case] width: u8) {
        assert_eq!(register_width(isa, name), width);
    }

    #[rstest]
    #[case(Isa::Arm, "ldrb", None, 1)]
    #[case(Isa::Arm, "ldrsh", None, 2)]
    #[case(Isa::Arm, "ldrd", None, 8)]
    #[case(Isa::Arm, "ldrbt", None, 1)]
    #[case(Isa::Arm, "ldr", None, 4)]
    #[case(Isa::Arm, "stmdb", None, 4)]
    #[case(Isa::Arm, "pld", None, 0)]
    #[case(Isa::AArch64, "ldr", Some(8), 8)]
    #[case(Isa::AArch64, "ldrsw", Some(8), 4)]
    #[case(Isa::AArch64, "strh", Some(4), 2)]
    #[case(Isa::Mips32, "lbu", None, 1)]
    #[case(Isa::Mips64, "sd", None, 8)]
    #[case(Isa::Ppc64, "lwz", None, 4)]
    #[case(Isa::Ppc64, "std", None, 8)]
    #[case(Isa::RiscV64, "c.ld", None, 8)]
    #[case(Isa::RiscV64, "amoadd.w", None, 4)]
    fn test_access_width(#[case] isa: Isa, #[case] name: &str, #[case] first: Option<u8>, #[case] width: u8) {
        assert_eq!(access_width(isa, name, first), width);
    }

    #[test]
    fn test_x86_immediate_width_follows_prefixes() {
        assert_eq!(default_immediate_width(Isa::X86_64, PrefixFlags::REX | PrefixFlags::REX_W), 8);
        assert_eq!(default_immediate_width(Isa::X86_32, PrefixFlags::OPERAND_SIZE), 2);
        assert_eq!(default_immediate_width(Isa::X86_32, PrefixFlags::empty()), 4);
        assert_eq!(default_immediate_width(Isa::AArch64, PrefixFlags::empty()), 8);
    }

    #[test]
    fn test_unsigned_immediates() {
        assert!(is_unsigned_immediate(Isa::Mips32, "ori"));
        assert!(!is_unsigned_immediate(Isa::Mips32, "addiu"));
        assert!(is_unsigned_immediate(Isa::RiscV64, "lui"));
        assert!(!is_unsigned_immediate(Isa::X86_64, "and"));
    }
}
