//! Explicit operand counts for opcode classes whose shape is fixed.
//!
//! Only classes every backend encodes the same way are listed. Anything not
//! listed is not checked.

use std::ops::RangeInclusive;

use crate::Isa;

/// Legal explicit-operand counts for instruction `name`, if known.
pub(crate) fn expected_arity(isa: Isa, name: &str) -> Option<RangeInclusive<usize>> {
    let range = match isa {
        Isa::X86_32 | Isa::X86_64 => match name {
            "int3" | "hlt" | "leave" | "cpuid" | "syscall" | "sysenter" | "ud2" => 0..=0,
            "ret" | "retf" => 0..=1,
            "nop" => 0..=2,
            "push" | "pop" | "call" | "jmp" | "int" => 1..=1,
            "lea" | "cmp" | "test" | "mov" => 2..=2,
            _ => return None,
        },
        Isa::AArch64 => match name {
            "nop" | "ret" => 0..=1,
            "br" | "blr" | "b" | "bl" | "svc" | "hvc" | "smc" | "brk" => 1..=1,
            "cbz" | "cbnz" => 2..=2,
            "tbz" | "tbnz" => 3..=3,
            _ => return None,
        },
        Isa::Arm | Isa::Thumb => match name {
            "nop" => 0..=1,
            "bx" | "blx" | "svc" | "bkpt" => 1..=1,
            _ => return None,
        },
        Isa::Mips32 | Isa::Mips64 => match name {
            "nop" => 0..=0,
            "syscall" => 0..=1,
            "break" => 0..=2,
            "jr" | "j" | "jal" => 1..=1,
            _ => return None,
        },
        Isa::Ppc32 | Isa::Ppc64 => match name {
            "trap" => 0..=0,
            "sc" | "blr" => 0..=1,
            _ => return None,
        },
        Isa::RiscV32 | Isa::RiscV64 => match name {
            "ecall" | "ebreak" | "mret" | "sret" | "wfi" => 0..=0,
            "jal" => 1..=2,
            "jalr" => 1..=3,
            _ => return None,
        },
    };
    Some(range)
}
