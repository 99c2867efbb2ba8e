//! Capstone-based single-instruction decoders for multiple architectures.
//!
//! Each ISA family lives in its own module and only lowers capstone's
//! per-architecture operand detail into [`RawOperand`]s. Window handling,
//! alignment, truncation classification and group filtering are shared here.

mod aarch64;
mod arm;
mod mips;
mod options;
mod ppc;
mod raw;
mod riscv;
mod x86;

pub use self::aarch64::AArch64Decoder;
pub use self::arm::ArmDecoder;
pub use self::mips::MipsDecoder;
pub use self::options::{DecodeOptions, DisasmOption};
pub use self::ppc::PpcDecoder;
pub use self::raw::{OpcodeClass, PrefixFlags, RawInstruction, RawOperand};
pub use self::riscv::RiscVDecoder;
pub use self::x86::X86Decoder;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use capstone::{Arch, Capstone, Endian, ExtraMode, Insn, InsnDetail, Mode, RegId};

use crate::{Address, ByteView, Decoder, Isa, MAX_INSTRUCTION_SIZE};

/// Why an address does not start a usable instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    /// The encoding looked legal but ran past the end of the bytes
    #[error("truncated: {needed} bytes needed, {available} available")]
    Truncated { available: usize, needed: usize },

    /// The bytes are not an instruction in this mode
    #[error("invalid encoding")]
    InvalidEncoding,

    /// Legal, but the decoder does not model it (or configuration disabled it)
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The decode violates a normalization invariant
    #[error("malformed decode: {0}")]
    Malformed(String),
}

impl DecodeFailure {
    /// Short reason used in the `invalid_op_code` relation
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeFailure::Truncated { .. } => "truncated",
            DecodeFailure::InvalidEncoding => "invalid",
            DecodeFailure::UnsupportedFeature(_) => "unsupported",
            DecodeFailure::Malformed(_) => "malformed",
        }
    }

    /// Whether this failure must abort the whole pass
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeFailure::Malformed(_))
    }
}

/// Errors that can occur while setting up a decoder
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Capstone error: {0}")]
    CapstoneError(#[from] capstone::Error),
}

/// Everything that identifies one configured capstone handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandleSpec {
    pub(crate) isa: Isa,
    big_endian: bool,
    mclass: bool,
    v8: bool,
    micro: bool,
    compressed: bool,
}

impl HandleSpec {
    pub(crate) fn new(isa: Isa, options: &DecodeOptions) -> Self {
        let default_big = matches!(isa, Isa::Ppc32 | Isa::Ppc64);
        let big_endian = if isa.is_x86() {
            false
        } else {
            options.big_endian.unwrap_or(default_big)
        };
        let arm_family = matches!(isa, Isa::Arm | Isa::Thumb);
        Self {
            isa,
            big_endian,
            mclass: arm_family && options.arm_mclass,
            v8: arm_family && options.arm_v8,
            micro: matches!(isa, Isa::Mips32 | Isa::Mips64) && options.micromips,
            compressed: matches!(isa, Isa::RiscV32 | Isa::RiscV64) && options.riscv_compressed,
        }
    }

    fn arch_mode(&self) -> (Arch, Mode) {
        match self.isa {
            Isa::X86_32 => (Arch::X86, Mode::Mode32),
            Isa::X86_64 => (Arch::X86, Mode::Mode64),
            Isa::Arm => (Arch::ARM, Mode::Arm),
            Isa::Thumb => (Arch::ARM, Mode::Thumb),
            Isa::AArch64 => (Arch::ARM64, Mode::Arm),
            Isa::Mips32 => (Arch::MIPS, Mode::Mips32),
            Isa::Mips64 => (Arch::MIPS, Mode::Mips64),
            Isa::Ppc32 => (Arch::PPC, Mode::Mode32),
            Isa::Ppc64 => (Arch::PPC, Mode::Mode64),
            Isa::RiscV32 => (Arch::RISCV, Mode::RiscV32),
            Isa::RiscV64 => (Arch::RISCV, Mode::RiscV64),
        }
    }

    fn extra_modes(&self) -> Vec<ExtraMode> {
        let mut extra = Vec::new();
        if self.mclass {
            extra.push(ExtraMode::MClass);
        }
        if self.v8 {
            extra.push(ExtraMode::V8);
        }
        if self.micro {
            extra.push(ExtraMode::Micro);
        }
        if self.compressed {
            extra.push(ExtraMode::RiscVC);
        }
        extra
    }

    fn build(&self) -> Result<Capstone, DecoderError> {
        let (arch, mode) = self.arch_mode();
        let endian = if self.big_endian {
            Endian::Big
        } else {
            Endian::Little
        };
        let mut cs = Capstone::new_raw(arch, mode, self.extra_modes().into_iter(), Some(endian))?;
        cs.set_detail(true)?;
        Ok(cs)
    }

    /// Shortest legal encoding, in bytes.
    pub(crate) fn min_insn_len(&self) -> usize {
        match self.isa {
            Isa::X86_32 | Isa::X86_64 => 1,
            Isa::Thumb => 2,
            Isa::Mips32 | Isa::Mips64 if self.micro => 2,
            Isa::RiscV32 | Isa::RiscV64 if self.compressed => 2,
            _ => 4,
        }
    }

    /// Required alignment of instruction start addresses.
    pub(crate) fn alignment(&self) -> u64 {
        self.min_insn_len() as u64
    }
}

thread_local! {
    // One handle per configuration per worker thread; capstone handles are
    // not shared across threads.
    static CS_POOL: RefCell<HashMap<HandleSpec, Rc<Capstone>>> = RefCell::new(HashMap::new());
}

fn handle(spec: &HandleSpec) -> Result<Rc<Capstone>, DecoderError> {
    CS_POOL.with(|cell| {
        if let Some(cs) = cell.borrow().get(spec) {
            return Ok(Rc::clone(cs));
        }
        let cs = Rc::new(spec.build()?);
        cell.borrow_mut().insert(*spec, Rc::clone(&cs));
        Ok(cs)
    })
}

/// Instruction groups a decoder refuses to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct GroupFilter {
    no_avx: bool,
    no_avx512: bool,
    no_privileged: bool,
}

impl GroupFilter {
    pub(crate) fn new(options: &DecodeOptions) -> Self {
        Self {
            no_avx: options.no_avx,
            no_avx512: options.no_avx512,
            no_privileged: options.no_privileged,
        }
    }

    fn is_empty(&self) -> bool {
        !(self.no_avx || self.no_avx512 || self.no_privileged)
    }

    fn rejects(&self, group: &str) -> bool {
        (self.no_avx512 && group.starts_with("avx512"))
            || (self.no_avx && (group.starts_with("avx") || group.starts_with("fma") || group == "f16c"))
            || (self.no_privileged && group == "privilege")
    }
}

/// Shared capstone plumbing held by every family decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backend {
    pub(crate) spec: HandleSpec,
    filter: GroupFilter,
}

impl Backend {
    pub(crate) fn new(isa: Isa, options: &DecodeOptions) -> Self {
        Self {
            spec: HandleSpec::new(isa, options),
            filter: GroupFilter::new(options),
        }
    }

    /// Decode one instruction at `at` and hand capstone's detail to `lower`.
    pub(crate) fn decode<F>(&self, view: &ByteView<'_>, at: Address, lower: F) -> Result<RawInstruction, DecodeFailure>
    where
        F: FnOnce(&Capstone, &Insn<'_>, &InsnDetail<'_>) -> Result<RawInstruction, DecodeFailure>,
    {
        let max_len = self.spec.isa.max_insn_len();
        let window = view.window(at, max_len).ok_or(DecodeFailure::InvalidEncoding)?;

        if at % self.spec.alignment() != 0 {
            return Err(DecodeFailure::InvalidEncoding);
        }
        let min_len = self.spec.min_insn_len();
        if window.len() < min_len {
            return Err(DecodeFailure::Truncated {
                available: window.len(),
                needed: min_len,
            });
        }

        let cs = handle(&self.spec).map_err(|e| {
            log::warn!("Could not build {} decoder on this thread: {}", self.spec.isa, e);
            DecodeFailure::UnsupportedFeature(e.to_string())
        })?;

        let insns = match cs.disasm_count(window, at, 1) {
            Ok(insns) => insns,
            Err(_) => return Err(classify_failure(&*cs, window, at, max_len)),
        };
        let insn = match insns.iter().next() {
            Some(insn) if insn.address() == at && !insn.bytes().is_empty() => insn,
            _ => return Err(classify_failure(&*cs, window, at, max_len)),
        };
        let detail = cs
            .insn_detail(&insn)
            .map_err(|e| DecodeFailure::UnsupportedFeature(format!("no operand detail: {}", e)))?;

        if !self.filter.is_empty() {
            for group in detail.groups() {
                if let Some(name) = cs.group_name(*group) {
                    if self.filter.rejects(&name) {
                        return Err(DecodeFailure::UnsupportedFeature(format!("{} instructions disabled", name)));
                    }
                }
            }
        }

        lower(&*cs, &insn, &detail)
    }
}

/// Tell a short tail apart from garbage: retry with the window zero-padded to
/// the maximum length and see whether the instruction needs the missing bytes.
fn classify_failure(cs: &Capstone, window: &[u8], at: Address, max_len: usize) -> DecodeFailure {
    if window.len() >= max_len {
        return DecodeFailure::InvalidEncoding;
    }
    let mut padded = [0u8; MAX_INSTRUCTION_SIZE];
    padded[..window.len()].copy_from_slice(window);

    match cs.disasm_count(&padded[..max_len], at, 1) {
        Ok(insns) => match insns.iter().next() {
            Some(insn) if insn.bytes().len() > window.len() => DecodeFailure::Truncated {
                available: window.len(),
                needed: insn.bytes().len(),
            },
            _ => DecodeFailure::InvalidEncoding,
        },
        Err(_) => DecodeFailure::InvalidEncoding,
    }
}

/// Register name, or `None` for capstone's "no register" id.
pub(crate) fn reg_name(cs: &Capstone, reg: RegId) -> Option<String> {
    if reg.0 == 0 {
        None
    } else {
        cs.reg_name(reg).filter(|name| !name.is_empty())
    }
}

/// Name of a register operand. Capstone sometimes reports the "no register"
/// id for a legal encoding; that operand cannot be represented.
pub(crate) fn operand_reg_name(cs: &Capstone, reg: RegId, opcode: &OpcodeClass) -> Result<String, DecodeFailure> {
    reg_name(cs, reg).ok_or_else(|| {
        DecodeFailure::UnsupportedFeature(format!(
            "'{}' has a register operand without a name (id {})",
            opcode.mnemonic, reg.0
        ))
    })
}

/// Opcode class: canonical instruction name plus the printed mnemonic.
pub(crate) fn opcode_class(cs: &Capstone, insn: &Insn<'_>) -> OpcodeClass {
    let mnemonic = insn.mnemonic().unwrap_or("").to_string();
    let name = cs.insn_name(insn.id()).unwrap_or_else(|| mnemonic.clone());
    OpcodeClass::new(insn.id().0, name, mnemonic)
}

/// One decoder per ISA family, selected by the module's declared architecture.
#[derive(Debug, Clone)]
pub enum IsaDecoder {
    X86(X86Decoder),
    Arm(ArmDecoder),
    AArch64(AArch64Decoder),
    Mips(MipsDecoder),
    Ppc(PpcDecoder),
    RiscV(RiscVDecoder),
}

impl IsaDecoder {
    /// Create a decoder for `isa` configured by `options`.
    ///
    /// The `thumb` option turns an ARM module into a Thumb one. The backend
    /// handle is built once here so that an unusable configuration fails up
    /// front rather than at every address.
    pub fn for_isa(isa: Isa, options: &DecodeOptions) -> Result<Self, DecoderError> {
        let isa = if isa == Isa::Arm && options.thumb { Isa::Thumb } else { isa };
        let backend = Backend::new(isa, options);
        handle(&backend.spec)?;

        Ok(match isa {
            Isa::X86_32 | Isa::X86_64 => IsaDecoder::X86(X86Decoder::new(backend)),
            Isa::Arm | Isa::Thumb => IsaDecoder::Arm(ArmDecoder::new(backend)),
            Isa::AArch64 => IsaDecoder::AArch64(AArch64Decoder::new(backend)),
            Isa::Mips32 | Isa::Mips64 => IsaDecoder::Mips(MipsDecoder::new(backend)),
            Isa::Ppc32 | Isa::Ppc64 => IsaDecoder::Ppc(PpcDecoder::new(backend)),
            Isa::RiscV32 | Isa::RiscV64 => IsaDecoder::RiscV(RiscVDecoder::new(backend)),
        })
    }

    /// Create a decoder with default options
    pub fn for_architecture(isa: Isa) -> Result<Self, DecoderError> {
        Self::for_isa(isa, &DecodeOptions::default())
    }

    fn backend(&self) -> &Backend {
        match self {
            IsaDecoder::X86(d) => &d.backend,
            IsaDecoder::Arm(d) => &d.backend,
            IsaDecoder::AArch64(d) => &d.backend,
            IsaDecoder::Mips(d) => &d.backend,
            IsaDecoder::Ppc(d) => &d.backend,
            IsaDecoder::RiscV(d) => &d.backend,
        }
    }
}

impl fmt::Display for IsaDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IsaDecoder::{}", self.isa())
    }
}

impl Decoder for IsaDecoder {
    fn isa(&self) -> Isa {
        self.backend().spec.isa
    }

    fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure> {
        match self {
            IsaDecoder::X86(d) => d.decode_one(view, at),
            IsaDecoder::Arm(d) => d.decode_one(view, at),
            IsaDecoder::AArch64(d) => d.decode_one(view, at),
            IsaDecoder::Mips(d) => d.decode_one(view, at),
            IsaDecoder::Ppc(d) => d.decode_one(view, at),
            IsaDecoder::RiscV(d) => d.decode_one(view, at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn decode_at(isa: Isa, bytes: &[u8], at: Address) -> Result<RawInstruction, DecodeFailure> {
        let decoder = IsaDecoder::for_architecture(isa).unwrap();
        let view = ByteView::new(0x1000, bytes).unwrap();
        decoder.decode_one(&view, at)
    }

    #[test]
    fn test_architecture_mapping() {
        let decoder = IsaDecoder::for_architecture(Isa::X86_64).unwrap();
        assert_eq!(decoder.isa(), Isa::X86_64);

        let thumb = IsaDecoder::for_isa(Isa::Arm, &DecodeOptions::default().with(DisasmOption::Thumb)).unwrap();
        assert_eq!(thumb.isa(), Isa::Thumb);
    }

    #[test]
    fn test_unnamed_register_is_unsupported() {
        let spec = HandleSpec::new(Isa::Ppc32, &DecodeOptions::default());
        let cs = handle(&spec).unwrap();
        let opcode = OpcodeClass::new(1, "lfsux", "lfsux");

        assert_eq!(reg_name(&cs, RegId(0)), None);
        assert!(matches!(
            operand_reg_name(&cs, RegId(0), &opcode),
            Err(DecodeFailure::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_ppc_zero_register_form_is_not_fatal() {
        // lfsux with rA = 0, reported with an unnamed register
        match decode_at(Isa::Ppc32, &[0x7e, 0x40, 0x4c, 0x6e], 0x1000) {
            Ok(raw) => assert!(raw.operands.iter().all(|op| match op {
                RawOperand::Register { name, .. } => !name.is_empty(),
                _ => true,
            })),
            Err(failure) => assert!(!failure.is_fatal(), "{}", failure),
        }
    }

    #[test]
    fn test_x86_decode() {
        // mov eax, 1
        let raw = decode_at(Isa::X86_32, &[0xb8, 0x01, 0x00, 0x00, 0x00], 0x1000).unwrap();
        assert_eq!(raw.opcode.name, "mov");
        assert_eq!(raw.size, 5);
        assert_eq!(raw.operands.len(), 2);
        assert_eq!(raw.operands[0], RawOperand::Register { name: "eax".to_string(), size: 4 });
        assert_eq!(raw.operands[1], RawOperand::Immediate { value: 1, size: 4 });
    }

    #[test]
    fn test_x86_truncated_tail() {
        // mov eax, imm32 with only one immediate byte present
        let failure = decode_at(Isa::X86_32, &[0xb8, 0x01], 0x1000).unwrap_err();
        assert_eq!(failure, DecodeFailure::Truncated { available: 2, needed: 5 });
    }

    #[test]
    fn test_outside_view_is_invalid() {
        let failure = decode_at(Isa::X86_64, &[0x90], 0x2000).unwrap_err();
        assert_eq!(failure, DecodeFailure::InvalidEncoding);
    }

    #[test]
    fn test_fixed_width_alignment() {
        // aarch64 nop; nop
        let bytes = [0x1f, 0x20, 0x03, 0xd5, 0x1f, 0x20, 0x03, 0xd5];
        assert!(decode_at(Isa::AArch64, &bytes, 0x1000).is_ok());
        assert_eq!(decode_at(Isa::AArch64, &bytes, 0x1001).unwrap_err(), DecodeFailure::InvalidEncoding);
        assert_eq!(decode_at(Isa::AArch64, &bytes, 0x1002).unwrap_err(), DecodeFailure::InvalidEncoding);
        assert!(decode_at(Isa::AArch64, &bytes, 0x1004).is_ok());
    }

    #[test]
    fn test_fixed_width_short_tail() {
        let failure = decode_at(Isa::AArch64, &[0x1f, 0x20], 0x1000).unwrap_err();
        assert_eq!(failure, DecodeFailure::Truncated { available: 2, needed: 4 });
    }

    #[rstest]
    #[case(Isa::X86_64, vec![0x90], "nop", 1)]
    #[case(Isa::AArch64, vec![0x1f, 0x20, 0x03, 0xd5], "nop", 4)]
    #[case(Isa::Arm, vec![0x01, 0x00, 0xa0, 0xe1], "mov", 4)]
    #[case(Isa::Mips32, vec![0x21, 0x10, 0x85, 0x00], "addu", 4)]
    #[case(Isa::Ppc32, vec![0x7c, 0x64, 0x2a, 0x14], "add", 4)]
    #[case(Isa::RiscV64, vec![0x13, 0x05, 0x15, 0x00], "addi", 4)]
    fn test_each_family_decodes(#[case] isa: Isa, #[case] bytes: Vec<u8>, #[case] mnemonic: &str, #[case] size: u8) {
        let raw = decode_at(isa, &bytes, 0x1000).unwrap();
        assert_eq!(raw.opcode.mnemonic, mnemonic);
        assert_eq!(raw.size, size);
        assert_eq!(raw.operands.len(), raw.declared_operands);
    }

    #[test]
    fn test_group_filter_names() {
        let filter = GroupFilter::new(&DecodeOptions::default().with(DisasmOption::NoAvx512));
        assert!(filter.rejects("avx512"));
        assert!(!filter.rejects("avx2"));

        let filter = GroupFilter::new(&DecodeOptions::default().with(DisasmOption::NoAvx));
        assert!(filter.rejects("avx2"));
        assert!(filter.rejects("fma"));
        assert!(!filter.rejects("sse2"));
    }

    #[test]
    fn test_no_avx_rejects_vex_encoding() {
        // vaddps ymm0, ymm1, ymm2
        let bytes = [0xc5, 0xf4, 0x58, 0xc2];
        let view = ByteView::new(0x1000, &bytes).unwrap();

        let plain = IsaDecoder::for_architecture(Isa::X86_64).unwrap();
        assert!(plain.decode_one(&view, 0x1000).is_ok());

        let options = DecodeOptions::default().with(DisasmOption::NoAvx);
        let strict = IsaDecoder::for_isa(Isa::X86_64, &options).unwrap();
        assert!(matches!(
            strict.decode_one(&view, 0x1000),
            Err(DecodeFailure::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_ppc_default_big_endian() {
        let spec = HandleSpec::new(Isa::Ppc64, &DecodeOptions::default());
        assert!(spec.big_endian);
        let spec = HandleSpec::new(Isa::Ppc64, &DecodeOptions::default().with(DisasmOption::LittleEndian));
        assert!(!spec.big_endian);
        let spec = HandleSpec::new(Isa::X86_64, &DecodeOptions::default().with(DisasmOption::BigEndian));
        assert!(!spec.big_endian);
    }
}
