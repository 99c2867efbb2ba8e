//! Disassembly-mode options supplied as strings by the caller.

use clap::ValueEnum;

/// Recognized disassembly-mode option strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum DisasmOption {
    /// Decode ARM modules as Thumb
    #[value(name = "thumb")]
    Thumb,
    /// Big-endian byte order (ARM, AArch64, MIPS, PPC)
    #[value(name = "big-endian")]
    BigEndian,
    /// Little-endian byte order (PPC defaults to big-endian)
    #[value(name = "little-endian")]
    LittleEndian,
    /// Cortex-M profile for ARM/Thumb
    #[value(name = "arm-mclass")]
    ArmMClass,
    /// ARMv8 A32/T32 encodings
    #[value(name = "arm-v8")]
    ArmV8,
    /// microMIPS encodings
    #[value(name = "micromips")]
    MicroMips,
    /// RISC-V compressed (C extension) encodings
    #[value(name = "riscv-compressed")]
    RiscVCompressed,
    /// Reject AVX/AVX2/FMA instructions
    #[value(name = "no-avx")]
    NoAvx,
    /// Reject AVX-512 instructions
    #[value(name = "no-avx512")]
    NoAvx512,
    /// Reject privileged instructions
    #[value(name = "no-privileged")]
    NoPrivileged,
}

/// Decoder behavior selected by option strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecodeOptions {
    pub thumb: bool,
    /// `None` keeps the ISA's default byte order
    pub big_endian: Option<bool>,
    pub arm_mclass: bool,
    pub arm_v8: bool,
    pub micromips: bool,
    pub riscv_compressed: bool,
    pub no_avx: bool,
    pub no_avx512: bool,
    pub no_privileged: bool,
}

impl DecodeOptions {
    /// Parse option strings, returning the options and every unrecognized string.
    ///
    /// Reporting unrecognized strings is the caller's business; the decoder
    /// ignores them.
    pub fn parse<S: AsRef<str>>(options: &[S]) -> (Self, Vec<String>) {
        let mut parsed = DecodeOptions::default();
        let mut unrecognized = Vec::new();

        for raw in options {
            let raw = raw.as_ref().trim();
            match DisasmOption::from_str(raw, true) {
                Ok(option) => parsed.apply(option),
                Err(_) => {
                    log::debug!("Ignoring unrecognized disassembly option '{}'", raw);
                    unrecognized.push(raw.to_string());
                }
            }
        }

        (parsed, unrecognized)
    }

    /// Turn one option on
    pub fn apply(&mut self, option: DisasmOption) {
        match option {
            DisasmOption::Thumb => self.thumb = true,
            DisasmOption::BigEndian => self.big_endian = Some(true),
            DisasmOption::LittleEndian => self.big_endian = Some(false),
            DisasmOption::ArmMClass => self.arm_mclass = true,
            DisasmOption::ArmV8 => self.arm_v8 = true,
            DisasmOption::MicroMips => self.micromips = true,
            DisasmOption::RiscVCompressed => self.riscv_compressed = true,
            DisasmOption::NoAvx => self.no_avx = true,
            DisasmOption::NoAvx512 => self.no_avx512 = true,
            DisasmOption::NoPrivileged => self.no_privileged = true,
        }
    }

    /// Builder-style variant of [`DecodeOptions::apply`]
    pub fn with(mut self, option: DisasmOption) -> Self {
        self.apply(option);
        self
    }
}
