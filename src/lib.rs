//! Superset decoding and fact extraction for rule-based disassembly.
//!
//! This library decodes a candidate instruction at every byte offset of a
//! module's executable sections and turns the results into a compact set of
//! relations (instructions plus interned operands) that a Datalog-style rule
//! engine can consume. It never decides which candidates are real code; that
//! is left to the consumer of the facts.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use fact_decay::{ByteView, Isa, Module, Section};
//!
//! // Bytes of an executable section, mapped by the caller's loader
//! let text = vec![0x55, 0x48, 0x89, 0xe5, 0x5d, 0xc3];
//! let view = ByteView::new(0x401000, &text).unwrap();
//!
//! let module = Module::new("a.out", Isa::X86_64)
//!     .with_section(Section::new(".text", view, true));
//!
//! // Decode every offset and collect the relations
//! let facts = fact_decay::decode(&module, &["no-avx512"]).unwrap();
//!
//! for insn in facts.instructions() {
//!     println!("0x{:x}: {} ({} operands)", insn.address, insn.opcode.mnemonic, insn.operands.len());
//! }
//! ```

pub mod view;
pub mod decoder;
pub mod operand;
pub mod builder;
pub mod driver;
pub mod sink;
pub mod facts;

/// Represents an address in the module's virtual address space
pub type Address = u64;

use std::fmt;

use clap::ValueEnum;
use serde::{Serialize, Serializer};

pub use crate::builder::{InstructionBuilder, InstructionRecord, NormalizedInstruction};
pub use crate::decoder::{DecodeFailure, DecodeOptions, DisasmOption, IsaDecoder, RawInstruction};
pub use crate::driver::{decode, CancelToken, DecodeDriver, DriverConfig};
pub use crate::facts::{FactFormat, FactWriter};
pub use crate::operand::{Operand, OperandId, OperandKind, OperandTable};
pub use crate::sink::{FactSnapshot, PassStats};
pub use crate::view::ByteView;

/// Maximum instruction size in bytes across all supported ISAs (x86)
pub const MAX_INSTRUCTION_SIZE: usize = 15;

/// Supported instruction-set architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Isa {
    /// 32-bit x86
    #[value(name = "x86-32")]
    X86_32,
    /// 64-bit x86
    #[value(name = "x86-64")]
    X86_64,
    /// ARM (32-bit, A32 encoding)
    #[value(name = "arm")]
    Arm,
    /// ARM Thumb mode
    #[value(name = "thumb")]
    Thumb,
    /// AArch64 (ARM 64-bit)
    #[value(name = "aarch64")]
    AArch64,
    /// MIPS 32-bit
    #[value(name = "mips32")]
    Mips32,
    /// MIPS 64-bit
    #[value(name = "mips64")]
    Mips64,
    /// PowerPC 32-bit
    #[value(name = "ppc32")]
    Ppc32,
    /// PowerPC 64-bit
    #[value(name = "ppc64")]
    Ppc64,
    /// RISC-V 32-bit
    #[value(name = "riscv32")]
    RiscV32,
    /// RISC-V 64-bit
    #[value(name = "riscv64")]
    RiscV64,
}

impl Isa {
    /// Longest legal encoding in bytes.
    pub fn max_insn_len(&self) -> usize {
        match self {
            Isa::X86_32 | Isa::X86_64 => MAX_INSTRUCTION_SIZE,
            _ => 4,
        }
    }

    /// Natural word size in bytes, used for widths the encoding leaves implicit.
    pub fn word_size(&self) -> u8 {
        match self {
            Isa::X86_64 | Isa::AArch64 | Isa::Mips64 | Isa::Ppc64 | Isa::RiscV64 => 8,
            _ => 4,
        }
    }

    /// Upper bound on explicit operands the backend can report for this ISA.
    pub fn max_operands(&self) -> usize {
        match self {
            Isa::X86_32 | Isa::X86_64 => 8,
            // register lists (push/pop/ldm/stm) are reported operand by operand
            Isa::Arm | Isa::Thumb => 36,
            Isa::AArch64 => 8,
            Isa::Mips32 | Isa::Mips64 => 10,
            Isa::Ppc32 | Isa::Ppc64 => 8,
            Isa::RiscV32 | Isa::RiscV64 => 8,
        }
    }

    /// True for the variable-length x86 family.
    pub fn is_x86(&self) -> bool {
        matches!(self, Isa::X86_32 | Isa::X86_64)
    }

    /// Short name used in relation rows.
    pub fn name(&self) -> &'static str {
        match self {
            Isa::X86_32 => "x86-32",
            Isa::X86_64 => "x86-64",
            Isa::Arm => "arm",
            Isa::Thumb => "thumb",
            Isa::AArch64 => "aarch64",
            Isa::Mips32 => "mips32",
            Isa::Mips64 => "mips64",
            Isa::Ppc32 => "ppc32",
            Isa::Ppc64 => "ppc64",
            Isa::RiscV32 => "riscv32",
            Isa::RiscV64 => "riscv64",
        }
    }
}

/// Serialized by relation name, so JSON and `.facts` exports agree
impl Serialize for Isa {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isa::X86_32 => write!(f, "x86-32"),
            Isa::X86_64 => write!(f, "x86-64"),
            Isa::Arm => write!(f, "ARM"),
            Isa::Thumb => write!(f, "Thumb"),
            Isa::AArch64 => write!(f, "AArch64"),
            Isa::Mips32 => write!(f, "MIPS32"),
            Isa::Mips64 => write!(f, "MIPS64"),
            Isa::Ppc32 => write!(f, "PowerPC 32"),
            Isa::Ppc64 => write!(f, "PowerPC 64"),
            Isa::RiscV32 => write!(f, "RISC-V 32"),
            Isa::RiscV64 => write!(f, "RISC-V 64"),
        }
    }
}

/// Decoder trait: decodes exactly one instruction for one ISA.
///
/// Implementors must be `Send + Sync` so the driver can decode disjoint
/// address ranges in parallel.
pub trait Decoder: Send + Sync {
    /// The ISA this decoder was built for
    fn isa(&self) -> Isa;

    /// Decode a single instruction starting at `at`.
    ///
    /// # Arguments
    /// * `view` - The section bytes to decode from
    /// * `at` - Address inside `view` where the instruction starts
    ///
    /// # Returns
    /// The raw, architecture-native decode, or the reason this address does not
    /// start an instruction
    fn decode_one(&self, view: &ByteView<'_>, at: Address) -> Result<RawInstruction, DecodeFailure>;
}

/// A section handed over by the binary loader.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    /// Section name
    pub name: &'a str,
    /// Bytes of the section at their load address
    pub view: ByteView<'a>,
    /// Whether this section contains executable code
    pub executable: bool,
}

impl<'a> Section<'a> {
    /// Create a new section
    pub fn new(name: &'a str, view: ByteView<'a>, executable: bool) -> Self {
        Self {
            name,
            view,
            executable,
        }
    }
}

/// A loaded module: its declared ISA and its sections.
#[derive(Debug, Clone)]
pub struct Module<'a> {
    /// Module name, for diagnostics only
    pub name: &'a str,
    /// ISA declared by the container format
    pub isa: Isa,
    /// Sections in loader order
    pub sections: Vec<Section<'a>>,
}

impl<'a> Module<'a> {
    /// Create a module with no sections
    pub fn new(name: &'a str, isa: Isa) -> Self {
        Self {
            name,
            isa,
            sections: Vec::new(),
        }
    }

    /// Append a section
    pub fn with_section(mut self, section: Section<'a>) -> Self {
        self.sections.push(section);
        self
    }

    /// Executable sections sorted by start address
    pub fn executable_sections(&self) -> Vec<&Section<'a>> {
        let mut sections: Vec<_> = self.sections.iter().filter(|s| s.executable).collect();
        sections.sort_by_key(|s| s.view.base());
        sections
    }
}

/// Error type for decode passes
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// A decode reached the fact relations in an inconsistent shape
    #[error("Malformed instruction at 0x{address:x}: {reason}")]
    Malformed { address: Address, reason: String },

    /// The operand table could not grow
    #[error("Resource exhausted at 0x{address:x}: {source}")]
    ResourceExhausted {
        address: Address,
        #[source]
        source: operand::OperandTableError,
    },

    /// The caller aborted the pass
    #[error("Decode pass cancelled")]
    Cancelled,

    /// Decoder backend error
    #[error("Decoder error: {0}")]
    Decoder(#[from] decoder::DecoderError),

    /// A byte view would run past the end of the address space
    #[error("Byte view at 0x{base:x} with {len} bytes overflows the address space")]
    AddressOverflow { base: Address, len: usize },

    /// Two sections of one module share addresses
    #[error("Sections '{first}' and '{second}' overlap")]
    OverlappingSections { first: String, second: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Fact file encoding error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// No relation of that name in the fact schema
    #[error("Unknown relation '{0}'")]
    UnknownRelation(String),

    /// Schema manifest encoding error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
