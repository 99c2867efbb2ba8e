//! Architecture-native decode results, before normalization.

use bitflags::bitflags;
use serde::{Serialize, Serializer};

bitflags! {
    /// Prefix and encoding bits that survive into the instruction relation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrefixFlags: u16 {
        const LOCK = 1 << 0;
        const REP = 1 << 1;
        const REPNE = 1 << 2;
        const SEGMENT = 1 << 3;
        const OPERAND_SIZE = 1 << 4;
        const ADDRESS_SIZE = 1 << 5;
        const REX = 1 << 6;
        const REX_W = 1 << 7;
    }
}

impl PrefixFlags {
    /// Decode the legacy prefix bytes capstone reports for x86
    pub fn from_x86(prefix: &[u8; 4], rex: u8) -> Self {
        let mut flags = PrefixFlags::empty();
        match prefix[0] {
            0xf0 => flags |= PrefixFlags::LOCK,
            0xf3 => flags |= PrefixFlags::REP,
            0xf2 => flags |= PrefixFlags::REPNE,
            _ => {}
        }
        if prefix[1] != 0 {
            flags |= PrefixFlags::SEGMENT;
        }
        if prefix[2] == 0x66 {
            flags |= PrefixFlags::OPERAND_SIZE;
        }
        if prefix[3] == 0x67 {
            flags |= PrefixFlags::ADDRESS_SIZE;
        }
        if rex != 0 {
            flags |= PrefixFlags::REX;
            if rex & 0x08 != 0 {
                flags |= PrefixFlags::REX_W;
            }
        }
        flags
    }

    /// Space separated prefix names, as emitted in the `instruction` relation
    pub fn names(&self) -> String {
        self.iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Serialized as the list of prefix names, matching the `.facts` rows
impl Serialize for PrefixFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter_names().map(|(name, _)| name.to_ascii_lowercase()))
    }
}

/// Opcode class of a decoded instruction.
///
/// `name` is the backend's canonical instruction name (no condition suffix,
/// no prefixes); `mnemonic` is what the backend prints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OpcodeClass {
    pub id: u32,
    pub name: String,
    pub mnemonic: String,
}

impl OpcodeClass {
    pub fn new(id: u32, name: impl Into<String>, mnemonic: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mnemonic: mnemonic.into(),
        }
    }
}

/// One operand as the decoder backend describes it.
///
/// A `size` of `0` means the backend did not report a width and the
/// architecture mode implies it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOperand {
    Register {
        name: String,
        size: u8,
    },
    Immediate {
        value: i64,
        size: u8,
    },
    FpImmediate {
        value: f64,
    },
    Memory {
        segment: Option<String>,
        base: Option<String>,
        index: Option<String>,
        scale: i32,
        displacement: i64,
        size: u8,
    },
    Special {
        kind: &'static str,
        text: String,
    },
}

/// A successful single-instruction decode.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstruction {
    /// Encoded length in bytes (at least 1)
    pub size: u8,
    pub opcode: OpcodeClass,
    pub operands: Vec<RawOperand>,
    /// Operand count the backend declared for this encoding
    pub declared_operands: usize,
    pub prefixes: PrefixFlags,
}

impl RawInstruction {
    /// Build a raw instruction whose declared count matches its operands
    pub fn new(size: u8, opcode: OpcodeClass, operands: Vec<RawOperand>) -> Self {
        let declared_operands = operands.len();
        Self {
            size,
            opcode,
            operands,
            declared_operands,
            prefixes: PrefixFlags::empty(),
        }
    }

    /// Attach prefix bits
    pub fn with_prefixes(mut self, prefixes: PrefixFlags) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Override the declared operand count
    pub fn with_declared(mut self, declared_operands: usize) -> Self {
        self.declared_operands = declared_operands;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x86_prefix_bytes() {
        let flags = PrefixFlags::from_x86(&[0xf0, 0x64, 0x66, 0x00], 0x48);
        assert!(flags.contains(PrefixFlags::LOCK));
        assert!(flags.contains(PrefixFlags::SEGMENT));
        assert!(flags.contains(PrefixFlags::OPERAND_SIZE));
        assert!(!flags.contains(PrefixFlags::ADDRESS_SIZE));
        assert!(flags.contains(PrefixFlags::REX | PrefixFlags::REX_W));

        assert_eq!(PrefixFlags::from_x86(&[0, 0, 0, 0], 0), PrefixFlags::empty());
    }

    #[test]
    fn test_prefix_names() {
        let flags = PrefixFlags::LOCK | PrefixFlags::REX;
        assert_eq!(flags.names(), "lock rex");
        assert_eq!(PrefixFlags::empty().names(), "");
    }
}
