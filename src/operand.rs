//! Normalized operands and the deduplicating operand table.

use std::collections::HashMap;
use std::collections::TryReserveError;
use std::fmt;

use serde::Serialize;

/// A register operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Register {
    /// Register name as the ISA spells it (`eax`, `x0`, `$t1`, ...)
    pub name: String,
    /// Width in bytes
    pub width: u8,
}

/// An immediate operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Immediate {
    /// Value, sign-extended to 64 bits when `signed`
    pub value: i64,
    /// Encoded width in bytes
    pub width: u8,
    /// Whether the encoding treats the value as signed
    pub signed: bool,
}

/// A memory reference: `segment:[base + index * scale + displacement]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryRef {
    pub segment: Option<String>,
    pub base: Option<String>,
    pub index: Option<String>,
    pub scale: i32,
    pub displacement: i64,
    /// Access width in bytes, `0` when the instruction does not fix one
    pub width: u8,
}

/// A floating-point immediate, kept as its bit pattern so equality is exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FpImmediate {
    pub bits: u64,
    pub width: u8,
}

impl FpImmediate {
    pub fn new(value: f64, width: u8) -> Self {
        Self {
            bits: value.to_bits(),
            width,
        }
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits)
    }
}

/// An architecture-specific operand with no generic shape (system registers,
/// barrier options, condition fields, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Special {
    pub kind: String,
    pub text: String,
}

/// One normalized operand.
///
/// Two operands are the same operand iff every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Register(Register),
    Immediate(Immediate),
    Memory(MemoryRef),
    FpImmediate(FpImmediate),
    Special(Special),
}

impl Operand {
    /// Shorthand for a register operand
    pub fn register(name: impl Into<String>, width: u8) -> Self {
        Operand::Register(Register {
            name: name.into(),
            width,
        })
    }

    /// Shorthand for an immediate operand
    pub fn immediate(value: i64, width: u8, signed: bool) -> Self {
        Operand::Immediate(Immediate {
            value,
            width,
            signed,
        })
    }

    /// Which relation this operand belongs to
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register(_) => OperandKind::Register,
            Operand::Immediate(_) => OperandKind::Immediate,
            Operand::Memory(_) => OperandKind::Memory,
            Operand::FpImmediate(_) => OperandKind::FpImmediate,
            Operand::Special(_) => OperandKind::Special,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "{}", r.name),
            Operand::Immediate(i) if i.signed => write!(f, "{}", i.value),
            Operand::Immediate(i) => write!(f, "0x{:x}", i.value as u64),
            Operand::Memory(m) => {
                if let Some(seg) = &m.segment {
                    write!(f, "{}:", seg)?;
                }
                write!(f, "[")?;
                let mut parts = Vec::new();
                if let Some(base) = &m.base {
                    parts.push(base.clone());
                }
                if let Some(index) = &m.index {
                    parts.push(format!("{}*{}", index, m.scale));
                }
                if m.displacement != 0 || parts.is_empty() {
                    parts.push(format!("{}", m.displacement));
                }
                write!(f, "{}]", parts.join(" + "))
            }
            Operand::FpImmediate(fp) => write!(f, "#{}", fp.value()),
            Operand::Special(s) => write!(f, "{}", s.text),
        }
    }
}

/// The operand relations, one per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Register,
    Immediate,
    Memory,
    FpImmediate,
    Special,
}

impl OperandKind {
    /// Name of the relation holding operands of this kind
    pub fn relation(&self) -> &'static str {
        match self {
            OperandKind::Register => "op_regdirect",
            OperandKind::Immediate => "op_immediate",
            OperandKind::Memory => "op_indirect",
            OperandKind::FpImmediate => "op_fp_immediate",
            OperandKind::Special => "op_special",
        }
    }
}

/// Stable identity of an interned operand.
///
/// Identities start at 1 and follow first-seen order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OperandId(u32);

impl OperandId {
    pub fn get(&self) -> u32 {
        self.0
    }

    fn index(&self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for OperandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when the operand table cannot grow.
#[derive(Debug, thiserror::Error)]
pub enum OperandTableError {
    /// Every 32-bit identity is taken
    #[error("operand identities exhausted")]
    Exhausted,

    /// The allocator refused to grow the table
    #[error("operand table allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Append-only interning table.
#[derive(Debug, Clone, Default)]
pub struct OperandTable {
    ids: HashMap<Operand, OperandId>,
    operands: Vec<Operand>,
}

impl OperandTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the identity of `operand`, assigning the next one if it is new.
    pub fn intern(&mut self, operand: Operand) -> Result<OperandId, OperandTableError> {
        if let Some(id) = self.ids.get(&operand) {
            return Ok(*id);
        }

        let next = u32::try_from(self.operands.len() + 1).map_err(|_| OperandTableError::Exhausted)?;
        if next == u32::MAX {
            return Err(OperandTableError::Exhausted);
        }
        self.operands.try_reserve(1)?;
        self.ids.try_reserve(1)?;

        let id = OperandId(next);
        self.operands.push(operand.clone());
        self.ids.insert(operand, id);
        Ok(id)
    }

    /// Identity of an already interned operand
    pub fn lookup(&self, operand: &Operand) -> Option<OperandId> {
        self.ids.get(operand).copied()
    }

    /// Operand behind an identity
    pub fn get(&self, id: OperandId) -> Option<&Operand> {
        if id.0 == 0 {
            return None;
        }
        self.operands.get(id.index())
    }

    /// Number of distinct operands
    pub fn len(&self) -> usize {
        self.operands.len()
    }

    /// True if nothing was interned yet
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    /// All operands in identity order
    pub fn iter(&self) -> impl Iterator<Item = (OperandId, &Operand)> {
        self.operands
            .iter()
            .enumerate()
            .map(|(i, op)| (OperandId(i as u32 + 1), op))
    }
}

impl PartialEq for OperandTable {
    fn eq(&self, other: &Self) -> bool {
        // the map is derived from the vector
        self.operands == other.operands
    }
}

impl Eq for OperandTable {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mem(base: &str, disp: i64, width: u8) -> Operand {
        Operand::Memory(MemoryRef {
            segment: None,
            base: Some(base.to_string()),
            index: None,
            scale: 1,
            displacement: disp,
            width,
        })
    }

    #[test]
    fn test_first_seen_numbering() {
        let mut table = OperandTable::new();

        let eax = table.intern(Operand::register("eax", 4)).unwrap();
        let imm = table.intern(Operand::immediate(1, 4, true)).unwrap();
        let eax_again = table.intern(Operand::register("eax", 4)).unwrap();

        assert_eq!(eax.get(), 1);
        assert_eq!(imm.get(), 2);
        assert_eq!(eax, eax_again);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_width_and_scale_distinguish() {
        let mut table = OperandTable::new();

        let a = table.intern(mem("rbp", -8, 8)).unwrap();
        let b = table.intern(mem("rbp", -8, 4)).unwrap();
        let c = table.intern(Operand::immediate(1, 1, true)).unwrap();
        let d = table.intern(Operand::immediate(1, 4, true)).unwrap();
        let e = table.intern(Operand::immediate(1, 4, false)).unwrap();

        assert_ne!(a, b);
        assert_ne!(c, d);
        assert_ne!(d, e);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_get_and_lookup() {
        let mut table = OperandTable::new();
        let id = table.intern(Operand::register("x0", 8)).unwrap();

        assert_eq!(table.get(id), Some(&Operand::register("x0", 8)));
        assert_eq!(table.lookup(&Operand::register("x0", 8)), Some(id));
        assert_eq!(table.lookup(&Operand::register("x1", 8)), None);
        assert_eq!(table.get(OperandId(0)), None);
        assert_eq!(table.get(OperandId(7)), None);
    }

    #[test]
    fn test_fp_immediate_bits() {
        let mut table = OperandTable::new();
        let pos = table.intern(Operand::FpImmediate(FpImmediate::new(0.0, 8))).unwrap();
        let neg = table.intern(Operand::FpImmediate(FpImmediate::new(-0.0, 8))).unwrap();

        // 0.0 == -0.0 numerically, but the encodings differ
        assert_ne!(pos, neg);
    }

    #[test]
    fn test_display() {
        let op = Operand::Memory(MemoryRef {
            segment: Some("fs".to_string()),
            base: Some("rax".to_string()),
            index: Some("rcx".to_string()),
            scale: 8,
            displacement: 16,
            width: 8,
        });
        assert_eq!(op.to_string(), "fs:[rax + rcx*8 + 16]");
        assert_eq!(Operand::immediate(255, 1, false).to_string(), "0xff");
    }

    fn arb_operand() -> impl Strategy<Value = Operand> {
        let names = prop_oneof![Just("eax"), Just("ebx"), Just("rsp"), Just("x0")];
        prop_oneof![
            (names.clone(), prop_oneof![Just(4u8), Just(8u8)])
                .prop_map(|(n, w)| Operand::register(n, w)),
            (-4i64..4, prop_oneof![Just(1u8), Just(4u8)], any::<bool>())
                .prop_map(|(v, w, s)| Operand::immediate(v, w, s)),
            (names, -2i64..2, prop_oneof![Just(1i32), Just(2i32)]).prop_map(|(b, d, s)| {
                Operand::Memory(MemoryRef {
                    segment: None,
                    base: Some(b.to_string()),
                    index: None,
                    scale: s,
                    displacement: d,
                    width: 4,
                })
            }),
        ]
    }

    proptest! {
        #[test]
        fn interning_matches_structural_equality(ops in proptest::collection::vec(arb_operand(), 1..64)) {
            let mut table = OperandTable::new();
            let ids: Vec<_> = ops.iter().map(|op| table.intern(op.clone()).unwrap()).collect();

            for (i, a) in ops.iter().enumerate() {
                for (j, b) in ops.iter().enumerate() {
                    prop_assert_eq!(a == b, ids[i] == ids[j]);
                }
            }

            let distinct: std::collections::HashSet<_> = ops.iter().collect();
            prop_assert_eq!(table.len(), distinct.len());
        }
    }
}
