//! The fact sink: the single writer that accumulates one decode pass, and
//! the read-only snapshot it hands to the rule engine.

use serde::Serialize;

use crate::builder::InstructionRecord;
use crate::decoder::DecodeFailure;
use crate::operand::{FpImmediate, Immediate, MemoryRef, Operand, OperandId, OperandTable, Register, Special};
use crate::{Address, ByteView, DisassemblyError, Isa};

/// An address that did not yield an instruction, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidFact {
    pub address: Address,
    pub reason: &'static str,
}

/// A decoded section's name and address range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionFact {
    pub name: String,
    pub start: Address,
    pub end: Address,
}

/// Counters for one decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Addresses a decode was attempted at
    pub attempts: u64,
    pub decoded: u64,
    pub truncated: u64,
    pub invalid: u64,
    pub unsupported: u64,
}

/// Append-only accumulator owned by the merge step of a pass.
#[derive(Debug)]
pub(crate) struct FactSink {
    isa: Isa,
    sections: Vec<SectionFact>,
    instructions: Vec<InstructionRecord>,
    invalid: Vec<InvalidFact>,
    operands: OperandTable,
    stats: PassStats,
    last_address: Option<Address>,
}

impl FactSink {
    pub(crate) fn new(isa: Isa) -> Self {
        Self {
            isa,
            sections: Vec::new(),
            instructions: Vec::new(),
            invalid: Vec::new(),
            operands: OperandTable::new(),
            stats: PassStats::default(),
            last_address: None,
        }
    }

    pub(crate) fn push_section(&mut self, name: &str, view: &ByteView<'_>) {
        self.sections.push(SectionFact {
            name: name.to_string(),
            start: view.base(),
            end: view.end(),
        });
    }

    pub(crate) fn operands_mut(&mut self) -> &mut OperandTable {
        &mut self.operands
    }

    pub(crate) fn stats(&self) -> PassStats {
        self.stats
    }

    pub(crate) fn operand_count(&self) -> usize {
        self.operands.len()
    }

    fn claim(&mut self, address: Address) -> Result<(), DisassemblyError> {
        if let Some(last) = self.last_address {
            if address <= last {
                return Err(DisassemblyError::Malformed {
                    address,
                    reason: format!("attempt recorded out of order after 0x{:x}", last),
                });
            }
        }
        self.last_address = Some(address);
        self.stats.attempts += 1;
        Ok(())
    }

    /// Record a successful decode; addresses must strictly increase
    pub(crate) fn push_instruction(&mut self, record: InstructionRecord) -> Result<(), DisassemblyError> {
        self.claim(record.address)?;
        self.stats.decoded += 1;
        self.instructions.push(record);
        Ok(())
    }

    /// Record a non-fatal failure at `address`
    pub(crate) fn push_failure(&mut self, address: Address, failure: &DecodeFailure) -> Result<(), DisassemblyError> {
        self.claim(address)?;
        match failure {
            DecodeFailure::Truncated { .. } => self.stats.truncated += 1,
            DecodeFailure::UnsupportedFeature(_) => self.stats.unsupported += 1,
            DecodeFailure::InvalidEncoding | DecodeFailure::Malformed(_) => self.stats.invalid += 1,
        }
        self.invalid.push(InvalidFact {
            address,
            reason: failure.reason(),
        });
        Ok(())
    }

    pub(crate) fn finish(self) -> FactSnapshot {
        FactSnapshot {
            isa: self.isa,
            sections: self.sections,
            instructions: self.instructions,
            invalid: self.invalid,
            operands: self.operands,
            stats: self.stats,
        }
    }
}

/// Immutable result of a decode pass.
///
/// Instructions are ordered by address; operand tables are ordered by
/// identity. Two passes over the same input produce equal snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactSnapshot {
    isa: Isa,
    sections: Vec<SectionFact>,
    instructions: Vec<InstructionRecord>,
    invalid: Vec<InvalidFact>,
    operands: OperandTable,
    stats: PassStats,
}

impl FactSnapshot {
    pub fn isa(&self) -> Isa {
        self.isa
    }

    /// Decoded sections in address order
    pub fn sections(&self) -> &[SectionFact] {
        &self.sections
    }

    /// Every successful decode, in address order
    pub fn instructions(&self) -> &[InstructionRecord] {
        &self.instructions
    }

    /// The instruction decoded at `address`, if any
    pub fn instruction(&self, address: Address) -> Option<&InstructionRecord> {
        self.instructions
            .binary_search_by_key(&address, |insn| insn.address)
            .ok()
            .map(|i| &self.instructions[i])
    }

    /// Addresses without an instruction, in address order
    pub fn invalid(&self) -> &[InvalidFact] {
        &self.invalid
    }

    /// The interned operands
    pub fn operands(&self) -> &OperandTable {
        &self.operands
    }

    pub fn operand(&self, id: OperandId) -> Option<&Operand> {
        self.operands.get(id)
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    /// `(instruction address, operand position, operand id)` rows; positions start at 1
    pub fn instruction_operands(&self) -> impl Iterator<Item = (Address, usize, OperandId)> + '_ {
        self.instructions.iter().flat_map(|insn| {
            insn.operands
                .iter()
                .enumerate()
                .map(move |(i, id)| (insn.address, i + 1, *id))
        })
    }

    pub fn registers(&self) -> impl Iterator<Item = (OperandId, &Register)> + '_ {
        self.operands.iter().filter_map(|(id, op)| match op {
            Operand::Register(r) => Some((id, r)),
            _ => None,
        })
    }

    pub fn immediates(&self) -> impl Iterator<Item = (OperandId, &Immediate)> + '_ {
        self.operands.iter().filter_map(|(id, op)| match op {
            Operand::Immediate(i) => Some((id, i)),
            _ => None,
        })
    }

    pub fn memory_refs(&self) -> impl Iterator<Item = (OperandId, &MemoryRef)> + '_ {
        self.operands.iter().filter_map(|(id, op)| match op {
            Operand::Memory(m) => Some((id, m)),
            _ => None,
        })
    }

    pub fn fp_immediates(&self) -> impl Iterator<Item = (OperandId, &FpImmediate)> + '_ {
        self.operands.iter().filter_map(|(id, op)| match op {
            Operand::FpImmediate(fp) => Some((id, fp)),
            _ => None,
        })
    }

    pub fn specials(&self) -> impl Iterator<Item = (OperandId, &Special)> + '_ {
        self.operands.iter().filter_map(|(id, op)| match op {
            Operand::Special(s) => Some((id, s)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{OpcodeClass, PrefixFlags};

    fn record(address: Address, operands: Vec<OperandId>) -> InstructionRecord {
        InstructionRecord {
            address,
            size: 1,
            isa: Isa::X86_64,
            opcode: OpcodeClass::new(1, "nop", "nop"),
            operands,
            prefixes: PrefixFlags::empty(),
            valid: true,
        }
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut sink = FactSink::new(Isa::X86_64);
        sink.push_instruction(record(0x1001, vec![])).unwrap();

        assert!(sink.push_instruction(record(0x1001, vec![])).is_err());
        assert!(sink.push_failure(0x1000, &DecodeFailure::InvalidEncoding).is_err());
        assert!(sink.push_failure(0x1002, &DecodeFailure::InvalidEncoding).is_ok());
    }

    #[test]
    fn test_snapshot_views() {
        let mut sink = FactSink::new(Isa::X86_64);
        let eax = sink.operands_mut().intern(Operand::register("eax", 4)).unwrap();
        let one = sink.operands_mut().intern(Operand::immediate(1, 4, true)).unwrap();

        sink.push_instruction(record(0x1000, vec![eax, one])).unwrap();
        sink.push_failure(0x1001, &DecodeFailure::Truncated { available: 1, needed: 5 }).unwrap();
        sink.push_instruction(record(0x1002, vec![eax])).unwrap();

        let facts = sink.finish();
        assert_eq!(facts.instruction(0x1002).map(|i| i.operands.len()), Some(1));
        assert!(facts.instruction(0x1001).is_none());
        assert_eq!(facts.invalid()[0].reason, "truncated");

        let rows: Vec<_> = facts.instruction_operands().collect();
        assert_eq!(rows, vec![(0x1000, 1, eax), (0x1000, 2, one), (0x1002, 1, eax)]);

        assert_eq!(facts.registers().count(), 1);
        assert_eq!(facts.immediates().count(), 1);
        assert_eq!(facts.memory_refs().count(), 0);

        let stats = facts.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.truncated, 1);
    }
}
