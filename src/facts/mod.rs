//! Fact export: Soufflé-style tab-separated `.facts` files, one per
//! relation, or a single JSON document.

pub mod schema;

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::operand::{Operand, OperandId};
use crate::sink::{FactSnapshot, InvalidFact, PassStats, SectionFact};
use crate::builder::InstructionRecord;
use crate::{DisassemblyError, Isa};

use self::schema::Relation;

/// Placeholder for an absent register in `op_indirect`
const NONE: &str = "NONE";

/// Supported export layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FactFormat {
    /// One tab-separated `<relation>.facts` file per relation plus `schema.json`
    #[default]
    Facts,
    /// A single `facts.json` document
    Json,
}

impl fmt::Display for FactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactFormat::Facts => write!(f, "facts"),
            FactFormat::Json => write!(f, "json"),
        }
    }
}

/// Writes a snapshot's relations into a directory.
#[derive(Debug, Clone)]
pub struct FactWriter {
    dir: PathBuf,
    format: FactFormat,
}

impl FactWriter {
    /// Create a new writer targeting `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            format: FactFormat::default(),
        }
    }

    pub fn with_format(mut self, format: FactFormat) -> Self {
        self.format = format;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every relation and return the files created.
    pub fn write(&self, snapshot: &FactSnapshot) -> Result<Vec<PathBuf>, DisassemblyError> {
        fs::create_dir_all(&self.dir)?;

        let paths = match self.format {
            FactFormat::Facts => {
                let mut paths = Vec::with_capacity(schema::RELATIONS.len() + 1);
                for relation in schema::RELATIONS {
                    let path = self.dir.join(relation.file_name());
                    let file = BufWriter::new(File::create(&path)?);
                    write_relation(snapshot, relation, file)?;
                    paths.push(path);
                }

                let path = self.dir.join("schema.json");
                let mut file = BufWriter::new(File::create(&path)?);
                serde_json::to_writer_pretty(&mut file, &schema::manifest())?;
                file.flush()?;
                paths.push(path);
                paths
            }
            FactFormat::Json => {
                let path = self.dir.join("facts.json");
                let mut file = BufWriter::new(File::create(&path)?);
                serde_json::to_writer_pretty(&mut file, &JsonFacts::new(snapshot))?;
                file.flush()?;
                vec![path]
            }
        };

        log::info!(
            "Wrote {} instructions and {} operands to {} as {}",
            snapshot.instructions().len(),
            snapshot.operands().len(),
            self.dir.display(),
            self.format
        );
        Ok(paths)
    }
}

/// Write the rows of one relation as tab-separated values without a header.
pub fn write_relation<W: Write>(snapshot: &FactSnapshot, relation: &Relation, writer: W) -> Result<(), DisassemblyError> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(writer);

    match relation.name {
        "instruction" => {
            for insn in snapshot.instructions() {
                out.serialize((
                    insn.address,
                    insn.size,
                    insn.isa.name(),
                    insn.opcode.id,
                    sanitize(&insn.opcode.name),
                    sanitize(&insn.opcode.mnemonic),
                    insn.operands.len(),
                    insn.prefixes.names(),
                    insn.valid as u8,
                ))?;
            }
        }
        "instruction_operand" => {
            for (address, index, id) in snapshot.instruction_operands() {
                out.serialize((address, index, id))?;
            }
        }
        "op_regdirect" => {
            for (id, reg) in snapshot.registers() {
                out.serialize((id, sanitize(&reg.name), reg.width))?;
            }
        }
        "op_immediate" => {
            for (id, imm) in snapshot.immediates() {
                out.serialize((id, imm.value, imm.width, imm.signed as u8))?;
            }
        }
        "op_indirect" => {
            for (id, mem) in snapshot.memory_refs() {
                out.serialize((
                    id,
                    mem.segment.as_deref().unwrap_or(NONE),
                    mem.base.as_deref().unwrap_or(NONE),
                    mem.index.as_deref().unwrap_or(NONE),
                    mem.scale,
                    mem.displacement,
                    mem.width,
                ))?;
            }
        }
        "op_fp_immediate" => {
            for (id, fp) in snapshot.fp_immediates() {
                out.serialize((id, fp.value(), fp.width))?;
            }
        }
        "op_special" => {
            for (id, special) in snapshot.specials() {
                out.serialize((id, sanitize(&special.kind), sanitize(&special.text)))?;
            }
        }
        "invalid_op_code" => {
            for invalid in snapshot.invalid() {
                out.serialize((invalid.address, invalid.reason))?;
            }
        }
        "section" => {
            for section in snapshot.sections() {
                out.serialize((sanitize(&section.name), section.start, section.end))?;
            }
        }
        other => return Err(DisassemblyError::UnknownRelation(other.to_string())),
    }

    out.flush()?;
    Ok(())
}

/// Render one relation to a string
pub fn relation_to_string(snapshot: &FactSnapshot, relation: &Relation) -> Result<String, DisassemblyError> {
    let mut buf = Vec::new();
    write_relation(snapshot, relation, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Symbols must not contain the field or record separators
fn sanitize(symbol: &str) -> String {
    symbol.replace(['\t', '\n', '\r'], " ")
}

#[derive(Serialize)]
struct JsonOperand<'a> {
    id: OperandId,
    #[serde(flatten)]
    operand: &'a Operand,
}

#[derive(Serialize)]
struct JsonFacts<'a> {
    schema_version: u32,
    isa: Isa,
    sections: &'a [SectionFact],
    instructions: &'a [InstructionRecord],
    invalid: &'a [InvalidFact],
    operands: Vec<JsonOperand<'a>>,
    stats: PassStats,
}

impl<'a> JsonFacts<'a> {
    fn new(snapshot: &'a FactSnapshot) -> Self {
        Self {
            schema_version: schema::SCHEMA_VERSION,
            isa: snapshot.isa(),
            sections: snapshot.sections(),
            instructions: snapshot.instructions(),
            invalid: snapshot.invalid(),
            operands: snapshot
                .operands()
                .iter()
                .map(|(id, operand)| JsonOperand { id, operand })
                .collect(),
            stats: snapshot.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteView, DecodeDriver, IsaDecoder};
    use tempfile::tempdir;

    fn snapshot() -> FactSnapshot {
        // push rbp; mov rbp, rsp
        let bytes = [0x55, 0x48, 0x89, 0xe5];
        let view = ByteView::new(0x1000, &bytes).unwrap();
        let decoder = IsaDecoder::for_architecture(Isa::X86_64).unwrap();
        DecodeDriver::new(decoder).decode_section(&view).unwrap()
    }

    #[test]
    fn test_every_relation_writable() {
        let facts = snapshot();
        for relation in schema::RELATIONS {
            let text = relation_to_string(&facts, relation).unwrap();
            for line in text.lines() {
                assert_eq!(line.split('\t').count(), relation.columns.len(), "{}: {}", relation.name, line);
            }
        }
    }

    #[test]
    fn test_instruction_rows() {
        let facts = snapshot();
        let text = relation_to_string(&facts, &schema::INSTRUCTION).unwrap();
        let first = text.lines().next().unwrap();
        assert!(first.starts_with("4096\t1\tx86-64\t"));
        assert!(first.ends_with("\t1\t\t1"));
    }

    #[test]
    fn test_unknown_relation() {
        let facts = snapshot();
        let bogus = Relation {
            name: "op_shifted",
            columns: &[],
        };
        assert!(matches!(
            relation_to_string(&facts, &bogus),
            Err(DisassemblyError::UnknownRelation(_))
        ));
    }

    #[test]
    fn test_write_facts_dir() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = FactWriter::new(dir.path()).write(&snapshot())?;

        assert_eq!(paths.len(), schema::RELATIONS.len() + 1);
        let regs = fs::read_to_string(dir.path().join("op_regdirect.facts"))?;
        assert!(regs.lines().any(|l| l.ends_with("\trbp\t8")));

        let manifest: serde_json::Value = serde_json::from_str(&fs::read_to_string(dir.path().join("schema.json"))?)?;
        assert_eq!(manifest["version"], schema::SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn test_write_json() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = FactWriter::new(dir.path().join("out"))
            .with_format(FactFormat::Json)
            .write(&snapshot())?;

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths[0])?)?;
        assert_eq!(json["isa"], "x86-64");
        assert_eq!(json["instructions"][0]["address"], 0x1000);
        assert_eq!(json["instructions"][0]["isa"], "x86-64");
        // mov rbp, rsp carries REX.W
        assert_eq!(json["instructions"][1]["prefixes"], serde_json::json!(["rex", "rex_w"]));
        assert_eq!(json["operands"][0]["id"], 1);
        assert_eq!(json["operands"][0]["type"], "register");
        assert_eq!(json["operands"][0]["name"], "rbp");
        Ok(())
    }
}
