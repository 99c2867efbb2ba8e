//! Versioned relation schema shared with the rule engine.
//!
//! Column types follow Soufflé's attribute types so the declarations can be
//! pasted into a program unchanged.

use std::fmt;

use serde::Serialize;

/// Bumped whenever a relation, column or column order changes
pub const SCHEMA_VERSION: u32 = 1;

/// Attribute type of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Unsigned,
    Number,
    Float,
    Symbol,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Unsigned => write!(f, "unsigned"),
            ColumnType::Number => write!(f, "number"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Symbol => write!(f, "symbol"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> Column {
    Column { name, ty }
}

/// One relation: a name and its ordered columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl Relation {
    /// Soufflé `.decl` line for this relation
    pub fn declaration(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.ty))
            .collect::<Vec<_>>()
            .join(", ");
        format!(".decl {}({})", self.name, columns)
    }

    /// File name the relation is exported to
    pub fn file_name(&self) -> String {
        format!("{}.facts", self.name)
    }
}

use ColumnType::{Float, Number, Symbol, Unsigned};

pub const INSTRUCTION: Relation = Relation {
    name: "instruction",
    columns: &[
        col("address", Unsigned),
        col("size", Unsigned),
        col("isa", Symbol),
        col("opcode_id", Unsigned),
        col("opcode", Symbol),
        col("mnemonic", Symbol),
        col("operand_count", Unsigned),
        col("prefixes", Symbol),
        col("valid", Unsigned),
    ],
};

pub const INSTRUCTION_OPERAND: Relation = Relation {
    name: "instruction_operand",
    columns: &[col("address", Unsigned), col("index", Unsigned), col("operand", Unsigned)],
};

pub const OP_REGDIRECT: Relation = Relation {
    name: "op_regdirect",
    columns: &[col("operand", Unsigned), col("register", Symbol), col("width", Unsigned)],
};

pub const OP_IMMEDIATE: Relation = Relation {
    name: "op_immediate",
    columns: &[
        col("operand", Unsigned),
        col("value", Number),
        col("width", Unsigned),
        col("signed", Unsigned),
    ],
};

pub const OP_INDIRECT: Relation = Relation {
    name: "op_indirect",
    columns: &[
        col("operand", Unsigned),
        col("segment", Symbol),
        col("base", Symbol),
        col("index", Symbol),
        col("scale", Number),
        col("displacement", Number),
        col("width", Unsigned),
    ],
};

pub const OP_FP_IMMEDIATE: Relation = Relation {
    name: "op_fp_immediate",
    columns: &[col("operand", Unsigned), col("value", Float), col("width", Unsigned)],
};

pub const OP_SPECIAL: Relation = Relation {
    name: "op_special",
    columns: &[col("operand", Unsigned), col("kind", Symbol), col("text", Symbol)],
};

pub const INVALID_OP_CODE: Relation = Relation {
    name: "invalid_op_code",
    columns: &[col("address", Unsigned), col("reason", Symbol)],
};

pub const SECTION: Relation = Relation {
    name: "section",
    columns: &[col("name", Symbol), col("start", Unsigned), col("end", Unsigned)],
};

/// Every relation, in export order
pub const RELATIONS: &[Relation] = &[
    INSTRUCTION,
    INSTRUCTION_OPERAND,
    OP_REGDIRECT,
    OP_IMMEDIATE,
    OP_INDIRECT,
    OP_FP_IMMEDIATE,
    OP_SPECIAL,
    INVALID_OP_CODE,
    SECTION,
];

/// Look a relation up by name
pub fn relation(name: &str) -> Option<&'static Relation> {
    RELATIONS.iter().find(|r| r.name == name)
}

/// Machine-readable description of the schema, written next to the facts.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaManifest {
    pub version: u32,
    pub relations: &'static [Relation],
}

pub fn manifest() -> SchemaManifest {
    SchemaManifest {
        version: SCHEMA_VERSION,
        relations: RELATIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_names_unique() {
        let mut names: Vec<_> = RELATIONS.iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RELATIONS.len());
    }

    #[test]
    fn test_declaration() {
        assert_eq!(
            INVALID_OP_CODE.declaration(),
            ".decl invalid_op_code(address:unsigned, reason:symbol)"
        );
        assert_eq!(relation("op_regdirect").map(|r| r.columns.len()), Some(3));
        assert!(relation("op_shifted").is_none());
    }

    #[test]
    fn test_manifest_json() {
        let json = serde_json::to_value(manifest()).unwrap();
        assert_eq!(json["version"], SCHEMA_VERSION);
        assert_eq!(json["relations"][0]["name"], "instruction");
        assert_eq!(json["relations"][0]["columns"][0]["type"], "unsigned");
    }
}
