// Declarative warehouse schema.
// Tables are described once here; the resolver, the fact writer and the DDL
// generator are all driven by these descriptors.

pub mod ddl;
pub mod tables;

use crate::value::Normalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
    Double,
    Boolean,
    Date,
    /// BIGINT foreign key to the `id` of the named table.
    Key(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub normalization: Normalization,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            normalization: Normalization::Trim,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn key(name: &'static str, target: &'static str) -> Self {
        Self::new(name, ColumnType::Key(target))
    }

    pub const fn normalized(self, normalization: Normalization) -> Self {
        Self {
            normalization,
            ..self
        }
    }
}

/// Append-only table deduplicated on its natural-key columns.
#[derive(Debug, Clone, Copy)]
pub struct DimensionTable {
    pub name: &'static str,
    pub key_columns: &'static [Column],
    /// Stored on creation only; never part of the match.
    pub attribute_columns: &'static [Column],
}

impl DimensionTable {
    pub fn key_column(&self, name: &str) -> Option<&Column> {
        self.key_columns.iter().find(|c| c.name == name)
    }

    pub fn attribute_column(&self, name: &str) -> Option<&Column> {
        self.attribute_columns.iter().find(|c| c.name == name)
    }

    pub fn constraint_name(&self) -> String {
        format!("{}_natural_key", self.name)
    }
}

/// Append-only table, one row per source occurrence.
#[derive(Debug, Clone, Copy)]
pub struct FactTable {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl FactTable {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Join table unique per (left, right[, discriminator]).
#[derive(Debug, Clone, Copy)]
pub struct RelationshipTable {
    pub name: &'static str,
    pub left: Column,
    pub right: Column,
    pub discriminator: Option<Column>,
}

impl RelationshipTable {
    pub fn constraint_name(&self) -> String {
        format!("{}_edge", self.name)
    }

    /// Columns in insert order.
    pub fn columns(&self) -> Vec<Column> {
        let mut cols = vec![self.left, self.right];
        cols.extend(self.discriminator);
        cols
    }
}

/// Any table the warehouse knows how to create.
#[derive(Debug, Clone, Copy)]
pub enum TableDef {
    Dimension(&'static DimensionTable),
    Fact(&'static FactTable),
    Relationship(&'static RelationshipTable),
}

impl TableDef {
    pub fn name(&self) -> &'static str {
        match self {
            TableDef::Dimension(t) => t.name,
            TableDef::Fact(t) => t.name,
            TableDef::Relationship(t) => t.name,
        }
    }
}
