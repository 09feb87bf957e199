//! Relational store surface.
//!
//! Backends implement the four primitives below; dimension resolution and fact
//! writing are built once on top of them in `resolver` and `writer`.
//!
//! A `WarehouseStore` is owned by exactly one worker. Workers obtain their own
//! handle through a `StoreConnector` and drop it when their partition ends, so
//! no handle or cache is ever shared across worker boundaries.

pub mod memory;
pub mod postgres;
pub mod resolver;
pub mod writer;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::schema::{DimensionTable, FactTable, RelationshipTable};
use crate::value::{NaturalKey, Record, SurrogateKey};

pub use memory::MemoryWarehouse;
pub use postgres::PgConnector;
pub use resolver::resolve_or_create;
pub use writer::{write_fact, write_relationship};

/// Result of an atomic conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(SurrogateKey),
    /// A row with the same natural key already exists.
    Conflict,
}

#[async_trait]
pub trait WarehouseStore: Send {
    /// NULL-safe exact match on every natural-key column.
    async fn lookup_dimension(
        &mut self,
        table: &DimensionTable,
        key: &Record,
    ) -> Result<Option<SurrogateKey>, StoreError>;

    /// Inserts the row unless the natural key already exists, in one atomic step.
    async fn insert_dimension_if_absent(
        &mut self,
        table: &DimensionTable,
        key: &NaturalKey,
    ) -> Result<InsertOutcome, StoreError>;

    /// Appends a fact row and returns its generated key.
    async fn insert_fact(
        &mut self,
        table: &FactTable,
        record: &Record,
    ) -> Result<SurrogateKey, StoreError>;

    /// Returns false when the exact edge was already present.
    async fn insert_relationship_if_absent(
        &mut self,
        table: &RelationshipTable,
        left: SurrogateKey,
        right: SurrogateKey,
        discriminator: Option<&str>,
    ) -> Result<bool, StoreError>;
}

/// Hands out one store handle per worker.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WarehouseStore>, StoreError>;
}
