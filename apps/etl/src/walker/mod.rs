//! Document Walker.
//!
//! An importer turns one source document into warehouse rows: it writes the
//! root fact first, then walks each nested category and hands every
//! sub-object to `Walk::apply`, which retries store hiccups once and records
//! anything else as an issue without giving up on the document.

pub mod company;
pub mod fields;
pub mod profile;
pub mod survey;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{
    DocumentError, MalformedSubObjectError, ResolutionError, SubObjectError, WriteError,
};
use crate::schema::tables::DIM_ORIGIN;
use crate::schema::{DimensionTable, FactTable, RelationshipTable};
use crate::source::SourceDocument;
use crate::store::{resolve_or_create, write_fact, write_relationship, WarehouseStore};
use crate::value::{NaturalKey, Record, SurrogateKey};

pub use company::CompanyImporter;
pub use fields::Fields;
pub use profile::ProfileImporter;
pub use survey::SurveyImporter;

/// A nested sub-object that could not be fully imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubObjectIssue {
    pub document_id: String,
    pub category: String,
    pub index: usize,
    pub message: String,
}

/// What importing one document produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessResult {
    pub document_id: String,
    pub root_key: Option<SurrogateKey>,
    pub facts_written: usize,
    pub relationships_written: usize,
    pub dimensions_resolved: usize,
    pub issues: Vec<SubObjectIssue>,
}

/// Per-run values every document of an import shares.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub collection: String,
    /// `dim_origin` row for the source collection.
    pub origin: SurrogateKey,
    pub run_id: Uuid,
}

impl ImportContext {
    pub async fn prepare(
        store: &mut dyn WarehouseStore,
        collection: &str,
    ) -> Result<Self, ResolutionError> {
        let origin = resolve_or_create(
            store,
            &DIM_ORIGIN,
            &NaturalKey::new().with("name", collection),
        )
        .await?;
        Ok(Self {
            collection: collection.to_string(),
            origin,
            run_id: Uuid::new_v4(),
        })
    }
}

#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_document(
        &self,
        store: &mut dyn WarehouseStore,
        doc: &SourceDocument,
        ctx: &ImportContext,
    ) -> Result<ProcessResult, DocumentError>;
}

pub const IMPORTERS: &[&str] = &["profiles", "companies", "survey"];

pub fn importer(name: &str) -> Option<Arc<dyn DocumentProcessor>> {
    match name {
        "profiles" => Some(Arc::new(ProfileImporter)),
        "companies" => Some(Arc::new(CompanyImporter)),
        "survey" => Some(Arc::new(SurveyImporter)),
        _ => None,
    }
}

/// One unit of nested work. `write` may run twice when the first attempt
/// hits a retryable store error.
#[async_trait]
pub(crate) trait SubObject: Sync {
    async fn write(&self, walk: &mut Walk<'_>) -> Result<Option<SurrogateKey>, SubObjectError>;
}

/// Store access and bookkeeping for a single document.
pub(crate) struct Walk<'a> {
    store: &'a mut dyn WarehouseStore,
    result: ProcessResult,
    /// Sub-object currently being written, for issue reports.
    position: (&'static str, usize),
}

impl<'a> Walk<'a> {
    pub fn new(store: &'a mut dyn WarehouseStore, document_id: &str) -> Self {
        Self {
            store,
            result: ProcessResult {
                document_id: document_id.to_string(),
                ..ProcessResult::default()
            },
            position: ("document", 0),
        }
    }

    pub async fn resolve(
        &mut self,
        table: &DimensionTable,
        key: &NaturalKey,
    ) -> Result<SurrogateKey, SubObjectError> {
        let id = resolve_or_create(&mut *self.store, table, key).await?;
        self.result.dimensions_resolved += 1;
        Ok(id)
    }

    pub async fn fact(
        &mut self,
        table: &'static FactTable,
        record: &Record,
    ) -> Result<SurrogateKey, SubObjectError> {
        let receipt = write_fact(&mut *self.store, table, record).await?;
        self.result.facts_written += 1;
        Ok(receipt.key)
    }

    pub async fn link(
        &mut self,
        table: &RelationshipTable,
        left: SurrogateKey,
        right: SurrogateKey,
        discriminator: Option<&str>,
    ) -> Result<(), SubObjectError> {
        if write_relationship(&mut *self.store, table, left, right, discriminator).await? {
            self.result.relationships_written += 1;
        }
        Ok(())
    }

    /// The sub-object as a mapping, or a malformed error naming its position.
    pub fn fields<'v>(&self, value: &'v Value) -> Result<&'v Fields, SubObjectError> {
        let (category, index) = self.position;
        value.as_object().ok_or_else(|| {
            MalformedSubObjectError::NotAnObject {
                category: category.to_string(),
                index,
            }
            .into()
        })
    }

    /// The sub-object as a list entry of text. Blank strings and nulls yield
    /// `None`; arrays and objects are malformed.
    pub fn text(&self, value: &Value) -> Result<Option<String>, SubObjectError> {
        match value {
            Value::Array(_) | Value::Object(_) => {
                let (category, index) = self.position;
                Err(MalformedSubObjectError::NotText {
                    category: category.to_string(),
                    index,
                }
                .into())
            }
            _ => Ok(fields::value_text(value)),
        }
    }

    /// Date field of the current sub-object. An invalid date is reported and
    /// replaced with NULL; the sub-object is still written.
    pub fn date(&mut self, obj: &Fields, field: &str) -> Option<NaiveDate> {
        match fields::assemble_date(obj.get(field)) {
            Ok(date) => date,
            Err(reason) => {
                let (category, index) = self.position;
                let err = MalformedSubObjectError::InvalidField {
                    category: category.to_string(),
                    index,
                    field: field.to_string(),
                    reason,
                };
                self.record(category, index, err.to_string());
                None
            }
        }
    }

    fn record(&mut self, category: &str, index: usize, message: String) {
        let issue = SubObjectIssue {
            document_id: self.result.document_id.clone(),
            category: category.to_string(),
            index,
            message,
        };
        // A retried sub-object can report the same problem twice.
        if self.result.issues.contains(&issue) {
            return;
        }
        warn!(
            "Document {}: {}[{}] skipped or degraded: {}",
            issue.document_id, issue.category, issue.index, issue.message
        );
        self.result.issues.push(issue);
    }

    /// Writes one sub-object with retry-once semantics.
    ///
    /// Returns `Ok(None)` when the sub-object was skipped and recorded, and
    /// `Err` only when the store is still unavailable after the retry.
    pub async fn apply(
        &mut self,
        category: &'static str,
        index: usize,
        item: &dyn SubObject,
    ) -> Result<Option<SurrogateKey>, DocumentError> {
        self.position = (category, index);
        let mut outcome = item.write(self).await;

        let retry = matches!(&outcome, Err(e) if e.is_retryable());
        if retry {
            debug!(
                "Retrying {}[{}] of document {}",
                category, index, self.result.document_id
            );
            outcome = item.write(self).await;
        }

        match outcome {
            Ok(key) => Ok(key),
            Err(e) if e.is_unavailable() => Err(DocumentError::StoreUnavailable {
                document_id: self.result.document_id.clone(),
                reason: e.to_string(),
            }),
            Err(e) => {
                self.record(category, index, e.to_string());
                Ok(None)
            }
        }
    }

    /// Writes the document's root fact. Without it nothing else can be
    /// linked, so any failure ends the document.
    pub async fn root(
        &mut self,
        table: &'static FactTable,
        record: &Record,
    ) -> Result<SurrogateKey, DocumentError> {
        let mut outcome = write_fact(&mut *self.store, table, record).await;
        if matches!(&outcome, Err(WriteError::Store(e)) if e.is_unavailable()) {
            outcome = write_fact(&mut *self.store, table, record).await;
        }

        match outcome {
            Ok(receipt) => {
                self.result.facts_written += 1;
                self.result.root_key = Some(receipt.key);
                Ok(receipt.key)
            }
            Err(WriteError::Store(e)) if e.is_unavailable() => Err(DocumentError::StoreUnavailable {
                document_id: self.result.document_id.clone(),
                reason: e.to_string(),
            }),
            Err(e) => Err(DocumentError::Rejected {
                document_id: self.result.document_id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn finish(self) -> ProcessResult {
        self.result
    }
}
