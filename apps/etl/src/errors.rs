use serde::Serialize;
use thiserror::Error;

/// Failure reported by a relational store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Connection lost, pool exhausted or closed. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected the row.
    #[error("constraint violation on {table}: {message}")]
    Conflict { table: String, message: String },

    #[error("query failed on {table}: {message}")]
    Query { table: String, message: String },
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Maps a sqlx error onto the store taxonomy, tagging it with the table involved.
pub fn classify_sqlx_error(table: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
            StoreError::Conflict {
                table: table.to_string(),
                message: db.message().to_string(),
            }
        }
        other => StoreError::Query {
            table: table.to_string(),
            message: other.to_string(),
        },
    }
}

/// Dimension lookup or creation failed.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("natural key for {table} has no populated column")]
    EmptyKey { table: String },

    #[error("column '{column}' is not a natural-key column of {table}")]
    UnknownColumn { table: String, column: String },

    /// Insert conflicted but the re-query still found no row.
    #[error("dimension row in {table} could not be resolved after conflict")]
    Unresolved { table: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fact or relationship insert failed.
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    #[error("column '{column}' does not exist in {table}")]
    UnknownColumn { table: String, column: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Expected nested fields were missing or invalid.
#[derive(Debug, Clone, Error)]
pub enum MalformedSubObjectError {
    #[error("{category}[{index}] is not an object")]
    NotAnObject { category: String, index: usize },

    #[error("{category}[{index}] is not text")]
    NotText { category: String, index: usize },

    #[error("{category}[{index}].{field}: {reason}")]
    InvalidField {
        category: String,
        index: usize,
        field: String,
        reason: String,
    },
}

/// Everything that can go wrong while handling one nested sub-object.
#[derive(Debug, Clone, Error)]
pub enum SubObjectError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Malformed(#[from] MalformedSubObjectError),
}

impl SubObjectError {
    /// Unreachable stores and lost insert races get a second attempt.
    pub fn is_retryable(&self) -> bool {
        self.store_error().is_some_and(|e| {
            e.is_unavailable() || matches!(e, StoreError::Conflict { .. })
        })
    }

    pub fn is_unavailable(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_unavailable)
    }

    fn store_error(&self) -> Option<&StoreError> {
        match self {
            SubObjectError::Resolution(ResolutionError::Store(e)) => Some(e),
            SubObjectError::Write(WriteError::Store(e)) => Some(e),
            _ => None,
        }
    }
}

/// A document could not be imported at all.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    /// The root entity (person, company, respondent) could not be written.
    #[error("document {document_id} rejected: {reason}")]
    Rejected { document_id: String, reason: String },

    /// The store stayed unreachable after a retry; the partition must stop.
    #[error("store unavailable while importing {document_id}: {reason}")]
    StoreUnavailable { document_id: String, reason: String },
}

/// Failure that ends a partition early. Recorded in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PartitionError {
    #[error("could not connect: {0}")]
    Connect(String),

    #[error("source read failed: {0}")]
    Source(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("partition deadline exceeded")]
    DeadlineExceeded,

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Document store failures.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("document store query failed: {0}")]
    Query(String),

    #[error("malformed document {id}: {reason}")]
    Malformed { id: String, reason: String },
}

impl From<sqlx::Error> for SourceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                SourceError::Unavailable(e.to_string())
            }
            other => SourceError::Query(other.to_string()),
        }
    }
}
