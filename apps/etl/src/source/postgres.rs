use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};

use crate::errors::SourceError;
use crate::source::{
    DocumentQuery, DocumentSource, PartitionSpec, SourceConnector, SourceDocument, StagingSink,
};

/// Staging table holding raw documents, one JSONB body per row.
pub const STAGING_DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS source_documents (
    id BIGSERIAL PRIMARY KEY,
    collection TEXT NOT NULL,
    source_id TEXT,
    body JSONB NOT NULL,
    loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#,
    "CREATE INDEX IF NOT EXISTS source_documents_collection_idx ON source_documents (collection, id)",
];

// $2 is the optional non-empty-list attribute. Comparing against '[]' avoids
// jsonb_array_length, which raises on non-array values.
const MATCHES: &str = r#"collection = $1
  AND ($2::TEXT IS NULL
       OR (jsonb_typeof(body -> $2::TEXT) = 'array' AND body -> $2::TEXT <> '[]'::jsonb))"#;

#[derive(Clone)]
pub struct PgSourceConnector {
    pool: PgPool,
}

impl PgSourceConnector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceConnector for PgSourceConnector {
    async fn open(&self) -> Result<Box<dyn DocumentSource>, SourceError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgDocumentSource { conn }))
    }
}

pub struct PgDocumentSource {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl DocumentSource for PgDocumentSource {
    async fn count(&mut self, query: &DocumentQuery) -> Result<u64, SourceError> {
        let sql = format!("SELECT COUNT(*) AS n FROM source_documents WHERE {MATCHES}");
        let row = sqlx::query(&sql)
            .bind(&query.collection)
            .bind(query.non_empty.as_deref())
            .fetch_one(&mut *self.conn)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn fetch(&mut self, partition: &PartitionSpec) -> Result<Vec<SourceDocument>, SourceError> {
        let query = &partition.query;
        // A NULL LIMIT returns every remaining row.
        let (skip, limit) = partition
            .window
            .map_or((0i64, None), |w| (w.skip as i64, Some(w.limit as i64)));

        let sql = format!(
            "SELECT id, body FROM source_documents WHERE {MATCHES} ORDER BY id OFFSET $3 LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(&query.collection)
            .bind(query.non_empty.as_deref())
            .bind(skip)
            .bind(limit)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let body: Value = row.try_get("body")?;
                SourceDocument::from_value(id.to_string(), body).map(|d| query.shape(d))
            })
            .collect()
    }
}

/// Writes staged batches into `source_documents` in one statement per batch.
pub struct PgStagingSink {
    pool: PgPool,
}

impl PgStagingSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StagingSink for PgStagingSink {
    async fn stage(&mut self, collection: &str, batch: Vec<Value>) -> Result<u64, SourceError> {
        let source_ids: Vec<Option<String>> = batch
            .iter()
            .map(|doc| match doc.get("original_id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) if !other.is_null() => Some(other.to_string()),
                _ => None,
            })
            .collect();

        let result = sqlx::query(
            r#"
            INSERT INTO source_documents (collection, source_id, body)
            SELECT $1, s, b FROM UNNEST($2::TEXT[], $3::JSONB[]) AS t(s, b)
            "#,
        )
        .bind(collection)
        .bind(source_ids)
        .bind(batch)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
