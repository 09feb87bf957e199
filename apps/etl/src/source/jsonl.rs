//! JSON-lines staging: raw export files are loaded line by line into the
//! document store before an import reads them back partition by partition.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::errors::SourceError;

pub const STAGE_BATCH_SIZE: usize = 1000;

/// Destination for staged documents.
#[async_trait]
pub trait StagingSink: Send {
    /// Stores a batch, returning how many documents were written.
    async fn stage(&mut self, collection: &str, batch: Vec<Value>) -> Result<u64, SourceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub lines_read: u64,
    /// Left out by the sampling interval.
    pub lines_sampled_out: u64,
    /// Not valid JSON objects.
    pub lines_rejected: u64,
    pub documents_staged: u64,
}

/// Parses one line and moves the exporter's `_id` to `original_id`.
pub fn prepare_line(line: &str) -> Result<Value, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let Value::Object(mut body) = value else {
        return Err("line is not a JSON object".to_string());
    };
    if let Some(id) = body.remove("_id") {
        body.insert("original_id".to_string(), id);
    }
    Ok(Value::Object(body))
}

/// Streams `path` into `sink`, keeping every `every`-th non-blank line.
/// Unparseable lines are logged and counted, never fatal.
pub async fn load_jsonl(
    path: &Path,
    collection: &str,
    every: usize,
    sink: &mut dyn StagingSink,
) -> Result<LoadStats, SourceError> {
    let every = every.max(1) as u64;
    let file = File::open(path)
        .await
        .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;
    let mut lines = BufReader::new(file).lines();

    let mut stats = LoadStats::default();
    let mut batch = Vec::with_capacity(STAGE_BATCH_SIZE);

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let position = stats.lines_read;
        stats.lines_read += 1;
        if position % every != 0 {
            stats.lines_sampled_out += 1;
            continue;
        }

        match prepare_line(&line) {
            Ok(doc) => batch.push(doc),
            Err(reason) => {
                warn!("Skipping line {} of {}: {}", stats.lines_read, path.display(), reason);
                stats.lines_rejected += 1;
                continue;
            }
        }

        if batch.len() >= STAGE_BATCH_SIZE {
            stats.documents_staged += sink.stage(collection, std::mem::take(&mut batch)).await?;
            info!("Staged {} documents into {}", stats.documents_staged, collection);
        }
    }

    if !batch.is_empty() {
        stats.documents_staged += sink.stage(collection, batch).await?;
    }

    info!(
        "Finished staging {}: {} lines, {} staged, {} rejected, {} sampled out",
        collection,
        stats.lines_read,
        stats.documents_staged,
        stats.lines_rejected,
        stats.lines_sampled_out
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::source::{DocumentQuery, DocumentSource, MemoryDocumentSource, PartitionSpec};

    fn jsonl(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_prepare_line_renames_id() {
        let doc = prepare_line(r#"{"_id": "p-1", "full_name": "Ada"}"#).unwrap();
        assert_eq!(doc, json!({"original_id": "p-1", "full_name": "Ada"}));
    }

    #[test]
    fn test_prepare_line_rejects_non_objects() {
        assert!(prepare_line("[1, 2]").is_err());
        assert!(prepare_line("{not json").is_err());
    }

    #[tokio::test]
    async fn test_load_counts_bad_lines_and_keeps_going() {
        let file = jsonl(&[
            r#"{"_id": "a", "name": "Acme"}"#,
            "{broken",
            "",
            r#"{"_id": "b", "name": "Globex"}"#,
        ]);
        let mut source = MemoryDocumentSource::new();

        let stats = load_jsonl(file.path(), "companies", 1, &mut source).await.unwrap();

        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.lines_rejected, 1);
        assert_eq!(stats.documents_staged, 2);

        let docs = source
            .fetch(&PartitionSpec::whole(DocumentQuery::collection("companies")))
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_load_samples_every_nth_line() {
        let lines: Vec<String> = (0..10).map(|i| format!(r#"{{"_id": "{i}"}}"#)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let file = jsonl(&refs);
        let mut source = MemoryDocumentSource::new();

        let stats = load_jsonl(file.path(), "survey", 3, &mut source).await.unwrap();

        assert_eq!(stats.documents_staged, 4);
        assert_eq!(stats.lines_sampled_out, 6);
        let docs = source
            .fetch(&PartitionSpec::whole(DocumentQuery::collection("survey")))
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "3", "6", "9"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let mut source = MemoryDocumentSource::new();
        let err = load_jsonl(Path::new("/nonexistent/input.jsonl"), "x", 1, &mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
