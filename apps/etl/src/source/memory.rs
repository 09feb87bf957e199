use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::errors::SourceError;
use crate::source::{
    DocumentQuery, DocumentSource, PartitionSpec, SourceConnector, SourceDocument, StagingSink,
};

#[derive(Default)]
struct Collections {
    documents: HashMap<String, Vec<SourceDocument>>,
    failing_partitions: HashSet<usize>,
}

/// In-process document store. Clones share the same collections.
#[derive(Clone, Default)]
pub struct MemoryDocumentSource {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn insert(&self, collection: &str, doc: SourceDocument) {
        self.inner
            .write()
            .await
            .documents
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    #[cfg(test)]
    /// Every fetch of the partition with this index fails as unavailable.
    pub async fn fail_partition(&self, index: usize) {
        self.inner.write().await.failing_partitions.insert(index);
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn count(&mut self, query: &DocumentQuery) -> Result<u64, SourceError> {
        let collections = self.inner.read().await;
        let count = collections
            .documents
            .get(&query.collection)
            .map_or(0, |docs| docs.iter().filter(|d| query.matches(d)).count());
        Ok(count as u64)
    }

    async fn fetch(&mut self, partition: &PartitionSpec) -> Result<Vec<SourceDocument>, SourceError> {
        let collections = self.inner.read().await;
        if collections.failing_partitions.contains(&partition.index) {
            return Err(SourceError::Unavailable(format!(
                "partition {} unreadable",
                partition.index
            )));
        }

        let query = &partition.query;
        let matching = collections
            .documents
            .get(&query.collection)
            .into_iter()
            .flatten()
            .filter(|d| query.matches(d));
        let (skip, limit) = partition
            .window
            .map_or((0, usize::MAX), |w| (w.skip as usize, w.limit as usize));

        Ok(matching
            .skip(skip)
            .take(limit)
            .map(|d| query.shape(d.clone()))
            .collect())
    }
}

#[async_trait]
impl SourceConnector for MemoryDocumentSource {
    async fn open(&self) -> Result<Box<dyn DocumentSource>, SourceError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl StagingSink for MemoryDocumentSource {
    async fn stage(&mut self, collection: &str, batch: Vec<Value>) -> Result<u64, SourceError> {
        let mut collections = self.inner.write().await;
        let docs = collections.documents.entry(collection.to_string()).or_default();
        let mut staged = 0;
        for value in batch {
            // Mirrors the staging table's row id.
            let row_id = (docs.len() + 1).to_string();
            docs.push(SourceDocument::from_value(row_id, value)?);
            staged += 1;
        }
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::source::Window;

    async fn seeded(n: usize) -> MemoryDocumentSource {
        let source = MemoryDocumentSource::new();
        for i in 0..n {
            let skills = if i % 2 == 0 { json!(["rust"]) } else { json!([]) };
            let doc = SourceDocument::from_value(i.to_string(), json!({"skills": skills, "n": i}))
                .unwrap();
            source.insert("profiles", doc).await;
        }
        source
    }

    #[tokio::test]
    async fn test_count_applies_filter() {
        let mut source = seeded(5).await;
        let all = DocumentQuery::collection("profiles");
        assert_eq!(source.count(&all).await.unwrap(), 5);
        assert_eq!(source.count(&all.non_empty("skills")).await.unwrap(), 3);
        assert_eq!(source.count(&DocumentQuery::collection("missing")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_respects_window() {
        let mut source = seeded(5).await;
        let partition = PartitionSpec {
            index: 1,
            query: DocumentQuery::collection("profiles"),
            window: Some(Window { skip: 2, limit: 2 }),
        };
        let ids: Vec<_> = source
            .fetch(&partition)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_failing_partition() {
        let mut source = seeded(1).await;
        source.fail_partition(0).await;
        let err = source
            .fetch(&PartitionSpec::whole(DocumentQuery::collection("profiles")))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
