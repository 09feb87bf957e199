//! In-process warehouse with the same uniqueness rules as the PostgreSQL
//! schema. Backs `dry-run` and the test suite.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::StoreError;
use crate::schema::{DimensionTable, FactTable, RelationshipTable};
use crate::store::{InsertOutcome, StoreConnector, WarehouseStore};
use crate::value::{NaturalKey, Record, Scalar, SurrogateKey};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: SurrogateKey,
    pub values: Record,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<StoredRow>>,
    faults: HashMap<String, VecDeque<StoreError>>,
    /// Tables whose next dimension insert behaves as if another writer won.
    races: HashSet<String>,
}

impl Tables {
    fn take_fault(&mut self, table: &str) -> Result<(), StoreError> {
        match self.faults.get_mut(table).and_then(VecDeque::pop_front) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn append(&mut self, table: &str, values: Record) -> SurrogateKey {
        let rows = self.rows.entry(table.to_string()).or_default();
        let id = SurrogateKey(rows.len() as i64 + 1);
        rows.push(StoredRow { id, values });
        id
    }

    fn find(&self, table: &str, key: &Record) -> Option<SurrogateKey> {
        self.rows.get(table)?.iter().find_map(|row| {
            key.iter()
                .all(|(col, v)| row.values.get(col).unwrap_or(&Scalar::Null) == v)
                .then_some(row.id)
        })
    }
}

/// Cloning yields another handle onto the same tables, the way a second
/// connection sees the same database.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.inner
            .lock()
            .await
            .rows
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub async fn count(&self, table: &str) -> usize {
        self.inner.lock().await.rows.get(table).map_or(0, Vec::len)
    }

    /// Row counts of every non-empty table, sorted by table name.
    pub async fn table_counts(&self) -> Vec<(String, usize)> {
        let tables = self.inner.lock().await;
        let mut counts: Vec<_> = tables
            .rows
            .iter()
            .map(|(name, rows)| (name.clone(), rows.len()))
            .collect();
        counts.sort();
        counts
    }

    #[cfg(test)]
    /// The next `times` operations on `table` fail with `error`.
    pub async fn fail_next(&self, table: &str, error: StoreError, times: usize) {
        let mut tables = self.inner.lock().await;
        let queue = tables.faults.entry(table.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    #[cfg(test)]
    /// The next dimension insert into `table` commits the row but reports a
    /// conflict, reproducing a lost race against a concurrent writer.
    pub async fn race_next_insert(&self, table: &str) {
        self.inner.lock().await.races.insert(table.to_string());
    }
}

#[async_trait]
impl WarehouseStore for MemoryWarehouse {
    async fn lookup_dimension(
        &mut self,
        table: &DimensionTable,
        key: &Record,
    ) -> Result<Option<SurrogateKey>, StoreError> {
        let found = {
            let mut tables = self.inner.lock().await;
            tables.take_fault(table.name)?;
            tables.find(table.name, key)
        };
        // Let concurrent resolvers interleave between lookup and insert.
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn insert_dimension_if_absent(
        &mut self,
        table: &DimensionTable,
        key: &NaturalKey,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.inner.lock().await;
        tables.take_fault(table.name)?;
        if tables.find(table.name, &key.key).is_some() {
            return Ok(InsertOutcome::Conflict);
        }
        let values = key
            .attributes
            .iter()
            .fold(key.key.clone(), |acc, (c, v)| acc.set(c, v.clone()));
        let id = tables.append(table.name, values);
        if tables.races.remove(table.name) {
            return Ok(InsertOutcome::Conflict);
        }
        Ok(InsertOutcome::Inserted(id))
    }

    async fn insert_fact(
        &mut self,
        table: &FactTable,
        record: &Record,
    ) -> Result<SurrogateKey, StoreError> {
        let mut tables = self.inner.lock().await;
        tables.take_fault(table.name)?;
        Ok(tables.append(table.name, record.clone()))
    }

    async fn insert_relationship_if_absent(
        &mut self,
        table: &RelationshipTable,
        left: SurrogateKey,
        right: SurrogateKey,
        discriminator: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut edge = Record::new()
            .set(table.left.name, left)
            .set(table.right.name, right);
        if let Some(col) = table.discriminator {
            edge = edge.set(col.name, discriminator);
        }

        let mut tables = self.inner.lock().await;
        tables.take_fault(table.name)?;
        if tables.find(table.name, &edge).is_some() {
            return Ok(false);
        }
        tables.append(table.name, edge);
        Ok(true)
    }
}

#[async_trait]
impl StoreConnector for MemoryWarehouse {
    async fn connect(&self) -> Result<Box<dyn WarehouseStore>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tables::{DIM_PRF_LANGUAGE, FACT_PRF_RECOMMENDATION};

    #[tokio::test]
    async fn test_clones_share_tables() {
        let warehouse = MemoryWarehouse::new();
        let mut other = warehouse.clone();
        other
            .insert_fact(&FACT_PRF_RECOMMENDATION, &Record::new().set("recommendation_text", "hi"))
            .await
            .unwrap();
        assert_eq!(warehouse.count(FACT_PRF_RECOMMENDATION.name).await, 1);
    }

    #[tokio::test]
    async fn test_faults_are_consumed_in_order() {
        let mut warehouse = MemoryWarehouse::new();
        warehouse
            .fail_next(DIM_PRF_LANGUAGE.name, StoreError::Unavailable("down".into()), 2)
            .await;
        let key = Record::new().set("language", "english");

        assert!(warehouse.lookup_dimension(&DIM_PRF_LANGUAGE, &key).await.is_err());
        assert!(warehouse.lookup_dimension(&DIM_PRF_LANGUAGE, &key).await.is_err());
        assert_eq!(
            warehouse.lookup_dimension(&DIM_PRF_LANGUAGE, &key).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_duplicate_dimension_insert_conflicts() {
        let mut warehouse = MemoryWarehouse::new();
        let key = NaturalKey::new().with("language", "german");

        let first = warehouse
            .insert_dimension_if_absent(&DIM_PRF_LANGUAGE, &key)
            .await
            .unwrap();
        let second = warehouse
            .insert_dimension_if_absent(&DIM_PRF_LANGUAGE, &key)
            .await
            .unwrap();

        assert_eq!(first, InsertOutcome::Inserted(SurrogateKey(1)));
        assert_eq!(second, InsertOutcome::Conflict);
        assert_eq!(
            warehouse.table_counts().await,
            vec![("dim_prf_language".to_string(), 1)]
        );
    }
}
