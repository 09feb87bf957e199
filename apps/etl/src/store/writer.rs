use crate::errors::WriteError;
use crate::schema::{FactTable, RelationshipTable};
use crate::store::WarehouseStore;
use crate::value::{Record, Scalar, SurrogateKey};

/// Identifies the fact row just written, so callers can link it without a
/// follow-up lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactReceipt {
    pub table: &'static str,
    pub key: SurrogateKey,
}

/// Orders the record by the descriptor's columns; absent columns become NULL.
pub fn canonical_record(table: &FactTable, record: &Record) -> Result<Record, WriteError> {
    if let Some(column) = record.columns().find(|c| table.column(c).is_none()) {
        return Err(WriteError::UnknownColumn {
            table: table.name.to_string(),
            column: column.to_string(),
        });
    }
    Ok(table.columns.iter().fold(Record::new(), |acc, col| {
        let value = record.get(col.name).cloned().unwrap_or(Scalar::Null);
        acc.set(col.name, value)
    }))
}

/// Appends one fact row. No deduplication: a rerun appends again.
pub async fn write_fact(
    store: &mut dyn WarehouseStore,
    table: &'static FactTable,
    record: &Record,
) -> Result<FactReceipt, WriteError> {
    let record = canonical_record(table, record)?;
    let key = store.insert_fact(table, &record).await?;
    Ok(FactReceipt {
        table: table.name,
        key,
    })
}

/// Links two rows unless the exact (left, right[, discriminator]) edge exists.
/// Returns whether a new row was written.
pub async fn write_relationship(
    store: &mut dyn WarehouseStore,
    table: &RelationshipTable,
    left: SurrogateKey,
    right: SurrogateKey,
    discriminator: Option<&str>,
) -> Result<bool, WriteError> {
    // A discriminator on a table without one would silently be dropped.
    if table.discriminator.is_none() && discriminator.is_some() {
        return Err(WriteError::UnknownColumn {
            table: table.name.to_string(),
            column: "<discriminator>".to_string(),
        });
    }
    Ok(store
        .insert_relationship_if_absent(table, left, right, discriminator)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::schema::tables::{
        FACT_PRF_RECOMMENDATION, REL_PRF_PERSON_RELATED, REL_PRF_PERSON_TRAIT,
    };
    use crate::store::MemoryWarehouse;

    #[test]
    fn test_canonical_record_fills_nulls_in_descriptor_order() {
        let record = Record::new().set("recommendation_text", "Great colleague");
        let canonical = canonical_record(&FACT_PRF_RECOMMENDATION, &record).unwrap();
        let columns: Vec<_> = canonical.columns().collect();
        assert_eq!(columns, vec!["id_person", "recommendation_text"]);
        assert_eq!(canonical.get("id_person"), Some(&Scalar::Null));
    }

    #[test]
    fn test_canonical_record_rejects_unknown_column() {
        let record = Record::new().set("stars", 5i64);
        let err = canonical_record(&FACT_PRF_RECOMMENDATION, &record).unwrap_err();
        assert!(matches!(err, WriteError::UnknownColumn { ref column, .. } if column == "stars"));
    }

    #[tokio::test]
    async fn test_write_fact_returns_generated_keys() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();
        let record = Record::new().set("recommendation_text", "Thorough reviewer");

        let a = write_fact(&mut store, &FACT_PRF_RECOMMENDATION, &record).await.unwrap();
        let b = write_fact(&mut store, &FACT_PRF_RECOMMENDATION, &record).await.unwrap();

        assert_ne!(a.key, b.key);
        assert_eq!(a.table, "fact_prf_recommendation");
        assert_eq!(warehouse.count(FACT_PRF_RECOMMENDATION.name).await, 2);
    }

    #[tokio::test]
    async fn test_relationship_written_once() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();

        let first = write_relationship(&mut store, &REL_PRF_PERSON_TRAIT, SurrogateKey(1), SurrogateKey(2), None)
            .await
            .unwrap();
        let second = write_relationship(&mut store, &REL_PRF_PERSON_TRAIT, SurrogateKey(1), SurrogateKey(2), None)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(warehouse.count(REL_PRF_PERSON_TRAIT.name).await, 1);
    }

    #[tokio::test]
    async fn test_discriminator_distinguishes_edges() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();
        let (person, related) = (SurrogateKey(10), SurrogateKey(20));

        for kind in ["viewed", "similar", "viewed"] {
            write_relationship(&mut store, &REL_PRF_PERSON_RELATED, person, related, Some(kind))
                .await
                .unwrap();
        }

        assert_eq!(warehouse.count(REL_PRF_PERSON_RELATED.name).await, 2);
    }

    #[tokio::test]
    async fn test_discriminator_on_plain_edge_is_rejected() {
        let mut store = MemoryWarehouse::new();
        let err = write_relationship(
            &mut store,
            &REL_PRF_PERSON_TRAIT,
            SurrogateKey(1),
            SurrogateKey(2),
            Some("skill"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WriteError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_write_error() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();
        warehouse
            .fail_next(
                FACT_PRF_RECOMMENDATION.name,
                StoreError::Unavailable("broken pipe".into()),
                1,
            )
            .await;

        let err = write_fact(&mut store, &FACT_PRF_RECOMMENDATION, &Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Store(StoreError::Unavailable(_))));
    }
}
