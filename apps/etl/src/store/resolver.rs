use tracing::debug;

use crate::errors::{ResolutionError, StoreError};
use crate::schema::DimensionTable;
use crate::store::{InsertOutcome, WarehouseStore};
use crate::value::{NaturalKey, Normalization, Scalar, SurrogateKey};

/// Validates the key against the descriptor, applies each column's
/// normalization, and fills unspecified key columns with NULL.
pub fn canonical_key(
    table: &DimensionTable,
    key: &NaturalKey,
) -> Result<NaturalKey, ResolutionError> {
    let unknown = key
        .key
        .columns()
        .find(|c| table.key_column(c).is_none())
        .or_else(|| {
            key.attributes
                .columns()
                .find(|c| table.attribute_column(c).is_none())
        });
    if let Some(column) = unknown {
        return Err(ResolutionError::UnknownColumn {
            table: table.name.to_string(),
            column: column.to_string(),
        });
    }

    let mut canonical = NaturalKey::new();
    for col in table.key_columns {
        let value = key
            .key
            .get(col.name)
            .map_or(Scalar::Null, |v| col.normalization.apply(v));
        canonical = canonical.with(col.name, value);
    }
    for col in table.attribute_columns {
        let value = key
            .attributes
            .get(col.name)
            .map_or(Scalar::Null, |v| Normalization::Trim.apply(v));
        canonical = canonical.with_attribute(col.name, value);
    }

    if canonical.is_empty() {
        return Err(ResolutionError::EmptyKey {
            table: table.name.to_string(),
        });
    }
    Ok(canonical)
}

/// Returns the surrogate key of the dimension row matching `key`, creating the
/// row if it does not exist yet.
///
/// Creation goes through the store's atomic conditional insert, so concurrent
/// callers racing on a new key end up with a single row. A caller that loses
/// the race sees `Conflict` and re-queries once to pick up the winner's key.
pub async fn resolve_or_create(
    store: &mut dyn WarehouseStore,
    table: &DimensionTable,
    key: &NaturalKey,
) -> Result<SurrogateKey, ResolutionError> {
    let key = canonical_key(table, key)?;

    if let Some(id) = store.lookup_dimension(table, &key.key).await? {
        return Ok(id);
    }

    match store.insert_dimension_if_absent(table, &key).await {
        Ok(InsertOutcome::Inserted(id)) => {
            debug!("Created {} row {}", table.name, id);
            return Ok(id);
        }
        Ok(InsertOutcome::Conflict) | Err(StoreError::Conflict { .. }) => {
            debug!("Lost insert race on {}, re-querying", table.name);
        }
        Err(e) => return Err(e.into()),
    }

    store
        .lookup_dimension(table, &key.key)
        .await?
        .ok_or_else(|| ResolutionError::Unresolved {
            table: table.name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Barrier;

    use super::*;
    use crate::schema::tables::{DIM_LOCATION, DIM_PRF_RELATED, DIM_PRF_TRAIT};
    use crate::store::MemoryWarehouse;

    fn skill(name: &str) -> NaturalKey {
        NaturalKey::new().with("type", "skill").with("name", name)
    }

    #[test]
    fn test_canonical_key_fills_missing_columns_with_null() {
        let key = NaturalKey::new().with("city", "Frankfurt");
        let canonical = canonical_key(&DIM_LOCATION, &key).unwrap();
        let columns: Vec<_> = canonical.key.columns().collect();
        assert_eq!(columns, vec!["country_letters", "country_name", "state", "city"]);
        assert_eq!(canonical.key.get("state"), Some(&Scalar::Null));
    }

    #[test]
    fn test_canonical_key_rejects_unknown_column() {
        let key = NaturalKey::new().with("zip", "60311");
        let err = canonical_key(&DIM_LOCATION, &key).unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownColumn { .. }));
    }

    #[test]
    fn test_canonical_key_rejects_all_null_key() {
        let key = NaturalKey::new().with("city", "   ");
        let err = canonical_key(&DIM_LOCATION, &key).unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyKey { .. }));
    }

    #[tokio::test]
    async fn test_resolve_twice_returns_same_key() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();

        let first = resolve_or_create(&mut store, &DIM_PRF_TRAIT, &skill("Rust"))
            .await
            .unwrap();
        let second = resolve_or_create(&mut store, &DIM_PRF_TRAIT, &skill("Rust"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(warehouse.count(DIM_PRF_TRAIT.name).await, 1);
    }

    #[tokio::test]
    async fn test_normalization_merges_spelling_variants() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();

        let a = resolve_or_create(&mut store, &DIM_PRF_TRAIT, &skill("  Machine  Learning"))
            .await
            .unwrap();
        let b = resolve_or_create(&mut store, &DIM_PRF_TRAIT, &skill("machine learning"))
            .await
            .unwrap();

        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_null_columns_match_null_columns() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();
        let key = NaturalKey::new().with("country_letters", "de").with("city", "Berlin");

        let a = resolve_or_create(&mut store, &DIM_LOCATION, &key).await.unwrap();
        let b = resolve_or_create(&mut store, &DIM_LOCATION, &key).await.unwrap();

        assert_eq!(a, b);
        let rows = warehouse.rows(DIM_LOCATION.name).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values.get("country_letters"), Some(&Scalar::Text("DE".into())));
    }

    #[tokio::test]
    async fn test_attributes_do_not_take_part_in_matching() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();
        let base = NaturalKey::new().with("name", "Ada").with("location", "London");

        let a = resolve_or_create(
            &mut store,
            &DIM_PRF_RELATED,
            &base.clone().with_attribute("summary", "first"),
        )
        .await
        .unwrap();
        let b = resolve_or_create(
            &mut store,
            &DIM_PRF_RELATED,
            &base.with_attribute("summary", "second"),
        )
        .await
        .unwrap();

        assert_eq!(a, b);
        let rows = warehouse.rows(DIM_PRF_RELATED.name).await;
        assert_eq!(rows[0].values.get("summary"), Some(&Scalar::Text("first".into())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolvers_create_single_row() {
        const CALLERS: usize = 16;
        let warehouse = MemoryWarehouse::new();
        let barrier = Arc::new(Barrier::new(CALLERS));

        let mut handles = Vec::new();
        for _ in 0..CALLERS {
            let mut store = warehouse.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                resolve_or_create(&mut store, &DIM_PRF_TRAIT, &skill("Kubernetes")).await
            }));
        }

        let mut keys: Vec<SurrogateKey> = Vec::new();
        for h in handles {
            keys.push(h.await.unwrap().unwrap());
        }
        keys.dedup();

        assert_eq!(keys.len(), 1, "all callers must receive the same key");
        assert_eq!(warehouse.count(DIM_PRF_TRAIT.name).await, 1);
    }

    #[tokio::test]
    async fn test_conflict_is_resolved_by_requery() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();
        warehouse.race_next_insert(DIM_PRF_TRAIT.name).await;

        let key = resolve_or_create(&mut store, &DIM_PRF_TRAIT, &skill("Go"))
            .await
            .unwrap();

        assert_eq!(warehouse.count(DIM_PRF_TRAIT.name).await, 1);
        assert_eq!(warehouse.rows(DIM_PRF_TRAIT.name).await[0].id, key);
    }

    #[tokio::test]
    async fn test_unavailable_store_propagates() {
        let warehouse = MemoryWarehouse::new();
        let mut store = warehouse.clone();
        warehouse
            .fail_next(
                DIM_PRF_TRAIT.name,
                StoreError::Unavailable("connection refused".into()),
                1,
            )
            .await;

        let err = resolve_or_create(&mut store, &DIM_PRF_TRAIT, &skill("Go"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Store(StoreError::Unavailable(_))));
    }
}
