use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgArguments;
use sqlx::{PgPool, Postgres, Row};

use crate::errors::{classify_sqlx_error, StoreError};
use crate::schema::{Column, ColumnType, DimensionTable, FactTable, RelationshipTable};
use crate::store::{InsertOutcome, StoreConnector, WarehouseStore};
use crate::value::{NaturalKey, Record, Scalar, SurrogateKey};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Hands each worker a dedicated pooled connection.
#[derive(Clone)]
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn WarehouseStore>, StoreError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify_sqlx_error("<pool>", e))?;
        Ok(Box::new(PgWarehouse { conn }))
    }
}

/// Warehouse handle over a single connection. Returned to the pool on drop.
pub struct PgWarehouse {
    conn: PoolConnection<Postgres>,
}

/// Binds a scalar, typing NULLs after the target column so PostgreSQL does
/// not reject an untyped text NULL going into a BIGINT or DATE column.
fn bind_scalar<'q>(query: PgQuery<'q>, ty: ColumnType, value: &Scalar) -> PgQuery<'q> {
    match (value, ty) {
        (Scalar::Null, ColumnType::Text) => query.bind(Option::<String>::None),
        (Scalar::Null, ColumnType::BigInt | ColumnType::Key(_)) => query.bind(Option::<i64>::None),
        (Scalar::Null, ColumnType::Double) => query.bind(Option::<f64>::None),
        (Scalar::Null, ColumnType::Boolean) => query.bind(Option::<bool>::None),
        (Scalar::Null, ColumnType::Date) => query.bind(Option::<NaiveDate>::None),
        (Scalar::Int(i), ColumnType::Double) => query.bind(*i as f64),
        (Scalar::Int(i), _) => query.bind(*i),
        (Scalar::Float(f), ColumnType::BigInt) => query.bind(f.round() as i64),
        (Scalar::Float(f), _) => query.bind(*f),
        (Scalar::Bool(b), _) => query.bind(*b),
        (Scalar::Text(s), _) => query.bind(s.clone()),
        (Scalar::Date(d), _) => query.bind(*d),
    }
}

fn column_type(columns: &[Column], name: &str) -> ColumnType {
    columns
        .iter()
        .find(|c| c.name == name)
        .map_or(ColumnType::Text, |c| c.ty)
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ")
}

/// `SELECT id ... WHERE` with `col = $n` for populated columns and
/// `col IS NULL` for empty ones, keeping the natural-key index usable.
pub(crate) fn lookup_sql(table: &str, key: &Record) -> String {
    let mut param = 0;
    let predicates: Vec<String> = key
        .iter()
        .map(|(col, v)| {
            if v.is_null() {
                format!("{col} IS NULL")
            } else {
                param += 1;
                format!("{col} = ${param}")
            }
        })
        .collect();
    format!(
        "SELECT id FROM {table} WHERE {} LIMIT 1",
        predicates.join(" AND ")
    )
}

pub(crate) fn insert_sql(table: &str, columns: &[&str], on_conflict: Option<&str>) -> String {
    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders(columns.len())
    );
    if let Some(constraint) = on_conflict {
        sql.push_str(&format!(" ON CONFLICT ON CONSTRAINT {constraint} DO NOTHING"));
    }
    sql
}

#[async_trait]
impl WarehouseStore for PgWarehouse {
    async fn lookup_dimension(
        &mut self,
        table: &DimensionTable,
        key: &Record,
    ) -> Result<Option<SurrogateKey>, StoreError> {
        let sql = lookup_sql(table.name, key);
        let mut query = sqlx::query(&sql);
        for (col, value) in key.iter().filter(|(_, v)| !v.is_null()) {
            query = bind_scalar(query, column_type(table.key_columns, col), value);
        }
        let row = query
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| classify_sqlx_error(table.name, e))?;
        row.map(|r| r.try_get::<i64, _>("id").map(SurrogateKey))
            .transpose()
            .map_err(|e| classify_sqlx_error(table.name, e))
    }

    async fn insert_dimension_if_absent(
        &mut self,
        table: &DimensionTable,
        key: &NaturalKey,
    ) -> Result<InsertOutcome, StoreError> {
        let columns: Vec<&str> = key.key.columns().chain(key.attributes.columns()).collect();
        let constraint = table.constraint_name();
        let sql = format!("{} RETURNING id", insert_sql(table.name, &columns, Some(&constraint)));

        let mut query = sqlx::query(&sql);
        for (col, value) in key.key.iter() {
            query = bind_scalar(query, column_type(table.key_columns, col), value);
        }
        for (col, value) in key.attributes.iter() {
            query = bind_scalar(query, column_type(table.attribute_columns, col), value);
        }

        let row = query
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| classify_sqlx_error(table.name, e))?;
        match row {
            Some(r) => {
                let id: i64 = r
                    .try_get("id")
                    .map_err(|e| classify_sqlx_error(table.name, e))?;
                Ok(InsertOutcome::Inserted(SurrogateKey(id)))
            }
            // DO NOTHING returns no row when the natural key already exists.
            None => Ok(InsertOutcome::Conflict),
        }
    }

    async fn insert_fact(
        &mut self,
        table: &FactTable,
        record: &Record,
    ) -> Result<SurrogateKey, StoreError> {
        let columns: Vec<&str> = record.columns().collect();
        let sql = format!("{} RETURNING id", insert_sql(table.name, &columns, None));

        let mut query = sqlx::query(&sql);
        for (col, value) in record.iter() {
            query = bind_scalar(query, column_type(table.columns, col), value);
        }

        let row = query
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|e| classify_sqlx_error(table.name, e))?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| classify_sqlx_error(table.name, e))?;
        Ok(SurrogateKey(id))
    }

    async fn insert_relationship_if_absent(
        &mut self,
        table: &RelationshipTable,
        left: SurrogateKey,
        right: SurrogateKey,
        discriminator: Option<&str>,
    ) -> Result<bool, StoreError> {
        let columns: Vec<&str> = table.columns().iter().map(|c| c.name).collect();
        let constraint = table.constraint_name();
        let sql = insert_sql(table.name, &columns, Some(&constraint));

        let mut query = sqlx::query(&sql).bind(left.0).bind(right.0);
        if table.discriminator.is_some() {
            query = query.bind(discriminator.map(str::to_string));
        }

        let result = query
            .execute(&mut *self.conn)
            .await
            .map_err(|e| classify_sqlx_error(table.name, e))?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_sql_uses_is_null_for_missing_columns() {
        let key = Record::new()
            .set("country_letters", "DE")
            .set("country_name", Scalar::Null)
            .set("state", Scalar::Null)
            .set("city", "Berlin");
        assert_eq!(
            lookup_sql("dim_location", &key),
            "SELECT id FROM dim_location WHERE country_letters = $1 AND country_name IS NULL AND state IS NULL AND city = $2 LIMIT 1"
        );
    }

    #[test]
    fn test_insert_sql_with_conflict_target() {
        assert_eq!(
            insert_sql("dim_prf_language", &["language"], Some("dim_prf_language_natural_key")),
            "INSERT INTO dim_prf_language (language) VALUES ($1) ON CONFLICT ON CONSTRAINT dim_prf_language_natural_key DO NOTHING"
        );
    }

    #[test]
    fn test_insert_sql_without_conflict_target() {
        assert_eq!(
            insert_sql("fact_cmp_update", &["id_company", "likes"], None),
            "INSERT INTO fact_cmp_update (id_company, likes) VALUES ($1, $2)"
        );
    }
}
