//! CREATE TABLE statements generated from the table descriptors.
//!
//! Natural keys and relationship edges carry `UNIQUE NULLS NOT DISTINCT`
//! constraints (PostgreSQL 15+). The resolver's conditional insert depends on
//! them: two NULLs in a key column must collide, otherwise partially populated
//! keys such as a location without a city would duplicate.

use super::{Column, ColumnType, DimensionTable, FactTable, RelationshipTable, TableDef};

pub fn sql_type(ty: ColumnType) -> String {
    match ty {
        ColumnType::Text => "TEXT".to_string(),
        ColumnType::BigInt => "BIGINT".to_string(),
        ColumnType::Double => "DOUBLE PRECISION".to_string(),
        ColumnType::Boolean => "BOOLEAN".to_string(),
        ColumnType::Date => "DATE".to_string(),
        ColumnType::Key(target) => format!("BIGINT REFERENCES {target}(id)"),
    }
}

fn column_defs(columns: &[Column], not_null: bool) -> Vec<String> {
    columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", c.name, sql_type(c.ty));
            if not_null {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect()
}

fn create_table(name: &str, mut body: Vec<String>) -> String {
    body.insert(0, "id BIGSERIAL PRIMARY KEY".to_string());
    format!(
        "CREATE TABLE IF NOT EXISTS {name} (\n    {}\n)",
        body.join(",\n    ")
    )
}

fn dimension_ddl(table: &DimensionTable) -> String {
    let mut body = column_defs(table.key_columns, false);
    body.extend(column_defs(table.attribute_columns, false));
    let keys: Vec<_> = table.key_columns.iter().map(|c| c.name).collect();
    body.push(format!(
        "CONSTRAINT {} UNIQUE NULLS NOT DISTINCT ({})",
        table.constraint_name(),
        keys.join(", ")
    ));
    create_table(table.name, body)
}

fn fact_ddl(table: &FactTable) -> String {
    create_table(table.name, column_defs(table.columns, false))
}

fn relationship_ddl(table: &RelationshipTable) -> String {
    let mut body = column_defs(&[table.left, table.right], true);
    body.extend(column_defs(table.discriminator.as_slice(), false));
    let edge: Vec<_> = table.columns().iter().map(|c| c.name).collect();
    body.push(format!(
        "CONSTRAINT {} UNIQUE NULLS NOT DISTINCT ({})",
        table.constraint_name(),
        edge.join(", ")
    ));
    create_table(table.name, body)
}

pub fn create_statement(table: &TableDef) -> String {
    match table {
        TableDef::Dimension(t) => dimension_ddl(t),
        TableDef::Fact(t) => fact_ddl(t),
        TableDef::Relationship(t) => relationship_ddl(t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tables::{DIM_LOCATION, FACT_PRF_PERSON, REL_PRF_PERSON_RELATED};

    #[test]
    fn test_dimension_ddl_has_null_safe_unique_key() {
        let sql = create_statement(&TableDef::Dimension(&DIM_LOCATION));
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS dim_location"));
        assert!(sql.contains(
            "CONSTRAINT dim_location_natural_key UNIQUE NULLS NOT DISTINCT (country_letters, country_name, state, city)"
        ));
    }

    #[test]
    fn test_fact_ddl_references_dimensions() {
        let sql = create_statement(&TableDef::Fact(&FACT_PRF_PERSON));
        assert!(sql.contains("id_location BIGINT REFERENCES dim_location(id)"));
        assert!(sql.contains("profile_picture BOOLEAN"));
        assert!(!sql.contains("UNIQUE"));
    }

    #[test]
    fn test_relationship_ddl_includes_discriminator_in_edge() {
        let sql = create_statement(&TableDef::Relationship(&REL_PRF_PERSON_RELATED));
        assert!(sql.contains("id_person BIGINT REFERENCES fact_prf_person(id) NOT NULL"));
        assert!(sql.contains("type TEXT,") || sql.contains("type TEXT\n"));
        assert!(sql.contains("UNIQUE NULLS NOT DISTINCT (id_person, id_related, type)"));
    }
}
