use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::schema::ddl::create_statement;
use crate::schema::tables::ALL_TABLES;
use crate::source::postgres::STAGING_DDL;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established ({max_connections} connections)");
    Ok(pool)
}

/// Creates the warehouse tables if missing. Dimensions before facts before
/// relationships, so foreign keys always point at existing tables.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for table in ALL_TABLES {
        sqlx::query(&create_statement(table))
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create table {}", table.name()))?;
    }

    info!("Schema ready: {} warehouse tables", ALL_TABLES.len());
    Ok(())
}

/// Creates the `source_documents` staging table if missing.
pub async fn create_staging(pool: &PgPool) -> Result<()> {
    for statement in STAGING_DDL {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create source_documents")?;
    }
    Ok(())
}
