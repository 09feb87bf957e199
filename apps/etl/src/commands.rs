use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{create_pool, create_staging, run_migrations};
use crate::driver::{self, plan_partitions, PartitionStatus, RunOptions, RunSummary};
use crate::source::{
    load_jsonl, DocumentQuery, MemoryDocumentSource, PgSourceConnector, PgStagingSink,
    SourceConnector,
};
use crate::store::{MemoryWarehouse, PgConnector, StoreConnector};
use crate::walker::{self, DocumentProcessor, ImportContext, IMPORTERS};

#[derive(Parser, Debug)]
#[command(name = "etl")]
#[command(about = "Dimensional upsert ETL for staged profile, company and survey documents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create warehouse and staging tables
    Migrate,

    /// Load a JSON-lines export into the staging table
    Stage {
        /// Collection the documents are staged under
        collection: String,

        /// JSON-lines file, one document per line
        path: PathBuf,

        /// Keep only every Nth line
        #[arg(long, default_value_t = 1, value_parser = parse_every)]
        every: usize,
    },

    /// Import a staged collection into the warehouse
    Import {
        /// profiles, companies or survey
        #[arg(value_parser = parse_importer)]
        importer: String,

        /// Staged collection to read (defaults to the importer name)
        collection: Option<String>,

        /// Only documents where this attribute is a non-empty list
        #[arg(long)]
        non_empty: Option<String>,

        /// Comma-separated fields to read; all fields when omitted
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,
    },

    /// Import a JSON-lines file into an in-memory warehouse
    DryRun {
        #[arg(value_parser = parse_importer)]
        importer: String,

        path: PathBuf,
    },
}

fn parse_every(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_importer(name: &str) -> Result<String, String> {
    if IMPORTERS.contains(&name) {
        Ok(name.to_string())
    } else {
        Err(format!("expected one of {}", IMPORTERS.join(", ")))
    }
}

fn processor(name: &str) -> Result<Arc<dyn DocumentProcessor>> {
    walker::importer(name).ok_or_else(|| anyhow!("unknown importer '{name}'"))
}

fn run_options(config: &Config) -> RunOptions {
    RunOptions {
        worker_count: config.workers,
        partition_deadline: config.partition_deadline,
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check_complete(summary: &RunSummary) -> Result<()> {
    let issues = summary.issues().count();
    if issues > 0 {
        warn!("Run {} recorded {} sub-object issues", summary.run_id, issues);
    }
    if !summary.is_partial() {
        return Ok(());
    }

    let failures: Vec<String> = summary
        .failed_partitions()
        .into_iter()
        .filter_map(|report| match &report.status {
            PartitionStatus::Failed(err) => Some(format!("partition {}: {}", report.partition.index, err)),
            _ => None,
        })
        .collect();
    for failure in &failures {
        error!("Run {} {}", summary.run_id, failure);
    }
    bail!(
        "run {} incomplete: {} of {} partitions did not complete{}",
        summary.run_id,
        summary.partitions_total - summary.partitions_completed,
        summary.partitions_total,
        if failures.is_empty() {
            String::new()
        } else {
            format!(" ({})", failures.join("; "))
        }
    );
}

pub async fn execute(command: Command, config: &Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    match command {
        Command::Migrate => migrate(config).await,
        Command::Stage {
            collection,
            path,
            every,
        } => stage(config, &collection, &path, every).await,
        Command::Import {
            importer,
            collection,
            non_empty,
            fields,
        } => {
            let collection = collection.unwrap_or_else(|| importer.clone());
            let mut query = DocumentQuery::collection(collection);
            if let Some(attribute) = non_empty {
                query = query.non_empty(attribute);
            }
            if let Some(fields) = fields {
                query = query.project(fields);
            }
            let summary = import(config, &importer, query, shutdown).await?;
            print_json(&summary)?;
            check_complete(&summary)
        }
        Command::DryRun { importer, path } => {
            let (summary, tables) = dry_run(config, &importer, &path, shutdown).await?;
            let tables: BTreeMap<String, usize> = tables.into_iter().collect();
            print_json(&json!({ "tables": tables, "summary": &summary }))?;
            check_complete(&summary)
        }
    }
}

async fn migrate(config: &Config) -> Result<()> {
    let pool = create_pool(&config.database_url, 1).await?;
    run_migrations(&pool).await?;
    if config.source_database_url == config.database_url {
        create_staging(&pool).await
    } else {
        create_staging(&create_pool(&config.source_database_url, 1).await?).await
    }
}

async fn stage(config: &Config, collection: &str, path: &std::path::Path, every: usize) -> Result<()> {
    let pool = create_pool(&config.source_database_url, 2).await?;
    let mut sink = PgStagingSink::new(pool);
    let stats = load_jsonl(path, collection, every, &mut sink)
        .await
        .with_context(|| format!("Failed to stage {}", path.display()))?;
    print_json(&stats)
}

/// Imports one staged collection into the warehouse.
pub async fn import(
    config: &Config,
    importer: &str,
    query: DocumentQuery,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let processor = processor(importer)?;
    let warehouse = create_pool(&config.database_url, config.max_connections).await?;
    let source_pool = if config.source_database_url == config.database_url {
        warehouse.clone()
    } else {
        create_pool(&config.source_database_url, config.max_connections).await?
    };

    let stores: Arc<dyn StoreConnector> = Arc::new(PgConnector::new(warehouse));
    let sources: Arc<dyn SourceConnector> = Arc::new(PgSourceConnector::new(source_pool));
    execute_run(config, processor, query, stores, sources, shutdown).await
}

/// Runs an importer over a JSON-lines file without touching any database.
/// Returns the summary and the per-table row counts.
pub async fn dry_run(
    config: &Config,
    importer: &str,
    path: &std::path::Path,
    shutdown: watch::Receiver<bool>,
) -> Result<(RunSummary, Vec<(String, usize)>)> {
    let processor = processor(importer)?;
    let mut source = MemoryDocumentSource::new();
    let stats = load_jsonl(path, importer, 1, &mut source)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!("Dry run over {} documents", stats.documents_staged);

    let warehouse = MemoryWarehouse::new();
    let summary = execute_run(
        config,
        processor,
        DocumentQuery::collection(importer),
        Arc::new(warehouse.clone()),
        Arc::new(source),
        shutdown,
    )
    .await?;
    Ok((summary, warehouse.table_counts().await))
}

async fn execute_run(
    config: &Config,
    processor: Arc<dyn DocumentProcessor>,
    query: DocumentQuery,
    stores: Arc<dyn StoreConnector>,
    sources: Arc<dyn SourceConnector>,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let total = sources
        .open()
        .await
        .context("Failed to open document source")?
        .count(&query)
        .await
        .with_context(|| format!("Failed to count {}", query.collection))?;
    if total == 0 {
        warn!("No documents in {} match the query", query.collection);
    }

    let ctx = {
        let mut store = stores.connect().await.context("Failed to connect to warehouse")?;
        ImportContext::prepare(store.as_mut(), &query.collection)
            .await
            .context("Failed to resolve origin")?
    };

    info!(
        "Importing {} {} documents with {}",
        total,
        query.collection,
        processor.name()
    );
    let partitions = plan_partitions(&query, total, config.partition_size);
    Ok(driver::run(
        partitions,
        &run_options(config),
        processor,
        ctx,
        stores,
        sources,
        shutdown,
    )
    .await)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::source::SourceDocument;

    fn parse(line: &str) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("etl").chain(line.split_whitespace())).map(|cli| cli.command)
    }

    fn test_config() -> Config {
        Config {
            database_url: "postgres://unused".into(),
            source_database_url: "postgres://unused".into(),
            workers: 2,
            partition_size: 2,
            partition_deadline: None,
            max_connections: 4,
            rust_log: "info".into(),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("migrate").unwrap(), Command::Migrate);
        assert_eq!(
            parse("stage profiles data.jsonl --every 10").unwrap(),
            Command::Stage {
                collection: "profiles".into(),
                path: PathBuf::from("data.jsonl"),
                every: 10
            }
        );
        assert_eq!(
            parse("import profiles --non-empty experiences --fields full_name,skills").unwrap(),
            Command::Import {
                importer: "profiles".into(),
                collection: None,
                non_empty: Some("experiences".into()),
                fields: Some(vec!["full_name".into(), "skills".into()])
            }
        );
        assert_eq!(
            parse("import survey tjs_2023").unwrap(),
            Command::Import {
                importer: "survey".into(),
                collection: Some("tjs_2023".into()),
                non_empty: None,
                fields: None
            }
        );
        assert!(matches!(parse("dry-run companies c.jsonl").unwrap(), Command::DryRun { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse("").is_err());
        assert!(parse("import resumes").is_err());
        assert!(parse("stage profiles data.jsonl --every 0").is_err());
        assert!(parse("stage profiles data.jsonl --every").is_err());
        assert!(parse("migrate --every 2").is_err());
    }

    #[tokio::test]
    async fn test_dry_run_imports_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"_id": "p1", "full_name": "Ada", "skills": ["Rust", "SQL"]}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"_id": "p2", "full_name": "Grace", "skills": ["rust"]}}"#).unwrap();
        writeln!(file, r#"{{"_id": "p3", "full_name": "Linus"}}"#).unwrap();

        let (_tx, rx) = watch::channel(false);
        let (summary, tables) = dry_run(&test_config(), "profiles", file.path(), rx)
            .await
            .unwrap();

        assert_eq!(summary.partitions_total, 2);
        assert_eq!(summary.documents_processed, 3);
        assert!(!summary.is_partial());
        let count = |name: &str| tables.iter().find(|(t, _)| t == name).map_or(0, |(_, n)| *n);
        assert_eq!(count("fact_prf_person"), 3);
        assert_eq!(count("dim_prf_trait"), 2);
        assert_eq!(count("rel_prf_person_trait"), 3);
        assert!(check_complete(&summary).is_ok());
    }

    #[tokio::test]
    async fn test_incomplete_run_names_failed_partitions() {
        let source = MemoryDocumentSource::new();
        for id in ["p1", "p2", "p3"] {
            let doc = SourceDocument::from_value(id, json!({ "full_name": id })).unwrap();
            source.insert("profiles", doc).await;
        }
        source.fail_partition(1).await;

        let (_tx, rx) = watch::channel(false);
        let summary = execute_run(
            &test_config(),
            processor("profiles").unwrap(),
            DocumentQuery::collection("profiles"),
            Arc::new(MemoryWarehouse::new()),
            Arc::new(source),
            rx,
        )
        .await
        .unwrap();

        assert_eq!(summary.failed_partitions().len(), 1);
        let err = check_complete(&summary).unwrap_err().to_string();
        assert!(err.contains("1 of 2 partitions"), "{err}");
        assert!(
            err.contains("partition 1: source read failed: document store unavailable: partition 1 unreadable"),
            "{err}"
        );
    }
}
