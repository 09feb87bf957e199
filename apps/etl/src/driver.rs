//! Batch/Concurrency Driver.
//!
//! Every partition becomes one tokio task. A semaphore caps how many run at
//! once; each running task opens its own source and store handles and walks
//! its documents sequentially. Task results are awaited in partition order,
//! so a failed or panicking partition is recorded without disturbing its
//! siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{DocumentError, PartitionError};
use crate::source::{DocumentQuery, PartitionSpec, SourceConnector, Window};
use crate::store::StoreConnector;
use crate::walker::{DocumentProcessor, ImportContext, ProcessResult, SubObjectIssue};

const PROGRESS_EVERY: usize = 100;

/// Splits `total` matching documents into skip/limit windows of
/// `partition_size`. A size of zero yields a single unbounded partition.
pub fn plan_partitions(query: &DocumentQuery, total: u64, partition_size: u64) -> Vec<PartitionSpec> {
    if total == 0 {
        return Vec::new();
    }
    if partition_size == 0 {
        return vec![PartitionSpec::whole(query.clone())];
    }
    (0..total.div_ceil(partition_size))
        .map(|i| PartitionSpec {
            index: i as usize,
            query: query.clone(),
            window: Some(Window {
                skip: i * partition_size,
                limit: partition_size,
            }),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub worker_count: usize,
    pub partition_deadline: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum PartitionStatus {
    Completed,
    Failed(PartitionError),
    /// Stopped by shutdown after it had started.
    Interrupted,
    /// Never started because shutdown came first.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub partition: PartitionSpec,
    pub status: PartitionStatus,
    pub documents_processed: usize,
    pub documents_rejected: usize,
    pub facts_written: usize,
    pub relationships_written: usize,
    pub dimensions_resolved: usize,
    pub rejections: Vec<String>,
    pub issues: Vec<SubObjectIssue>,
}

impl PartitionReport {
    fn new(partition: PartitionSpec) -> Self {
        Self {
            partition,
            status: PartitionStatus::Completed,
            documents_processed: 0,
            documents_rejected: 0,
            facts_written: 0,
            relationships_written: 0,
            dimensions_resolved: 0,
            rejections: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn with_status(partition: PartitionSpec, status: PartitionStatus) -> Self {
        Self {
            status,
            ..Self::new(partition)
        }
    }

    fn absorb(&mut self, result: ProcessResult) {
        self.documents_processed += 1;
        self.facts_written += result.facts_written;
        self.relationships_written += result.relationships_written;
        self.dimensions_resolved += result.dimensions_resolved;
        self.issues.extend(result.issues);
    }

    fn fail(mut self, err: PartitionError) -> Self {
        error!("Partition {} failed: {}", self.partition.index, err);
        self.status = PartitionStatus::Failed(err);
        self
    }
}

/// Outcome of a whole run. Partitions appear in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub importer: String,
    pub collection: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub partitions_total: usize,
    pub partitions_completed: usize,
    pub documents_processed: usize,
    pub documents_rejected: usize,
    pub facts_written: usize,
    pub relationships_written: usize,
    pub dimensions_resolved: usize,
    pub partitions: Vec<PartitionReport>,
}

impl RunSummary {
    fn from_reports(
        processor: &dyn DocumentProcessor,
        ctx: &ImportContext,
        started_at: DateTime<Utc>,
        partitions: Vec<PartitionReport>,
    ) -> Self {
        let sum = |f: fn(&PartitionReport) -> usize| partitions.iter().map(f).sum::<usize>();
        Self {
            run_id: ctx.run_id,
            importer: processor.name().to_string(),
            collection: ctx.collection.clone(),
            started_at,
            finished_at: Utc::now(),
            partitions_total: partitions.len(),
            partitions_completed: partitions
                .iter()
                .filter(|p| p.status == PartitionStatus::Completed)
                .count(),
            documents_processed: sum(|p| p.documents_processed),
            documents_rejected: sum(|p| p.documents_rejected),
            facts_written: sum(|p| p.facts_written),
            relationships_written: sum(|p| p.relationships_written),
            dimensions_resolved: sum(|p| p.dimensions_resolved),
            partitions,
        }
    }

    pub fn failed_partitions(&self) -> Vec<&PartitionReport> {
        self.partitions
            .iter()
            .filter(|p| matches!(p.status, PartitionStatus::Failed(_)))
            .collect()
    }

    pub fn issues(&self) -> impl Iterator<Item = &SubObjectIssue> {
        self.partitions.iter().flat_map(|p| p.issues.iter())
    }

    /// True when any partition did not run to completion.
    pub fn is_partial(&self) -> bool {
        self.partitions_completed < self.partitions_total
    }
}

/// Everything a partition task needs, cloned into each task.
#[derive(Clone)]
struct Worker {
    processor: Arc<dyn DocumentProcessor>,
    ctx: ImportContext,
    stores: Arc<dyn StoreConnector>,
    sources: Arc<dyn SourceConnector>,
    deadline: Option<Duration>,
    shutdown: watch::Receiver<bool>,
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

async fn with_deadline<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl Worker {
    async fn run_partition(mut self, spec: PartitionSpec) -> PartitionReport {
        let index = spec.index;
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let report = PartitionReport::new(spec.clone());

        let docs = {
            let mut source = match self.sources.open().await {
                Ok(source) => source,
                Err(e) => return report.fail(PartitionError::Connect(e.to_string())),
            };
            match with_deadline(deadline, source.fetch(&spec)).await {
                None => return report.fail(PartitionError::DeadlineExceeded),
                Some(Err(e)) => return report.fail(PartitionError::Source(e.to_string())),
                Some(Ok(docs)) => docs,
            }
        };

        let mut store = match self.stores.connect().await {
            Ok(store) => store,
            Err(e) => return report.fail(PartitionError::Connect(e.to_string())),
        };

        info!("Partition {} started: {} documents", index, docs.len());
        let mut report = report;

        for doc in &docs {
            if stopping(&self.shutdown) {
                report.status = PartitionStatus::Interrupted;
                break;
            }

            let work = with_deadline(
                deadline,
                self.processor.process_document(store.as_mut(), doc, &self.ctx),
            );
            let outcome = tokio::select! {
                Ok(()) = self.shutdown.changed() => {
                    report.status = PartitionStatus::Interrupted;
                    break;
                }
                outcome = work => outcome,
            };

            match outcome {
                None => return report.fail(PartitionError::DeadlineExceeded),
                Some(Ok(result)) => report.absorb(result),
                Some(Err(e @ DocumentError::StoreUnavailable { .. })) => {
                    return report.fail(PartitionError::StoreUnavailable(e.to_string()));
                }
                Some(Err(e @ DocumentError::Rejected { .. })) => {
                    warn!("{}", e);
                    report.documents_rejected += 1;
                    report.rejections.push(e.to_string());
                }
            }

            if report.documents_processed > 0 && report.documents_processed % PROGRESS_EVERY == 0 {
                info!(
                    "Partition {}: {}/{} documents",
                    index,
                    report.documents_processed,
                    docs.len()
                );
            }
        }

        if report.status == PartitionStatus::Interrupted {
            warn!(
                "Partition {} interrupted after {} documents",
                index, report.documents_processed
            );
        } else {
            info!(
                "Partition {} completed: {} documents, {} rejected, {} issues",
                index,
                report.documents_processed,
                report.documents_rejected,
                report.issues.len()
            );
        }
        report
    }
}

/// Imports every partition with at most `worker_count` running at once.
///
/// Flipping `shutdown` to true stops in-flight partitions between (or in the
/// middle of) documents and skips those not yet started. Rows already written
/// stay; the returned summary says which partitions are incomplete.
pub async fn run(
    partitions: Vec<PartitionSpec>,
    options: &RunOptions,
    processor: Arc<dyn DocumentProcessor>,
    ctx: ImportContext,
    stores: Arc<dyn StoreConnector>,
    sources: Arc<dyn SourceConnector>,
    shutdown: watch::Receiver<bool>,
) -> RunSummary {
    let started_at = Utc::now();
    let workers = options.worker_count.max(1);
    info!(
        "Run {}: {} partitions of {} with {} workers",
        ctx.run_id,
        partitions.len(),
        ctx.collection,
        workers
    );

    let permits = Arc::new(Semaphore::new(workers));
    let worker = Worker {
        processor: processor.clone(),
        ctx: ctx.clone(),
        stores,
        sources,
        deadline: options.partition_deadline,
        shutdown,
    };

    let mut handles: Vec<(PartitionSpec, JoinHandle<PartitionReport>)> =
        Vec::with_capacity(partitions.len());
    for spec in partitions {
        let permits = permits.clone();
        let worker = worker.clone();
        let task_spec = spec.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return PartitionReport::with_status(task_spec, PartitionStatus::Skipped);
            };
            if stopping(&worker.shutdown) {
                return PartitionReport::with_status(task_spec, PartitionStatus::Skipped);
            }
            worker.run_partition(task_spec).await
        });
        handles.push((spec, handle));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (spec, handle) in handles {
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => PartitionReport::new(spec).fail(PartitionError::Panicked(e.to_string())),
        };
        reports.push(report);
    }

    let summary = RunSummary::from_reports(processor.as_ref(), &ctx, started_at, reports);
    info!(
        "Run {} finished: {}/{} partitions completed, {} documents, {} rejected",
        summary.run_id,
        summary.partitions_completed,
        summary.partitions_total,
        summary.documents_processed,
        summary.documents_rejected
    );
    summary
}
