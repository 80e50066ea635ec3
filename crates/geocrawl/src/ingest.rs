//! Upsert engine: merges normalized records into storage in batches.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::models::{NormalizedRecord, RunProgress, WorkerType};
use crate::registry::StatusRegistry;
use crate::repository::DieselGeoRecordRepository;

/// Records committed per transaction unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Running totals of one ingest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestTotals {
    /// Records offered to the engine.
    pub found: i64,
    /// Records inserted.
    pub saved: i64,
    /// Existing records overwritten.
    pub updated: i64,
    /// Batches rolled back.
    pub failed_batches: i64,
}

/// Receives running totals after every batch.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn batch_committed(&self, totals: &IngestTotals);
}

/// Mirrors ingest totals onto a worker's status row, on top of the run's
/// progress before the ingest started.
pub struct RegistrySink<'a> {
    registry: &'a StatusRegistry,
    worker: WorkerType,
    base: RunProgress,
}

impl<'a> RegistrySink<'a> {
    pub fn new(registry: &'a StatusRegistry, worker: WorkerType, base: RunProgress) -> Self {
        Self {
            registry,
            worker,
            base,
        }
    }
}

#[async_trait]
impl ProgressSink for RegistrySink<'_> {
    async fn batch_committed(&self, totals: &IngestTotals) {
        let progress = RunProgress {
            items_found: self.base.items_found + totals.found,
            items_saved: self.base.items_saved + totals.saved,
            items_updated: self.base.items_updated + totals.updated,
            ..self.base
        };
        if let Err(e) = self
            .registry
            .report_progress(self.worker, &progress, "Saving records")
            .await
        {
            warn!("Failed to report progress for {}: {}", self.worker, e);
        }
    }
}

/// Batched upserts keyed by `(kind, external_id)`.
#[derive(Clone)]
pub struct UpsertEngine {
    repo: DieselGeoRecordRepository,
    batch_size: usize,
}

impl UpsertEngine {
    pub fn new(repo: DieselGeoRecordRepository) -> Self {
        Self::with_batch_size(repo, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(repo: DieselGeoRecordRepository, batch_size: usize) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Upsert records batch by batch.
    ///
    /// A failing batch is rolled back on its own and contributes nothing to
    /// the saved or updated totals. Batches committed before it stay committed.
    pub async fn ingest(
        &self,
        worker: WorkerType,
        records: &[NormalizedRecord],
        sink: Option<&dyn ProgressSink>,
    ) -> IngestTotals {
        let mut totals = IngestTotals::default();

        for batch in records.chunks(self.batch_size) {
            totals.found += batch.len() as i64;
            match self.repo.upsert_batch(worker, batch).await {
                Ok(outcome) => {
                    totals.saved += outcome.inserted;
                    totals.updated += outcome.updated;
                    debug!(
                        "{}: batch of {} committed ({} new, {} updated)",
                        worker,
                        batch.len(),
                        outcome.inserted,
                        outcome.updated
                    );
                }
                Err(e) => {
                    totals.failed_batches += 1;
                    warn!("{}: batch of {} rolled back: {}", worker, batch.len(), e);
                }
            }
            if let Some(sink) = sink {
                sink.batch_committed(&totals).await;
            }
        }

        totals
    }
}
