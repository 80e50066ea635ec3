//! Arbitration between the automatic full-coverage crawl and manual
//! selective crawls.
//!
//! A manual crawl preempts the automatic one. Requests that arrive while a
//! manual crawl is active wait in a persisted FIFO. Once the manual worker is
//! idle and nothing is queued, the automatic crawl resumes from its
//! checkpoint.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::grid::{GridError, GridTiler};
use crate::models::{CrawlRun, CrawlScope, NewCrawlRun, RunKind, RunStatus, ScraperState, WorkerType};
use crate::registry::{RegistryError, StatusRegistry};
use crate::repository::{DieselCrawlRunRepository, DieselError, DieselRequestQueueRepository};

/// Worker type running the automatic crawl.
pub const AUTOMATIC_WORKER: WorkerType = WorkerType::Poi;
/// Worker type running manual crawls.
pub const MANUAL_WORKER: WorkerType = WorkerType::PoiManual;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("{0} is disabled")]
    Disabled(WorkerType),
}

/// What happened to a manual crawl request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualOutcome {
    /// The manual crawl started immediately on this run.
    Started { run_id: i32 },
    /// The request waits behind an active manual crawl.
    Queued { request_id: i32, position: i64 },
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A manual crawl is running or paused; the automatic crawl stays paused.
    ManualActive,
    /// The next queued request started on this run.
    StartedQueued { run_id: i32 },
    /// The automatic crawl was resumed from its checkpoint.
    ResumedAutomatic,
    /// Nothing to do.
    Idle,
}

/// Owns the manual request queue and the pause/resume handoff between the
/// automatic and manual workers.
#[derive(Clone)]
pub struct CrawlQueueManager {
    registry: StatusRegistry,
    runs: DieselCrawlRunRepository,
    queue: DieselRequestQueueRepository,
    tiler: GridTiler,
}

impl CrawlQueueManager {
    pub fn new(
        registry: StatusRegistry,
        runs: DieselCrawlRunRepository,
        queue: DieselRequestQueueRepository,
        tiler: GridTiler,
    ) -> Self {
        Self {
            registry,
            runs,
            queue,
            tiler,
        }
    }

    async fn manual_active(&self) -> Result<bool, QueueError> {
        let manual = self.registry.get(MANUAL_WORKER).await?;
        Ok(is_active(manual.state))
    }

    /// Submit a manual crawl request.
    pub async fn request_manual(&self, scope: CrawlScope) -> Result<ManualOutcome, QueueError> {
        let scope = scope.normalized();
        // Reject unknown states up front rather than when the request is popped.
        self.tiler.tile_regions(&scope.states)?;

        let waiting = self.queue.pending_count(MANUAL_WORKER).await?;
        if self.manual_active().await? || waiting > 0 {
            let request_id = self.queue.enqueue(MANUAL_WORKER, &scope).await?;
            info!(
                "Manual crawl queued as request {} (position {})",
                request_id,
                waiting + 1
            );
            return Ok(ManualOutcome::Queued {
                request_id,
                position: waiting + 1,
            });
        }

        let run = self.start_manual(scope).await?;
        Ok(ManualOutcome::Started { run_id: run.id })
    }

    /// Pause the automatic crawl if it is running.
    pub async fn pause_automatic(&self) -> Result<bool, QueueError> {
        let auto = self.registry.get(AUTOMATIC_WORKER).await?;
        if auto.state != ScraperState::Running {
            return Ok(false);
        }

        self.registry.pause_for_queue(AUTOMATIC_WORKER).await?;
        if let Some(run) = self.runs.active_for(AUTOMATIC_WORKER).await? {
            if run.status == RunStatus::Running {
                self.runs.pause(run.id).await?;
            }
        }
        Ok(true)
    }

    /// Resume the automatic crawl if the queue manager paused it.
    pub async fn resume_automatic(&self) -> Result<bool, QueueError> {
        let auto = self.registry.get(AUTOMATIC_WORKER).await?;
        if auto.state != ScraperState::Paused || !auto.auto_paused {
            return Ok(false);
        }

        self.registry.resume(AUTOMATIC_WORKER).await?;
        if let Some(run) = self.runs.active_for(AUTOMATIC_WORKER).await? {
            if run.status == RunStatus::Paused {
                self.runs.resume(run.id).await?;
            }
        }
        info!("Automatic crawl resumed");
        Ok(true)
    }

    /// Preempt the automatic crawl and start a selective manual run.
    ///
    /// If the manual worker cannot start, an automatic crawl paused here is
    /// resumed before the error is returned.
    async fn start_manual(&self, scope: CrawlScope) -> Result<CrawlRun, QueueError> {
        let manual = self.registry.get(MANUAL_WORKER).await?;
        if !manual.enabled {
            return Err(QueueError::Disabled(MANUAL_WORKER));
        }
        let total_cells = self.tiler.tile_regions(&scope.states)?.len() as i32;

        let paused = self.pause_automatic().await?;
        match self.launch_manual(scope, total_cells).await {
            Ok(run) => Ok(run),
            Err(e) => {
                warn!("Manual crawl failed to start: {}", e);
                if paused {
                    if let Err(err) = self.resume_automatic().await {
                        warn!("Failed to resume automatic crawl: {}", err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn launch_manual(&self, scope: CrawlScope, total_cells: i32) -> Result<CrawlRun, QueueError> {
        let new = NewCrawlRun {
            scraper_type: MANUAL_WORKER,
            kind: RunKind::Selective,
            scope: scope.clone(),
            total_cells,
        };

        let (mut run, mut created) = self.runs.create_or_resume(&new).await?;
        if !created && run.scope != scope {
            debug!("Stopping leftover manual run {}", run.id);
            self.runs.stop(run.id).await?;
            (run, created) = self.runs.create_or_resume(&new).await?;
        }

        if let Err(e) = self.registry.start(MANUAL_WORKER, Some(scope.to_config())).await {
            if created {
                self.runs.stop(run.id).await?;
            }
            return Err(e.into());
        }
        self.registry.attach_run(MANUAL_WORKER, &run).await?;

        info!(
            "Manual crawl started on run {} ({} cells, states: {}, categories: {})",
            run.id,
            run.total_cells,
            describe(&scope.states),
            describe(&scope.categories)
        );
        Ok(run)
    }

    /// Hand control to whichever crawl should be running now.
    ///
    /// A queued request is marked started only once its run is up. While the
    /// manual worker is disabled, requests stay pending.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, QueueError> {
        let manual = self.registry.get(MANUAL_WORKER).await?;
        if is_active(manual.state) {
            self.pause_automatic().await?;
            return Ok(ReconcileOutcome::ManualActive);
        }

        if let Some(request) = self.queue.peek_next(MANUAL_WORKER).await? {
            if manual.enabled {
                debug!("Starting queued manual request {}", request.id);
                let run = self.start_manual(request.scope).await?;
                self.queue.mark_started(request.id).await?;
                return Ok(ReconcileOutcome::StartedQueued { run_id: run.id });
            }
            debug!(
                "Request {} waits until {} is enabled",
                request.id, MANUAL_WORKER
            );
        }

        if self.resume_automatic().await? {
            return Ok(ReconcileOutcome::ResumedAutomatic);
        }
        Ok(ReconcileOutcome::Idle)
    }

    /// Pending manual requests.
    pub async fn pending(&self) -> Result<Vec<crate::repository::QueuedRequest>, QueueError> {
        Ok(self.queue.pending(MANUAL_WORKER).await?)
    }
}

fn is_active(state: ScraperState) -> bool {
    matches!(state, ScraperState::Running | ScraperState::Paused)
}

fn describe(items: &[String]) -> String {
    if items.is_empty() {
        "all".to_string()
    } else {
        items.join(",")
    }
}
