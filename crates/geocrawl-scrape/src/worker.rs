//! The crawl loop: one worker type, one run, cell by cell.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use geocrawl::config::Settings;
use geocrawl::grid::{distance_meters, BoundingBox, GeoPoint, GridTiler, METERS_PER_MILE};
use geocrawl::ingest::{RegistrySink, UpsertEngine};
use geocrawl::models::{
    CrawlRun, CrawlScope, NewCrawlRun, NormalizedRecord, RunCounters, RunKind, RunProgress,
    ScraperState, WorkerType,
};
use geocrawl::registry::StatusRegistry;
use geocrawl::repository::{DbContext, DieselCrawlRunRepository, DieselGeoRecordRepository};

use crate::domains::{domain_for, Domain, Rejection};
use crate::element::RawElement;
use crate::error::{CrawlError, FetchError};
use crate::source::{source_for, CellSource};

/// How a crawl session ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Every cell processed.
    Completed { run_id: i32 },
    /// The row was paused by someone else, usually the queue manager.
    Paused { run_id: i32 },
    /// The source rate limited us; the row cools down until `until`.
    RateLimited { run_id: i32, until: DateTime<Utc> },
    /// The row left `running`.
    Stopped { run_id: i32 },
    /// Cancelled from inside the process. The run resumes on the next start.
    Interrupted { run_id: i32 },
    /// The row was not running to begin with.
    NotRunning,
}

/// Loop knobs, taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub request_delay: std::time::Duration,
    pub rate_limit_cooldown: Duration,
    pub max_consecutive_failures: u32,
    pub batch_size: usize,
}

impl From<&Settings> for WorkerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            request_delay: settings.request_delay(),
            rate_limit_cooldown: settings.rate_limit_cooldown(),
            max_consecutive_failures: settings.max_consecutive_failures,
            batch_size: settings.upsert_batch_size,
        }
    }
}

/// Crawls for one worker type.
pub struct CrawlWorker {
    worker: WorkerType,
    settings: Settings,
    options: WorkerOptions,
    registry: StatusRegistry,
    runs: DieselCrawlRunRepository,
    records: DieselGeoRecordRepository,
    engine: UpsertEngine,
    tiler: GridTiler,
    domain: Box<dyn Domain>,
    source: Option<Arc<dyn CellSource>>,
}

impl CrawlWorker {
    pub fn new(worker: WorkerType, settings: &Settings, ctx: &DbContext) -> Result<Self, CrawlError> {
        let options = WorkerOptions::from(settings);
        let records = ctx.geo_records();
        Ok(Self {
            worker,
            settings: settings.clone(),
            registry: StatusRegistry::new(ctx.scraper_status(), settings.stale_threshold()),
            runs: ctx.crawl_runs(),
            engine: UpsertEngine::with_batch_size(records.clone(), options.batch_size),
            records,
            tiler: settings.tiler()?,
            domain: domain_for(worker),
            source: None,
            options,
        })
    }

    /// Use a fixed source instead of building one from the row's payload.
    pub fn with_source(mut self, source: Arc<dyn CellSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.engine = UpsertEngine::with_batch_size(self.records.clone(), options.batch_size);
        self.options = options;
        self
    }

    pub fn worker(&self) -> WorkerType {
        self.worker
    }

    /// Crawl until the run completes, the row stops running, or `cancel`
    /// fires. Fatal errors mark both the run and the row failed.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<CrawlOutcome, CrawlError> {
        match self.crawl(cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = e.to_string();
                error!("{} crawl failed: {}", self.worker, message);
                match self.runs.active_for(self.worker).await {
                    Ok(Some(run)) => {
                        if let Err(err) = self.runs.fail(run.id, &message).await {
                            warn!("Failed to mark run {} failed: {}", run.id, err);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!("Failed to look up run for {}: {}", self.worker, err),
                }
                if let Err(err) = self.registry.fail(self.worker, &message).await {
                    warn!("Failed to mark {} failed: {}", self.worker, err);
                }
                Err(e)
            }
        }
    }

    /// Reuse the worker's open run, or start a new one if the open run was
    /// planned for a different scope or grid.
    async fn open_run(&self, scope: &CrawlScope, total_cells: i32) -> Result<CrawlRun, CrawlError> {
        let new = NewCrawlRun {
            scraper_type: self.worker,
            kind: if self.worker.is_manual() {
                RunKind::Selective
            } else {
                scope.kind()
            },
            scope: scope.clone(),
            total_cells,
        };

        let (run, created) = self.runs.create_or_resume(&new).await?;
        if created {
            info!(
                "{}: started run {} over {} cells",
                self.worker, run.id, total_cells
            );
            return Ok(run);
        }
        if run.scope == *scope && run.total_cells == total_cells {
            info!(
                "{}: resuming run {} at cell {}/{}",
                self.worker, run.id, run.current_cell, run.total_cells
            );
            return Ok(run);
        }

        info!(
            "{}: run {} was planned differently, starting over",
            self.worker, run.id
        );
        self.runs.stop(run.id).await?;
        let (run, _) = self.runs.create_or_resume(&new).await?;
        Ok(run)
    }

    async fn crawl(&self, cancel: &CancellationToken) -> Result<CrawlOutcome, CrawlError> {
        let status = self.registry.get(self.worker).await?;
        if status.state != ScraperState::Running {
            debug!("{} is {}, nothing to do", self.worker, status.state);
            return Ok(CrawlOutcome::NotRunning);
        }

        let source = match &self.source {
            Some(source) => Arc::clone(source),
            None => source_for(self.worker, &self.settings, &status.config)?,
        };
        let scope = CrawlScope::from_config(&status.config);
        let cells = source.plan(&self.tiler, &scope)?;
        let total_cells = cells.len() as i32;

        let run = self.open_run(&scope, total_cells).await?;
        self.runs.mark_running(run.id).await?;
        self.registry.attach_run(self.worker, &run).await?;

        let filters = self.domain.filters(&scope);
        let mut counters = run.counters;
        let mut consecutive_failures: u32 = 0;
        let start = run.current_cell.max(0) as usize;

        for (position, cell) in cells.iter().enumerate().skip(start) {
            if cancel.is_cancelled() {
                info!("{}: interrupted at cell {}/{}", self.worker, position, total_cells);
                return Ok(CrawlOutcome::Interrupted { run_id: run.id });
            }

            let row = self.registry.get(self.worker).await?;
            match row.state {
                ScraperState::Running => {}
                ScraperState::Paused => {
                    self.runs.pause(run.id).await?;
                    info!("{}: paused at cell {}/{}", self.worker, position, total_cells);
                    return Ok(CrawlOutcome::Paused { run_id: run.id });
                }
                other => {
                    self.runs.stop(run.id).await?;
                    info!("{}: row is {}, stopping", self.worker, other);
                    return Ok(CrawlOutcome::Stopped { run_id: run.id });
                }
            }

            let base = progress(&counters, position as i32, total_cells);
            let (delta, fetched) = match source.fetch_cell(cell, &filters).await {
                Ok(elements) => {
                    consecutive_failures = 0;
                    (self.process_cell(elements, &scope, base).await?, true)
                }
                Err(FetchError::RateLimited {
                    status,
                    retry_after_secs,
                }) => {
                    let retry_after = Duration::seconds(retry_after_secs.unwrap_or(0) as i64);
                    let cooldown = self.options.rate_limit_cooldown.max(retry_after);
                    warn!(
                        "{}: HTTP {} at cell {}/{}",
                        self.worker, status, position, total_cells
                    );
                    let row = self.registry.pause_for_rate_limit(self.worker, cooldown).await?;
                    self.runs.pause(run.id).await?;
                    return Ok(CrawlOutcome::RateLimited {
                        run_id: run.id,
                        until: row.cooldown_until.unwrap_or_else(|| Utc::now() + cooldown),
                    });
                }
                Err(e) if e.is_cell_error() => {
                    consecutive_failures += 1;
                    let message = format!("cell {} ({}): {}", cell.index, cell.region, e);
                    warn!("{}: {}", self.worker, message);
                    self.registry.record_error(self.worker, &message).await?;
                    if consecutive_failures > self.options.max_consecutive_failures {
                        self.runs
                            .advance(run.id, &RunCounters { errors: 1, ..Default::default() })
                            .await?;
                        return Err(CrawlError::TooManyFailures(consecutive_failures, message));
                    }
                    let delta = RunCounters {
                        errors: 1,
                        ..Default::default()
                    };
                    (delta, false)
                }
                Err(e) => return Err(e.into()),
            };

            self.runs.advance(run.id, &delta).await?;
            counters.add(&delta);
            // Progress clears the row's consecutive error count
            if fetched {
                self.registry
                    .report_progress(
                        self.worker,
                        &progress(&counters, position as i32 + 1, total_cells),
                        "Crawling",
                    )
                    .await?;
            }

            if position + 1 < cells.len() && !self.options.request_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("{}: interrupted after cell {}/{}", self.worker, position + 1, total_cells);
                        return Ok(CrawlOutcome::Interrupted { run_id: run.id });
                    }
                    _ = tokio::time::sleep(self.options.request_delay) => {}
                }
            }
        }

        if self.runs.complete(run.id).await? {
            self.registry.complete(self.worker).await?;
            Ok(CrawlOutcome::Completed { run_id: run.id })
        } else {
            warn!("{}: run {} could not be completed", self.worker, run.id);
            Ok(CrawlOutcome::Stopped { run_id: run.id })
        }
    }

    /// Normalize, de-duplicate and store one cell's elements.
    async fn process_cell(
        &self,
        elements: Vec<RawElement>,
        scope: &CrawlScope,
        base: RunProgress,
    ) -> Result<RunCounters, CrawlError> {
        let found = elements.len() as i64;
        let mut rejected: i64 = 0;

        let mut records: Vec<NormalizedRecord> = Vec::with_capacity(elements.len());
        for element in &elements {
            match self.domain.normalize(element, scope) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    debug!("{}: rejected {}: {}", self.worker, element.external_id(), reason);
                    rejected += 1;
                }
            }
        }

        if let Some(radius_m) = self.domain.dedup_radius_m() {
            let before = records.len();
            records = self.collapse_nearby(records, radius_m).await?;
            rejected += (before - records.len()) as i64;
        }

        let offered = records.len() as i64;
        let sink = RegistrySink::new(
            &self.registry,
            self.worker,
            RunProgress {
                items_found: base.items_found + (found - offered),
                items_rejected: base.items_rejected + rejected,
                ..base
            },
        );
        let totals = self.engine.ingest(self.worker, &records, Some(&sink)).await;

        Ok(RunCounters {
            items_found: found,
            items_saved: totals.saved,
            items_updated: totals.updated,
            items_rejected: rejected,
            errors: totals.failed_batches,
        })
    }

    /// Drop records within `radius_m` of one already kept, in this cell or in
    /// storage. Earlier external ids win inside a cell.
    async fn collapse_nearby(
        &self,
        mut records: Vec<NormalizedRecord>,
        radius_m: f64,
    ) -> Result<Vec<NormalizedRecord>, CrawlError> {
        records.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        let kind = self.domain.kind();
        let radius_miles = radius_m / METERS_PER_MILE;

        let mut kept: Vec<NormalizedRecord> = Vec::with_capacity(records.len());
        for record in records {
            let point = GeoPoint::new(record.latitude, record.longitude);
            let near = |lat: f64, lon: f64| distance_meters(point, GeoPoint::new(lat, lon)) <= radius_m;

            let in_cell = kept
                .iter()
                .find(|k| k.external_id != record.external_id && near(k.latitude, k.longitude))
                .map(|k| k.external_id.clone());
            let duplicate_of = match in_cell {
                Some(id) => Some(id),
                None => {
                    let area = BoundingBox::around(point, radius_miles);
                    self.records
                        .within_bounds(kind, area.south, area.west, area.north, area.east)
                        .await?
                        .into_iter()
                        .find(|r| r.external_id != record.external_id && near(r.latitude, r.longitude))
                        .map(|r| r.external_id)
                }
            };

            match duplicate_of {
                Some(id) => debug!(
                    "{}: {} {}",
                    self.worker,
                    record.external_id,
                    Rejection::Duplicate(id)
                ),
                None => kept.push(record),
            }
        }
        Ok(kept)
    }
}

fn progress(counters: &RunCounters, current_cell: i32, total_cells: i32) -> RunProgress {
    RunProgress {
        current_cell,
        total_cells,
        items_found: counters.items_found,
        items_saved: counters.items_saved,
        items_updated: counters.items_updated,
        items_rejected: counters.items_rejected,
        errors: counters.errors,
    }
}

/// Run the workers hosted by one service until none of them is running.
///
/// Members are crawled one at a time. Returns the number of sessions run.
pub async fn run_service(
    service: &str,
    settings: &Settings,
    ctx: &DbContext,
    cancel: &CancellationToken,
) -> Result<usize, CrawlError> {
    let members = settings.workers_for_service(service);
    if members.is_empty() {
        return Err(CrawlError::Config(format!(
            "no worker types are hosted by {}",
            service
        )));
    }
    info!(
        "Service {} hosts {}",
        service,
        members
            .iter()
            .map(WorkerType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let registry = StatusRegistry::new(ctx.scraper_status(), settings.stale_threshold());
    registry.ensure_all().await?;

    let mut sessions = 0;
    while !cancel.is_cancelled() {
        let mut next = None;
        for worker in &members {
            if registry.get(*worker).await?.state == ScraperState::Running {
                next = Some(*worker);
                break;
            }
        }
        let Some(worker) = next else {
            info!("Nothing running in {}, exiting", service);
            break;
        };

        sessions += 1;
        let crawler = CrawlWorker::new(worker, settings, ctx)?;
        match crawler.run(cancel).await {
            Ok(CrawlOutcome::Interrupted { .. }) => break,
            Ok(outcome) => info!("{}: {:?}", worker, outcome),
            // Already recorded on the run and the row
            Err(e) => debug!("{}: session ended with error: {}", worker, e),
        }
    }
    Ok(sessions)
}
