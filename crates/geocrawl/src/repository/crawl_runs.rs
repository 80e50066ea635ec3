//! Diesel-based crawl run repository.
//!
//! Status changes are conditional updates: a run only moves out of a status it
//! is actually in, so a run reaches a terminal status exactly once.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{CrawlRunRecord, NewCrawlRunRecord};
use super::pool::{DbPool, DieselError};
use super::util::{invalid_column, json_error};
use super::{parse_datetime, parse_datetime_opt, LastInsertRowId};
use crate::models::{
    CrawlRun, CrawlScope, NewCrawlRun, RunCounters, RunKind, RunStatus, WorkerType,
};
use crate::schema::crawl_runs;
use crate::with_conn;

/// Convert a database record to a domain model.
impl TryFrom<CrawlRunRecord> for CrawlRun {
    type Error = DieselError;

    fn try_from(record: CrawlRunRecord) -> Result<Self, Self::Error> {
        let categories: Vec<String> = serde_json::from_str(&record.categories).map_err(json_error)?;
        let states: Vec<String> = serde_json::from_str(&record.states).map_err(json_error)?;

        Ok(CrawlRun {
            id: record.id,
            scraper_type: WorkerType::from_str(&record.scraper_type)
                .ok_or_else(|| invalid_column("scraper_type", &record.scraper_type))?,
            kind: RunKind::from_str(&record.kind)
                .ok_or_else(|| invalid_column("run kind", &record.kind))?,
            scope: CrawlScope { categories, states },
            status: RunStatus::from_str(&record.status)
                .ok_or_else(|| invalid_column("run status", &record.status))?,
            current_cell: record.current_cell,
            total_cells: record.total_cells,
            counters: RunCounters {
                items_found: record.items_found,
                items_saved: record.items_saved,
                items_updated: record.items_updated,
                items_rejected: record.items_rejected,
                errors: record.errors,
            },
            started_at: parse_datetime(&record.started_at),
            updated_at: parse_datetime(&record.updated_at),
            finished_at: parse_datetime_opt(record.finished_at),
            last_error: record.last_error,
            last_error_at: parse_datetime_opt(record.last_error_at),
        })
    }
}

fn status_strs(statuses: &[RunStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

/// Diesel-based crawl run repository.
#[derive(Clone)]
pub struct DieselCrawlRunRepository {
    pool: DbPool,
}

impl DieselCrawlRunRepository {
    /// Create a new repository with an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a run, or return the worker's existing non-terminal run.
    ///
    /// The check and the insert share a transaction, so a worker type never
    /// has two non-terminal runs.
    pub async fn create_or_resume(&self, new: &NewCrawlRun) -> Result<(CrawlRun, bool), DieselError> {
        let now = Utc::now().to_rfc3339();
        let categories = serde_json::to_string(&new.scope.categories).map_err(json_error)?;
        let states = serde_json::to_string(&new.scope.states).map_err(json_error)?;
        let scraper_type = new.scraper_type.as_str();
        let kind = new.kind.as_str();
        let total_cells = new.total_cells.max(0);

        let (record, created) = with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let existing = crawl_runs::table
                        .filter(crawl_runs::scraper_type.eq(scraper_type))
                        .filter(crawl_runs::status.eq_any(status_strs(&RunStatus::ACTIVE)))
                        .order(crawl_runs::id.desc())
                        .select(CrawlRunRecord::as_select())
                        .first::<CrawlRunRecord>(conn)
                        .await
                        .optional()?;

                    if let Some(record) = existing {
                        return Ok((record, false));
                    }

                    diesel::insert_into(crawl_runs::table)
                        .values(&NewCrawlRunRecord {
                            scraper_type,
                            kind,
                            categories: &categories,
                            states: &states,
                            status: RunStatus::Created.as_str(),
                            current_cell: 0,
                            total_cells,
                            started_at: &now,
                            updated_at: &now,
                        })
                        .execute(conn)
                        .await?;

                    let id = diesel::sql_query("SELECT last_insert_rowid()")
                        .get_result::<LastInsertRowId>(conn)
                        .await?
                        .id;

                    let record = crawl_runs::table
                        .find(id as i32)
                        .select(CrawlRunRecord::as_select())
                        .first::<CrawlRunRecord>(conn)
                        .await?;
                    Ok::<_, DieselError>((record, true))
                })
            })
            .await
        })?;

        Ok((CrawlRun::try_from(record)?, created))
    }

    /// Get a run by id.
    pub async fn get(&self, id: i32) -> Result<Option<CrawlRun>, DieselError> {
        with_conn!(self.pool, conn, {
            crawl_runs::table
                .find(id)
                .select(CrawlRunRecord::as_select())
                .first::<CrawlRunRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(CrawlRun::try_from).transpose())
        })
    }

    /// Get the worker's non-terminal run, if any.
    pub async fn active_for(&self, worker: WorkerType) -> Result<Option<CrawlRun>, DieselError> {
        with_conn!(self.pool, conn, {
            crawl_runs::table
                .filter(crawl_runs::scraper_type.eq(worker.as_str()))
                .filter(crawl_runs::status.eq_any(status_strs(&RunStatus::ACTIVE)))
                .order(crawl_runs::id.desc())
                .select(CrawlRunRecord::as_select())
                .first::<CrawlRunRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(CrawlRun::try_from).transpose())
        })
    }

    /// List recent runs, newest first.
    pub async fn list(
        &self,
        worker: Option<WorkerType>,
        limit: i64,
    ) -> Result<Vec<CrawlRun>, DieselError> {
        with_conn!(self.pool, conn, {
            let mut query = crawl_runs::table
                .select(CrawlRunRecord::as_select())
                .order(crawl_runs::id.desc())
                .limit(limit)
                .into_boxed();
            if let Some(worker) = worker {
                query = query.filter(crawl_runs::scraper_type.eq(worker.as_str()));
            }
            query
                .load::<CrawlRunRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(CrawlRun::try_from).collect())
        })
    }

    async fn move_status(
        &self,
        id: i32,
        from: &[RunStatus],
        to: RunStatus,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                crawl_runs::table
                    .filter(crawl_runs::id.eq(id))
                    .filter(crawl_runs::status.eq_any(status_strs(from))),
            )
            .set((
                crawl_runs::status.eq(to.as_str()),
                crawl_runs::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// `created` or `paused` to `running`.
    pub async fn mark_running(&self, id: i32) -> Result<bool, DieselError> {
        self.move_status(id, &[RunStatus::Created, RunStatus::Paused], RunStatus::Running)
            .await
    }

    /// `running` to `paused`.
    pub async fn pause(&self, id: i32) -> Result<bool, DieselError> {
        self.move_status(id, &[RunStatus::Running], RunStatus::Paused)
            .await
    }

    /// `paused` to `running`.
    pub async fn resume(&self, id: i32) -> Result<bool, DieselError> {
        self.move_status(id, &[RunStatus::Paused], RunStatus::Running)
            .await
    }

    /// Record one processed cell and add its counters.
    ///
    /// `current_cell` never passes `total_cells`.
    pub async fn advance(&self, id: i32, delta: &RunCounters) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                crawl_runs::table
                    .filter(crawl_runs::id.eq(id))
                    .filter(crawl_runs::current_cell.lt(crawl_runs::total_cells)),
            )
            .set((
                crawl_runs::current_cell.eq(crawl_runs::current_cell + 1),
                crawl_runs::items_found.eq(crawl_runs::items_found + delta.items_found),
                crawl_runs::items_saved.eq(crawl_runs::items_saved + delta.items_saved),
                crawl_runs::items_updated.eq(crawl_runs::items_updated + delta.items_updated),
                crawl_runs::items_rejected.eq(crawl_runs::items_rejected + delta.items_rejected),
                crawl_runs::errors.eq(crawl_runs::errors + delta.errors),
                crawl_runs::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// `running` to `completed`, only once every cell was processed.
    pub async fn complete(&self, id: i32) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                crawl_runs::table
                    .filter(crawl_runs::id.eq(id))
                    .filter(crawl_runs::status.eq(RunStatus::Running.as_str()))
                    .filter(crawl_runs::current_cell.ge(crawl_runs::total_cells)),
            )
            .set((
                crawl_runs::status.eq(RunStatus::Completed.as_str()),
                crawl_runs::updated_at.eq(&now),
                crawl_runs::finished_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// Non-terminal to `failed`, recording the error.
    pub async fn fail(&self, id: i32, error: &str) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                crawl_runs::table
                    .filter(crawl_runs::id.eq(id))
                    .filter(crawl_runs::status.eq_any(status_strs(&RunStatus::ACTIVE))),
            )
            .set((
                crawl_runs::status.eq(RunStatus::Failed.as_str()),
                crawl_runs::updated_at.eq(&now),
                crawl_runs::finished_at.eq(&now),
                crawl_runs::last_error.eq(error),
                crawl_runs::last_error_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// Non-terminal to `stopped`.
    pub async fn stop(&self, id: i32) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                crawl_runs::table
                    .filter(crawl_runs::id.eq(id))
                    .filter(crawl_runs::status.eq_any(status_strs(&RunStatus::ACTIVE))),
            )
            .set((
                crawl_runs::status.eq(RunStatus::Stopped.as_str()),
                crawl_runs::updated_at.eq(&now),
                crawl_runs::finished_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// Stop every non-terminal run of a worker type.
    pub async fn stop_all_for(&self, worker: WorkerType) -> Result<usize, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                crawl_runs::table
                    .filter(crawl_runs::scraper_type.eq(worker.as_str()))
                    .filter(crawl_runs::status.eq_any(status_strs(&RunStatus::ACTIVE))),
            )
            .set((
                crawl_runs::status.eq(RunStatus::Stopped.as_str()),
                crawl_runs::updated_at.eq(&now),
                crawl_runs::finished_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })
    }
}
