//! Persisted FIFO of manual crawl requests waiting for the manual worker.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{CrawlRequestRecord, NewCrawlRequest};
use super::pool::{DbPool, DieselError};
use super::util::{invalid_column, json_error};
use super::{parse_datetime, LastInsertRowId};
use crate::models::{CrawlScope, WorkerType};
use crate::schema::crawl_requests_queue;
use crate::with_conn;

const PENDING: &str = "pending";
const STARTED: &str = "started";

/// A queued manual request.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: i32,
    pub scraper_type: WorkerType,
    pub scope: CrawlScope,
    pub requested_at: DateTime<Utc>,
}

impl TryFrom<CrawlRequestRecord> for QueuedRequest {
    type Error = DieselError;

    fn try_from(record: CrawlRequestRecord) -> Result<Self, Self::Error> {
        Ok(QueuedRequest {
            id: record.id,
            scraper_type: WorkerType::from_str(&record.scraper_type)
                .ok_or_else(|| invalid_column("scraper_type", &record.scraper_type))?,
            scope: serde_json::from_str(&record.scope).map_err(json_error)?,
            requested_at: parse_datetime(&record.requested_at),
        })
    }
}

/// Diesel-based request queue repository.
#[derive(Clone)]
pub struct DieselRequestQueueRepository {
    pool: DbPool,
}

impl DieselRequestQueueRepository {
    /// Create a new repository with an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a request. Returns its id.
    pub async fn enqueue(&self, worker: WorkerType, scope: &CrawlScope) -> Result<i32, DieselError> {
        let scope = serde_json::to_string(scope).map_err(json_error)?;
        let now = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::insert_into(crawl_requests_queue::table)
                .values(&NewCrawlRequest {
                    scraper_type: worker.as_str(),
                    scope: &scope,
                    status: PENDING,
                    requested_at: &now,
                })
                .execute(&mut conn)
                .await?;

            diesel::sql_query("SELECT last_insert_rowid()")
                .get_result::<LastInsertRowId>(&mut conn)
                .await
                .map(|r| r.id as i32)
        })
    }

    /// Oldest pending request, left pending.
    pub async fn peek_next(&self, worker: WorkerType) -> Result<Option<QueuedRequest>, DieselError> {
        let record = with_conn!(self.pool, conn, {
            crawl_requests_queue::table
                .filter(crawl_requests_queue::scraper_type.eq(worker.as_str()))
                .filter(crawl_requests_queue::status.eq(PENDING))
                .order(crawl_requests_queue::id.asc())
                .select(CrawlRequestRecord::as_select())
                .first::<CrawlRequestRecord>(&mut conn)
                .await
                .optional()
        })?;

        record.map(QueuedRequest::try_from).transpose()
    }

    /// Mark a pending request started. Returns false if it was no longer pending.
    pub async fn mark_started(&self, id: i32) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                crawl_requests_queue::table
                    .find(id)
                    .filter(crawl_requests_queue::status.eq(PENDING)),
            )
            .set((
                crawl_requests_queue::status.eq(STARTED),
                crawl_requests_queue::started_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
            .map(|n| n > 0)
        })
    }

    /// Pending requests in FIFO order.
    pub async fn pending(&self, worker: WorkerType) -> Result<Vec<QueuedRequest>, DieselError> {
        with_conn!(self.pool, conn, {
            crawl_requests_queue::table
                .filter(crawl_requests_queue::scraper_type.eq(worker.as_str()))
                .filter(crawl_requests_queue::status.eq(PENDING))
                .order(crawl_requests_queue::id.asc())
                .select(CrawlRequestRecord::as_select())
                .load::<CrawlRequestRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(QueuedRequest::try_from).collect())
        })
    }

    /// Number of pending requests.
    pub async fn pending_count(&self, worker: WorkerType) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            crawl_requests_queue::table
                .filter(crawl_requests_queue::scraper_type.eq(worker.as_str()))
                .filter(crawl_requests_queue::status.eq(PENDING))
                .count()
                .get_result(&mut conn)
                .await
        })
    }
}
