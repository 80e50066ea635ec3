//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM over SQLite.

pub mod context;
pub mod crawl_runs;
pub mod geo_records;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod request_queue;
pub mod scraper_status;
pub mod util;

pub use context::DbContext;
pub use crawl_runs::DieselCrawlRunRepository;
pub use geo_records::{BatchOutcome, DieselGeoRecordRepository};
pub use migrations::run_migrations;
pub use pool::{DbPool, DieselError};
pub use request_queue::{DieselRequestQueueRepository, QueuedRequest};
pub use scraper_status::DieselScraperStatusRepository;

use chrono::{DateTime, Utc};
use diesel::QueryableByName;

#[derive(QueryableByName)]
pub(crate) struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt, column_name = "last_insert_rowid()")]
    pub id: i64,
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Format an optional timestamp for storage.
pub(crate) fn format_datetime_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|dt| dt.to_rfc3339())
}
