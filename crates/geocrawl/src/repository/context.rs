//! Database context bundling the pool and repository access.

use std::path::Path;

use super::crawl_runs::DieselCrawlRunRepository;
use super::geo_records::DieselGeoRecordRepository;
use super::migrations::run_migrations;
use super::pool::{DbPool, DieselError};
use super::request_queue::DieselRequestQueueRepository;
use super::scraper_status::DieselScraperStatusRepository;

/// Database context that manages the connection pool and provides repository access.
///
/// Create one context per command or service, then use it to access all repositories.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:/var/lib/geocrawl/geocrawl.db");
/// ctx.migrate().await?;
/// let rows = ctx.scraper_status().get_all().await?;
/// ```
#[derive(Clone, Debug)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context from a database URL or path.
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: DbPool::new(database_url),
        }
    }

    /// Create a context from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self {
            pool: DbPool::from_path(path),
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<Vec<String>, DieselError> {
        run_migrations(self.pool.database_url()).await
    }

    pub fn scraper_status(&self) -> DieselScraperStatusRepository {
        DieselScraperStatusRepository::new(self.pool.clone())
    }

    pub fn crawl_runs(&self) -> DieselCrawlRunRepository {
        DieselCrawlRunRepository::new(self.pool.clone())
    }

    pub fn geo_records(&self) -> DieselGeoRecordRepository {
        DieselGeoRecordRepository::new(self.pool.clone())
    }

    pub fn request_queue(&self) -> DieselRequestQueueRepository {
        DieselRequestQueueRepository::new(self.pool.clone())
    }
}
