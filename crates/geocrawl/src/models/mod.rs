//! Domain models.

mod crawl_run;
mod geo_record;
mod scraper_status;
mod worker;

pub use crawl_run::{CrawlRun, CrawlScope, NewCrawlRun, RunCounters, RunKind, RunStatus};
pub use geo_record::{generate_serial, GeoRecord, NormalizedRecord, RecordKind};
pub use scraper_status::{
    get_hostname, Health, IllegalTransition, RunProgress, ScraperState, ScraperStatus,
};
pub use worker::WorkerType;
