//! Diesel ORM models for database tables.

use diesel::prelude::*;

use crate::schema;

/// Scraper status record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::scraper_status)]
#[diesel(primary_key(scraper_type))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScraperStatusRecord {
    pub scraper_type: String,
    pub state: String,
    pub enabled: i32,
    pub auto_paused: i32,
    pub current_activity: Option<String>,
    pub activity_detail: Option<String>,
    pub config: String,
    pub run_id: Option<i32>,
    pub current_cell: i32,
    pub total_cells: i32,
    pub items_found: i64,
    pub items_saved: i64,
    pub items_updated: i64,
    pub items_rejected: i64,
    pub session_errors: i64,
    pub consecutive_errors: i32,
    pub rate_limit_hits: i32,
    pub cooldown_until: Option<String>,
    pub last_activity: Option<String>,
    pub last_started_at: Option<String>,
    pub last_completed_at: Option<String>,
    pub last_error: Option<String>,
    pub last_error_at: Option<String>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub lifetime_items_saved: i64,
    pub restart_count: i32,
    pub last_restart_at: Option<String>,
    pub host: Option<String>,
    pub updated_at: String,
}

/// Scraper status row for insertion and full-row updates.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::scraper_status)]
#[diesel(primary_key(scraper_type))]
#[diesel(treat_none_as_null = true)]
pub struct ScraperStatusRow {
    pub scraper_type: String,
    pub state: String,
    pub enabled: i32,
    pub auto_paused: i32,
    pub current_activity: Option<String>,
    pub activity_detail: Option<String>,
    pub config: String,
    pub run_id: Option<i32>,
    pub current_cell: i32,
    pub total_cells: i32,
    pub items_found: i64,
    pub items_saved: i64,
    pub items_updated: i64,
    pub items_rejected: i64,
    pub session_errors: i64,
    pub consecutive_errors: i32,
    pub rate_limit_hits: i32,
    pub cooldown_until: Option<String>,
    pub last_activity: Option<String>,
    pub last_started_at: Option<String>,
    pub last_completed_at: Option<String>,
    pub last_error: Option<String>,
    pub last_error_at: Option<String>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub lifetime_items_saved: i64,
    pub restart_count: i32,
    pub last_restart_at: Option<String>,
    pub host: Option<String>,
    pub updated_at: String,
}

/// Crawl run record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::crawl_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CrawlRunRecord {
    pub id: i32,
    pub scraper_type: String,
    pub kind: String,
    pub categories: String,
    pub states: String,
    pub status: String,
    pub current_cell: i32,
    pub total_cells: i32,
    pub items_found: i64,
    pub items_saved: i64,
    pub items_updated: i64,
    pub items_rejected: i64,
    pub errors: i64,
    pub started_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
    pub last_error: Option<String>,
    pub last_error_at: Option<String>,
}

/// New crawl run for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::crawl_runs)]
pub struct NewCrawlRunRecord<'a> {
    pub scraper_type: &'a str,
    pub kind: &'a str,
    pub categories: &'a str,
    pub states: &'a str,
    pub status: &'a str,
    pub current_cell: i32,
    pub total_cells: i32,
    pub started_at: &'a str,
    pub updated_at: &'a str,
}

/// Geo record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::geo_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct GeoRecordRecord {
    pub id: i32,
    pub kind: String,
    pub external_id: String,
    pub serial: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    pub name: Option<String>,
    pub measure: Option<f64>,
    pub attributes: String,
    pub scraper_type: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New geo record for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::geo_records)]
pub struct NewGeoRecord<'a> {
    pub kind: &'a str,
    pub external_id: &'a str,
    pub serial: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub category: &'a str,
    pub name: Option<&'a str>,
    pub measure: Option<f64>,
    pub attributes: &'a str,
    pub scraper_type: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Queued manual crawl request from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::crawl_requests_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CrawlRequestRecord {
    pub id: i32,
    pub scraper_type: String,
    pub scope: String,
    pub status: String,
    pub requested_at: String,
    pub started_at: Option<String>,
}

/// New queued request for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::crawl_requests_queue)]
pub struct NewCrawlRequest<'a> {
    pub scraper_type: &'a str,
    pub scope: &'a str,
    pub status: &'a str,
    pub requested_at: &'a str,
}
