//! geocrawl - crawl orchestration and geospatial ingestion.
//!
//! Core library shared by the scrape workers and the CLI: persistence,
//! the scraper status registry, grid tiling, the upsert engine, the manual
//! crawl queue and the process supervisor.

// Model types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod config;
pub mod grid;
pub mod ingest;
pub mod migrations;
pub mod models;
pub mod queue;
pub mod registry;
pub mod repository;
pub mod schema;
pub mod supervisor;
