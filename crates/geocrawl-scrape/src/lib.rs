//! Source adapters and crawl workers for geocrawl.
//!
//! - [`overpass`]: compound tag queries against an Overpass-compatible API
//! - [`directory`]: the authenticated location directory
//! - [`domains`]: classification and validation per record kind
//! - [`worker`]: the resumable cell-by-cell crawl loop

pub mod classify;
pub mod directory;
pub mod domains;
pub mod element;
pub mod error;
pub mod http;
pub mod overpass;
pub mod source;
pub mod worker;

pub use element::{ElementType, RawElement, Tags};
pub use error::{CrawlError, FetchError};
pub use source::{source_for, CellSource};
pub use worker::{run_service, CrawlOutcome, CrawlWorker, WorkerOptions};
