//! Error types for fetching and crawling.

use thiserror::Error;

use geocrawl::grid::GridError;
use geocrawl::registry::RegistryError;
use geocrawl::repository::DieselError;

/// Failure to fetch one unit of work from a source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source asked us to back off (HTTP 429 or 503).
    #[error("Rate limited (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after_secs: Option<u64>,
    },

    /// Network failure, timeout or gateway error. Worth retrying later.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Errors that only cost the current cell.
    pub fn is_cell_error(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Status { .. } | Self::Parse(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}

/// Failure of a crawl as a whole.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0} consecutive cells failed, last error: {1}")]
    TooManyFailures(u32, String),

    #[error("Configuration error: {0}")]
    Config(String),
}
