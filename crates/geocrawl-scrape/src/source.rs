//! The seam between the crawl loop and the outside world.

use std::sync::Arc;

use async_trait::async_trait;

use geocrawl::config::Settings;
use geocrawl::grid::{Cell, GridError, GridTiler};
use geocrawl::models::{CrawlScope, WorkerType};

use crate::directory::{DirectoryCredentials, DirectorySource};
use crate::element::RawElement;
use crate::error::{CrawlError, FetchError};
use crate::http::HttpClient;
use crate::overpass::{OverpassClient, TagFilter};

/// Something that can be asked for the elements of one cell.
#[async_trait]
pub trait CellSource: Send + Sync {
    /// Ordered cells of a crawl. Must be deterministic for resume.
    fn plan(&self, tiler: &GridTiler, scope: &CrawlScope) -> Result<Vec<Cell>, GridError> {
        tiler.tile_regions(&scope.states)
    }

    /// Fetch one cell. Exactly one request per call.
    async fn fetch_cell(
        &self,
        cell: &Cell,
        filters: &[TagFilter],
    ) -> Result<Vec<RawElement>, FetchError>;
}

fn config_str(config: &serde_json::Value, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Build the source a worker type crawls.
///
/// Directory credentials in the start payload take precedence over the
/// configured ones.
pub fn source_for(
    worker: WorkerType,
    settings: &Settings,
    config: &serde_json::Value,
) -> Result<Arc<dyn CellSource>, CrawlError> {
    let builder = HttpClient::builder()
        .user_agent(&settings.user_agent)
        .timeout(std::time::Duration::from_secs(settings.request_timeout));

    if worker == WorkerType::Directory {
        let base_url = config_str(config, "base_url")
            .or_else(|| settings.directory.base_url.clone())
            .ok_or_else(|| CrawlError::Config("directory base URL is not configured".into()))?;
        let credentials = DirectoryCredentials {
            username: config_str(config, "username")
                .or_else(|| settings.directory.username.clone())
                .unwrap_or_default(),
            password: config_str(config, "password")
                .or_else(|| settings.directory.password.clone())
                .unwrap_or_default(),
        };
        let http = builder.cookie_store(true).build()?;
        return Ok(Arc::new(DirectorySource::new(http, &base_url, credentials)?));
    }

    let http = builder.build()?;
    Ok(Arc::new(OverpassClient::new(http, &settings.overpass_url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_directory_needs_base_url() {
        let settings = Settings::default();
        let result = source_for(WorkerType::Directory, &settings, &json!({}));
        assert!(matches!(result, Err(CrawlError::Config(_))));

        let config = json!({"base_url": "https://directory.example.com", "username": "ops"});
        assert!(source_for(WorkerType::Directory, &settings, &config).is_ok());
    }

    #[test]
    fn test_overpass_for_map_workers() {
        let settings = Settings::default();
        for worker in [WorkerType::Poi, WorkerType::Heights, WorkerType::Weights] {
            assert!(source_for(worker, &settings, &json!({})).is_ok());
        }
    }
}
