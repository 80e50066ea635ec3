//! Runtime settings.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use chrono::Duration;

use super::DEFAULT_DATABASE_FILENAME;
use crate::grid::{GridError, GridTiler, DEFAULT_RADIUS_MILES, DEFAULT_SPACING_MILES};
use crate::models::WorkerType;
use crate::repository::DbContext;

/// Credentials and location of the authenticated directory source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectorySettings {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Delay between cells in milliseconds.
    pub request_delay_ms: u64,
    /// Overpass-compatible query endpoint.
    pub overpass_url: String,
    /// Target spacing between cell centers in miles.
    pub cell_spacing_miles: f64,
    /// Query radius around each cell center in miles.
    pub cell_radius_miles: f64,
    /// Supervisor poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Age of the last activity after which a running worker is stale, in seconds.
    pub stale_threshold_secs: u64,
    /// Pause after a rate limit, in seconds.
    pub rate_limit_cooldown_secs: u64,
    /// Consecutive failed cells that fail the whole run.
    pub max_consecutive_failures: u32,
    /// Records committed per transaction.
    pub upsert_batch_size: usize,
    pub directory: DirectorySettings,
    /// Service unit overrides keyed by worker type.
    pub services: HashMap<WorkerType, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("geocrawl");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            user_agent: format!("geocrawl/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: 180,
            request_delay_ms: 1000,
            overpass_url: "https://overpass-api.de/api/interpreter".to_string(),
            cell_spacing_miles: DEFAULT_SPACING_MILES,
            cell_radius_miles: DEFAULT_RADIUS_MILES,
            poll_interval_secs: 30,
            stale_threshold_secs: 300,
            rate_limit_cooldown_secs: 15 * 60,
            max_consecutive_failures: 10,
            upsert_batch_size: 50,
            directory: DirectorySettings::default(),
            services: HashMap::new(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            let path = self.data_dir.join(&self.database_filename);
            format!("sqlite:{}", path.display())
        }
    }

    /// Get the full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        self.database_url.is_some() || self.database_path().exists()
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    /// Create a database context.
    pub fn create_db_context(&self) -> DbContext {
        DbContext::from_url(&self.database_url())
    }

    pub fn tiler(&self) -> Result<GridTiler, GridError> {
        GridTiler::new(self.cell_spacing_miles, self.cell_radius_miles)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::seconds(self.stale_threshold_secs as i64)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::seconds(self.rate_limit_cooldown_secs as i64)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_delay_ms)
    }

    /// Service unit backing a worker type.
    pub fn service_for(&self, worker: WorkerType) -> String {
        self.services
            .get(&worker)
            .cloned()
            .unwrap_or_else(|| worker.default_service().to_string())
    }

    /// Worker types grouped by the service that hosts them.
    ///
    /// Workers sharing a service form an exclusive group: only one of them
    /// can be running inside that process at a time.
    pub fn service_groups(&self) -> BTreeMap<String, Vec<WorkerType>> {
        let mut groups: BTreeMap<String, Vec<WorkerType>> = BTreeMap::new();
        for worker in WorkerType::ALL {
            groups.entry(self.service_for(worker)).or_default().push(worker);
        }
        groups
    }

    /// Worker types hosted by a service, in declaration order.
    pub fn workers_for_service(&self, service: &str) -> Vec<WorkerType> {
        let wanted = normalize_service(service);
        WorkerType::ALL
            .into_iter()
            .filter(|w| normalize_service(&self.service_for(*w)) == wanted)
            .collect()
    }
}

/// Strip the `.service` suffix so `geocrawl-poi` and `geocrawl-poi.service`
/// compare equal.
fn normalize_service(name: &str) -> &str {
    name.strip_suffix(".service").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_from_data_dir() {
        let settings = Settings::with_data_dir(PathBuf::from("/var/lib/geocrawl"));
        assert_eq!(settings.database_url(), "sqlite:/var/lib/geocrawl/geocrawl.db");
    }

    #[test]
    fn test_restriction_workers_share_a_group() {
        let settings = Settings::default();
        let groups = settings.service_groups();
        assert_eq!(groups.len(), 4);
        assert_eq!(
            groups["geocrawl-restrictions.service"],
            vec![WorkerType::Heights, WorkerType::Crossings, WorkerType::Weights]
        );
    }

    #[test]
    fn test_workers_for_service_ignores_suffix() {
        let mut settings = Settings::default();
        settings
            .services
            .insert(WorkerType::Directory, "geocrawl-poi.service".to_string());

        assert_eq!(
            settings.workers_for_service("geocrawl-poi"),
            vec![WorkerType::Poi, WorkerType::Directory]
        );
        assert!(settings.workers_for_service("nope").is_empty());
    }
}
