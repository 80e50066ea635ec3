//! Configuration management using the prefer crate.

mod loader;
mod settings;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::WorkerType;

pub use loader::{load_settings_with_options, LoadOptions};
pub use settings::{DirectorySettings, Settings};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "geocrawl.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

/// Directory source section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename, or a full `sqlite:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Delay between cells in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overpass_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_spacing_miles: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_radius_miles: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_threshold_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_cooldown_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert_batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<DirectoryConfig>,
    /// Service unit per worker type, e.g. `heights = "geocrawl-heights.service"`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub services: HashMap<String, String>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer for discovery of `geocrawl.*` files.
    pub async fn load() -> Self {
        match prefer::load("geocrawl").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config file: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse config text in the format named by a file extension.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            if database.starts_with("sqlite:") {
                settings.database_url = Some(database.clone());
            } else {
                settings.database_filename = database.clone();
            }
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(ref url) = self.overpass_url {
            settings.overpass_url = url.clone();
        }
        if let Some(spacing) = self.cell_spacing_miles {
            settings.cell_spacing_miles = spacing;
        }
        if let Some(radius) = self.cell_radius_miles {
            settings.cell_radius_miles = radius;
        }
        if let Some(interval) = self.poll_interval_secs {
            settings.poll_interval_secs = interval;
        }
        if let Some(threshold) = self.stale_threshold_secs {
            settings.stale_threshold_secs = threshold;
        }
        if let Some(cooldown) = self.rate_limit_cooldown_secs {
            settings.rate_limit_cooldown_secs = cooldown;
        }
        if let Some(max) = self.max_consecutive_failures {
            settings.max_consecutive_failures = max;
        }
        if let Some(size) = self.upsert_batch_size {
            settings.upsert_batch_size = size.max(1);
        }
        if let Some(ref directory) = self.directory {
            if directory.base_url.is_some() {
                settings.directory.base_url = directory.base_url.clone();
            }
            if directory.username.is_some() {
                settings.directory.username = directory.username.clone();
            }
            if directory.password.is_some() {
                settings.directory.password = directory.password.clone();
            }
        }
        for (worker, service) in &self.services {
            match WorkerType::from_str(worker) {
                Some(worker) => {
                    settings.services.insert(worker, service.clone());
                }
                None => tracing::warn!("Unknown worker type in services: {}", worker),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(
            r#"
data_dir = "/srv/geocrawl"
cell_radius_miles = 20.0
request_delay_ms = 250

[directory]
base_url = "https://directory.example.com"

[services]
heights = "geocrawl-heights.service"
"#,
            "toml",
        )
        .unwrap();

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/"));
        assert_eq!(settings.data_dir, PathBuf::from("/srv/geocrawl"));
        assert_eq!(settings.cell_radius_miles, 20.0);
        assert_eq!(settings.request_delay_ms, 250);
        assert_eq!(
            settings.directory.base_url.as_deref(),
            Some("https://directory.example.com")
        );
        assert_eq!(
            settings.service_for(WorkerType::Heights),
            "geocrawl-heights.service"
        );
        assert_eq!(
            settings.service_for(WorkerType::Crossings),
            "geocrawl-restrictions.service"
        );
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = Config::parse("database: sqlite:/tmp/x.db\npoll_interval_secs: 5\n", "yml").unwrap();
        assert_eq!(yaml.database.as_deref(), Some("sqlite:/tmp/x.db"));
        assert_eq!(yaml.poll_interval_secs, Some(5));

        let json = Config::parse(r#"{"database": "crawl.db"}"#, "json").unwrap();
        let mut settings = Settings::with_data_dir(PathBuf::from("/data"));
        json.apply_to_settings(&mut settings, Path::new("/"));
        assert_eq!(settings.database_path(), PathBuf::from("/data/crawl.db"));
    }

    #[test]
    fn test_parse_error_names_format() {
        let err = Config::parse("not = [valid", "toml").unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }

    #[test]
    fn test_relative_data_dir_uses_base_dir() {
        let config = Config {
            data_dir: Some("state".to_string()),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/etc/geocrawl"));
        assert_eq!(settings.data_dir, PathBuf::from("/etc/geocrawl/state"));
    }
}
