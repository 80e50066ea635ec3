//! Crawl run records - resumable per-run progress.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{RunProgress, WorkerType};

/// Whether a run covers everything or a requested subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Full,
    Selective,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Selective => "selective",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "selective" => Some(Self::Selective),
            _ => None,
        }
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Statuses a run may be in while another run would conflict with it.
    pub const ACTIVE: [RunStatus; 3] = [Self::Created, Self::Running, Self::Paused];
}

/// Categories and states a crawl covers. Empty lists mean "everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlScope {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
}

impl CrawlScope {
    pub fn new(categories: Vec<String>, states: Vec<String>) -> Self {
        Self { categories, states }.normalized()
    }

    /// Sorted, de-duplicated, with state codes upper-cased.
    pub fn normalized(mut self) -> Self {
        for category in &mut self.categories {
            *category = category.trim().to_lowercase();
        }
        for state in &mut self.states {
            *state = state.trim().to_uppercase();
        }
        self.categories.retain(|c| !c.is_empty());
        self.states.retain(|s| !s.is_empty());
        self.categories.sort();
        self.categories.dedup();
        self.states.sort();
        self.states.dedup();
        self
    }

    pub fn is_full(&self) -> bool {
        self.categories.is_empty() && self.states.is_empty()
    }

    pub fn kind(&self) -> RunKind {
        if self.is_full() {
            RunKind::Full
        } else {
            RunKind::Selective
        }
    }

    /// Read a scope out of a status row's configuration payload.
    ///
    /// Missing or malformed keys fall back to "everything".
    pub fn from_config(config: &serde_json::Value) -> Self {
        let strings = |key: &str| -> Vec<String> {
            config
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        Self::new(strings("categories"), strings("states"))
    }

    pub fn to_config(&self) -> serde_json::Value {
        serde_json::json!({
            "categories": self.categories,
            "states": self.states,
        })
    }
}

/// Cumulative counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub items_found: i64,
    pub items_saved: i64,
    pub items_updated: i64,
    pub items_rejected: i64,
    pub errors: i64,
}

impl RunCounters {
    pub fn add(&mut self, other: &RunCounters) {
        self.items_found += other.items_found;
        self.items_saved += other.items_saved;
        self.items_updated += other.items_updated;
        self.items_rejected += other.items_rejected;
        self.errors += other.errors;
    }
}

/// Parameters for creating a run.
#[derive(Debug, Clone)]
pub struct NewCrawlRun {
    pub scraper_type: WorkerType,
    pub kind: RunKind,
    pub scope: CrawlScope,
    pub total_cells: i32,
}

/// A crawl execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: i32,
    pub scraper_type: WorkerType,
    pub kind: RunKind,
    pub scope: CrawlScope,
    pub status: RunStatus,
    pub current_cell: i32,
    pub total_cells: i32,
    pub counters: RunCounters,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl CrawlRun {
    pub fn is_finished(&self) -> bool {
        self.current_cell >= self.total_cells
    }

    /// Remaining time extrapolated from the average time per processed cell.
    pub fn eta_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.current_cell <= 0 || self.status.is_terminal() {
            return None;
        }
        let elapsed = now - self.started_at;
        let per_cell = elapsed / self.current_cell;
        let remaining = (self.total_cells - self.current_cell).max(0);
        Some(per_cell * remaining)
    }

    /// Fraction of cells processed, 0.0 to 1.0.
    pub fn fraction_done(&self) -> f64 {
        if self.total_cells <= 0 {
            return 1.0;
        }
        self.current_cell as f64 / self.total_cells as f64
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            current_cell: self.current_cell,
            total_cells: self.total_cells,
            items_found: self.counters.items_found,
            items_saved: self.counters.items_saved,
            items_updated: self.counters.items_updated,
            items_rejected: self.counters.items_rejected,
            errors: self.counters.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(current_cell: i32, total_cells: i32, started_at: DateTime<Utc>) -> CrawlRun {
        CrawlRun {
            id: 1,
            scraper_type: WorkerType::Poi,
            kind: RunKind::Full,
            scope: CrawlScope::default(),
            status: RunStatus::Running,
            current_cell,
            total_cells,
            counters: RunCounters::default(),
            started_at,
            updated_at: started_at,
            finished_at: None,
            last_error: None,
            last_error_at: None,
        }
    }

    #[test]
    fn test_eta_extrapolates_average_cell_time() {
        let now = Utc::now();
        let r = run(10, 40, now - Duration::minutes(10));
        assert_eq!(r.eta_at(now), Some(Duration::minutes(30)));

        let fresh = run(0, 40, now);
        assert_eq!(fresh.eta_at(now), None);
    }

    #[test]
    fn test_scope_normalization() {
        let scope = CrawlScope::new(
            vec!["Fuel_Station".into(), "truck_stop".into(), "fuel_station".into()],
            vec![" tx".into(), "NM".into(), "tx".into(), "".into()],
        );
        assert_eq!(scope.categories, vec!["fuel_station", "truck_stop"]);
        assert_eq!(scope.states, vec!["NM", "TX"]);
        assert_eq!(scope.kind(), RunKind::Selective);
        assert_eq!(CrawlScope::default().kind(), RunKind::Full);
    }

    #[test]
    fn test_scope_from_config_payload() {
        let config = serde_json::json!({
            "categories": ["rest_area"],
            "states": ["wy"],
            "credentials": {"user": "x"}
        });
        let scope = CrawlScope::from_config(&config);
        assert_eq!(scope.categories, vec!["rest_area"]);
        assert_eq!(scope.states, vec!["WY"]);

        assert!(CrawlScope::from_config(&serde_json::json!({})).is_full());
        assert!(CrawlScope::from_config(&serde_json::json!({"states": "TX"})).is_full());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        for status in RunStatus::ACTIVE {
            assert!(!status.is_terminal());
        }
    }
}
