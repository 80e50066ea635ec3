//! Scraper status registry.
//!
//! Every state change of a status row goes through here. Each mutation loads
//! the row, applies a transition on the model and writes it back only if the
//! stored state is still the one it was loaded with.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{
    CrawlRun, Health, IllegalTransition, RunProgress, ScraperState, ScraperStatus, WorkerType,
};
use crate::repository::{DieselError, DieselScraperStatusRepository};

/// Attempts at a conditional write before giving up on a busy row.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Default age of the last activity after which a running worker is stale.
pub const DEFAULT_STALE_THRESHOLD_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("Status row for {0} kept changing underneath us")]
    Conflict(WorkerType),

    #[error("No status row for {0}")]
    Missing(WorkerType),
}

/// Health summary of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub scraper_type: WorkerType,
    pub state: ScraperState,
    pub enabled: bool,
    pub health: Health,
    pub stale: bool,
    pub consecutive_errors: i32,
    pub rate_limit_hits: i32,
    pub success_rate: Option<f64>,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Registry of per-worker status rows.
#[derive(Clone)]
pub struct StatusRegistry {
    repo: DieselScraperStatusRepository,
    stale_threshold: Duration,
}

impl StatusRegistry {
    pub fn new(repo: DieselScraperStatusRepository, stale_threshold: Duration) -> Self {
        Self {
            repo,
            stale_threshold,
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Create idle rows for every worker type that has none.
    pub async fn ensure_all(&self) -> Result<(), RegistryError> {
        let created = self.repo.ensure(&WorkerType::ALL).await?;
        if created > 0 {
            debug!("Created {} scraper status rows", created);
        }
        Ok(())
    }

    /// Get a worker's row, creating the idle baseline if it does not exist.
    pub async fn get(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        if let Some(status) = self.repo.get(worker).await? {
            return Ok(status);
        }
        self.repo.ensure(&[worker]).await?;
        self.repo
            .get(worker)
            .await?
            .ok_or(RegistryError::Missing(worker))
    }

    /// All rows, ordered by worker type.
    pub async fn all(&self) -> Result<Vec<ScraperStatus>, RegistryError> {
        self.ensure_all().await?;
        Ok(self.repo.get_all().await?)
    }

    async fn mutate<F>(&self, worker: WorkerType, mut apply: F) -> Result<ScraperStatus, RegistryError>
    where
        F: FnMut(&mut ScraperStatus) -> Result<(), IllegalTransition>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut status = self.get(worker).await?;
            let expected = status.state;
            apply(&mut status)?;
            if self.repo.save_if_state(&status, expected).await? {
                return Ok(status);
            }
            debug!(
                "Status row for {} changed during write (attempt {})",
                worker, attempt
            );
        }
        Err(RegistryError::Conflict(worker))
    }

    /// Start a worker, optionally replacing its configuration payload.
    pub async fn start(
        &self,
        worker: WorkerType,
        config: Option<serde_json::Value>,
    ) -> Result<ScraperStatus, RegistryError> {
        let status = self
            .mutate(worker, |s| s.start(config.clone(), Utc::now()))
            .await?;
        info!("{} marked running", worker);
        Ok(status)
    }

    /// Explicit stop. Idle rows are left alone.
    pub async fn stop(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        let status = self.mutate(worker, |s| s.stop(Utc::now())).await?;
        info!("{} stopped", worker);
        Ok(status)
    }

    /// Re-baseline a row to idle from any state.
    pub async fn reset(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        let status = self
            .mutate(worker, |s| {
                s.reset(Utc::now());
                Ok(())
            })
            .await?;
        info!("{} reset", worker);
        Ok(status)
    }

    pub async fn set_enabled(&self, worker: WorkerType, enabled: bool) -> Result<(), RegistryError> {
        self.get(worker).await?;
        self.repo.set_enabled(worker, enabled).await?;
        info!("{} {}", worker, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Point the row at a run and mirror its checkpoint.
    pub async fn attach_run(
        &self,
        worker: WorkerType,
        run: &CrawlRun,
    ) -> Result<ScraperStatus, RegistryError> {
        let progress = run.progress();
        self.mutate(worker, |s| {
            s.run_id = Some(run.id);
            s.record_progress(&progress, "Crawling", Utc::now());
            Ok(())
        })
        .await
    }

    /// Push a run's progress. Ignored once the row has left running/paused.
    pub async fn report_progress(
        &self,
        worker: WorkerType,
        progress: &RunProgress,
        activity: &str,
    ) -> Result<ScraperStatus, RegistryError> {
        self.mutate(worker, |s| {
            if matches!(s.state, ScraperState::Running | ScraperState::Paused) {
                s.record_progress(progress, activity, Utc::now());
            }
            Ok(())
        })
        .await
    }

    /// Record a non-fatal error such as a failed cell.
    pub async fn record_error(
        &self,
        worker: WorkerType,
        error: &str,
    ) -> Result<ScraperStatus, RegistryError> {
        self.mutate(worker, |s| {
            s.record_error(error, Utc::now());
            Ok(())
        })
        .await
    }

    /// Pause after a rate limit; the supervisor resumes the row after `cooldown`.
    pub async fn pause_for_rate_limit(
        &self,
        worker: WorkerType,
        cooldown: Duration,
    ) -> Result<ScraperStatus, RegistryError> {
        let status = self
            .mutate(worker, |s| {
                let now = Utc::now();
                s.pause_for_rate_limit(now + cooldown, now)
            })
            .await?;
        warn!(
            "{} rate limited, paused for {} minutes",
            worker,
            cooldown.num_minutes()
        );
        Ok(status)
    }

    /// Pause so a manual crawl can run.
    pub async fn pause_for_queue(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        let status = self.mutate(worker, |s| s.pause_for_queue(Utc::now())).await?;
        info!("{} paused for manual crawl", worker);
        Ok(status)
    }

    /// Resume a paused row.
    pub async fn resume(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        let status = self.mutate(worker, |s| s.resume(Utc::now())).await?;
        info!("{} resumed", worker);
        Ok(status)
    }

    /// Mark a normal finish.
    pub async fn complete(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        let status = self.mutate(worker, |s| s.complete(Utc::now())).await?;
        info!(
            "{} completed: {} saved, {} updated, {} rejected",
            worker, status.items_saved, status.items_updated, status.items_rejected
        );
        Ok(status)
    }

    /// Collapse a completed or failed row to idle.
    pub async fn acknowledge(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        self.mutate(worker, |s| s.acknowledge(Utc::now())).await
    }

    /// Mark a fatal error.
    pub async fn fail(&self, worker: WorkerType, error: &str) -> Result<ScraperStatus, RegistryError> {
        let status = self.mutate(worker, |s| s.fail(error, Utc::now())).await?;
        warn!("{} failed: {}", worker, error);
        Ok(status)
    }

    /// Count a supervisor restart.
    pub async fn record_restart(&self, worker: WorkerType) -> Result<ScraperStatus, RegistryError> {
        self.mutate(worker, |s| {
            s.record_restart(Utc::now());
            Ok(())
        })
        .await
    }

    /// Derived health and staleness for a worker.
    pub async fn health(&self, worker: WorkerType) -> Result<HealthReport, RegistryError> {
        let status = self.get(worker).await?;
        Ok(self.health_of(&status, Utc::now()))
    }

    pub fn health_of(&self, status: &ScraperStatus, now: DateTime<Utc>) -> HealthReport {
        HealthReport {
            scraper_type: status.scraper_type,
            state: status.state,
            enabled: status.enabled,
            health: status.health(),
            stale: status.is_stale_at(now, self.stale_threshold),
            consecutive_errors: status.consecutive_errors,
            rate_limit_hits: status.rate_limit_hits,
            success_rate: status.success_rate(),
            last_activity: status.last_activity,
            last_error: status.last_error.clone(),
            last_error_at: status.last_error_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{run_migrations, DbPool};
    use tempfile::tempdir;

    async fn setup_registry() -> (StatusRegistry, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_url = dir.path().join("test.db").display().to_string();
        run_migrations(&db_url).await.unwrap();
        let repo = DieselScraperStatusRepository::new(DbPool::new(&db_url));
        (
            StatusRegistry::new(repo, Duration::seconds(DEFAULT_STALE_THRESHOLD_SECS)),
            dir,
        )
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_row_unchanged() {
        let (registry, _dir) = setup_registry().await;

        let err = registry.pause_for_queue(WorkerType::Poi).await.unwrap_err();
        assert!(matches!(err, RegistryError::IllegalTransition(_)));
        assert_eq!(registry.get(WorkerType::Poi).await.unwrap().state, ScraperState::Idle);

        registry.start(WorkerType::Poi, None).await.unwrap();
        registry.fail(WorkerType::Poi, "boom").await.unwrap();
        let err = registry.resume(WorkerType::Poi).await.unwrap_err();
        assert!(matches!(err, RegistryError::IllegalTransition(_)));
        assert_eq!(
            registry.get(WorkerType::Poi).await.unwrap().state,
            ScraperState::Failed
        );
    }

    #[tokio::test]
    async fn test_start_stores_config_payload() {
        let (registry, _dir) = setup_registry().await;
        let config = serde_json::json!({"categories": ["truck_stop"], "states": ["TX"]});

        let status = registry
            .start(WorkerType::PoiManual, Some(config.clone()))
            .await
            .unwrap();
        assert_eq!(status.state, ScraperState::Running);

        let stored = registry.get(WorkerType::PoiManual).await.unwrap();
        assert_eq!(stored.config, config);
        assert!(stored.last_started_at.is_some());
    }

    #[tokio::test]
    async fn test_disabled_worker_does_not_start() {
        let (registry, _dir) = setup_registry().await;
        registry.set_enabled(WorkerType::Weights, false).await.unwrap();

        assert!(registry.start(WorkerType::Weights, None).await.is_err());
        registry.set_enabled(WorkerType::Weights, true).await.unwrap();
        assert!(registry.start(WorkerType::Weights, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_pause_and_resume() {
        let (registry, _dir) = setup_registry().await;
        registry.start(WorkerType::Heights, None).await.unwrap();

        let paused = registry
            .pause_for_rate_limit(WorkerType::Heights, Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(paused.state, ScraperState::Paused);
        assert_eq!(paused.rate_limit_hits, 1);
        assert!(!paused.auto_paused);
        assert!(paused.cooldown_until.unwrap() > Utc::now() + Duration::minutes(14));

        let resumed = registry.resume(WorkerType::Heights).await.unwrap();
        assert_eq!(resumed.state, ScraperState::Running);
        assert!(resumed.cooldown_until.is_none());
    }

    #[tokio::test]
    async fn test_progress_ignored_after_stop() {
        let (registry, _dir) = setup_registry().await;
        registry.start(WorkerType::Crossings, None).await.unwrap();
        registry.stop(WorkerType::Crossings).await.unwrap();

        let progress = RunProgress {
            current_cell: 3,
            total_cells: 10,
            items_saved: 9,
            ..Default::default()
        };
        let status = registry
            .report_progress(WorkerType::Crossings, &progress, "Crawling")
            .await
            .unwrap();
        assert_eq!(status.state, ScraperState::Idle);
        assert_eq!(status.items_saved, 0);
    }

    #[tokio::test]
    async fn test_health_report() {
        let (registry, _dir) = setup_registry().await;
        registry.start(WorkerType::Directory, None).await.unwrap();
        for _ in 0..5 {
            registry
                .record_error(WorkerType::Directory, "login page timed out")
                .await
                .unwrap();
        }

        let report = registry.health(WorkerType::Directory).await.unwrap();
        assert_eq!(report.health, Health::Critical);
        assert!(!report.stale);
        assert_eq!(report.last_error.as_deref(), Some("login page timed out"));
    }
}
