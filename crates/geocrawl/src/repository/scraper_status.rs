//! Diesel-based scraper status repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{ScraperStatusRecord, ScraperStatusRow};
use super::pool::{DbPool, DieselError};
use super::util::{invalid_column, json_error};
use super::{format_datetime_opt, parse_datetime, parse_datetime_opt};
use crate::models::{ScraperState, ScraperStatus, WorkerType};
use crate::schema::scraper_status;
use crate::with_conn;

/// Convert a database record to a domain model.
impl TryFrom<ScraperStatusRecord> for ScraperStatus {
    type Error = DieselError;

    fn try_from(record: ScraperStatusRecord) -> Result<Self, Self::Error> {
        let config = serde_json::from_str(&record.config).map_err(json_error)?;

        Ok(ScraperStatus {
            scraper_type: WorkerType::from_str(&record.scraper_type)
                .ok_or_else(|| invalid_column("scraper_type", &record.scraper_type))?,
            state: ScraperState::from_str(&record.state)
                .ok_or_else(|| invalid_column("scraper state", &record.state))?,
            enabled: record.enabled != 0,
            auto_paused: record.auto_paused != 0,
            current_activity: record.current_activity,
            activity_detail: record.activity_detail,
            config,
            run_id: record.run_id,
            current_cell: record.current_cell,
            total_cells: record.total_cells,
            items_found: record.items_found,
            items_saved: record.items_saved,
            items_updated: record.items_updated,
            items_rejected: record.items_rejected,
            session_errors: record.session_errors,
            consecutive_errors: record.consecutive_errors,
            rate_limit_hits: record.rate_limit_hits,
            cooldown_until: parse_datetime_opt(record.cooldown_until),
            last_activity: parse_datetime_opt(record.last_activity),
            last_started_at: parse_datetime_opt(record.last_started_at),
            last_completed_at: parse_datetime_opt(record.last_completed_at),
            last_error: record.last_error,
            last_error_at: parse_datetime_opt(record.last_error_at),
            total_runs: record.total_runs,
            successful_runs: record.successful_runs,
            lifetime_items_saved: record.lifetime_items_saved,
            restart_count: record.restart_count,
            last_restart_at: parse_datetime_opt(record.last_restart_at),
            host: record.host,
            updated_at: parse_datetime(&record.updated_at),
        })
    }
}

impl From<&ScraperStatus> for ScraperStatusRow {
    fn from(status: &ScraperStatus) -> Self {
        Self {
            scraper_type: status.scraper_type.as_str().to_string(),
            state: status.state.as_str().to_string(),
            enabled: status.enabled as i32,
            auto_paused: status.auto_paused as i32,
            current_activity: status.current_activity.clone(),
            activity_detail: status.activity_detail.clone(),
            config: status.config.to_string(),
            run_id: status.run_id,
            current_cell: status.current_cell,
            total_cells: status.total_cells,
            items_found: status.items_found,
            items_saved: status.items_saved,
            items_updated: status.items_updated,
            items_rejected: status.items_rejected,
            session_errors: status.session_errors,
            consecutive_errors: status.consecutive_errors,
            rate_limit_hits: status.rate_limit_hits,
            cooldown_until: format_datetime_opt(status.cooldown_until),
            last_activity: format_datetime_opt(status.last_activity),
            last_started_at: format_datetime_opt(status.last_started_at),
            last_completed_at: format_datetime_opt(status.last_completed_at),
            last_error: status.last_error.clone(),
            last_error_at: format_datetime_opt(status.last_error_at),
            total_runs: status.total_runs,
            successful_runs: status.successful_runs,
            lifetime_items_saved: status.lifetime_items_saved,
            restart_count: status.restart_count,
            last_restart_at: format_datetime_opt(status.last_restart_at),
            host: status.host.clone(),
            updated_at: status.updated_at.to_rfc3339(),
        }
    }
}

/// Diesel-based scraper status repository.
///
/// Rows are never deleted. State changes go through [`Self::save_if_state`]
/// so a concurrent writer cannot be silently overwritten.
#[derive(Clone)]
pub struct DieselScraperStatusRepository {
    pool: DbPool,
}

impl DieselScraperStatusRepository {
    /// Create a new repository with an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert idle baseline rows for any worker types that have none yet.
    pub async fn ensure(&self, workers: &[WorkerType]) -> Result<usize, DieselError> {
        let rows: Vec<ScraperStatusRow> = workers
            .iter()
            .map(|worker| ScraperStatusRow::from(&ScraperStatus::new(*worker)))
            .collect();

        with_conn!(self.pool, conn, {
            diesel::insert_or_ignore_into(scraper_status::table)
                .values(&rows)
                .execute(&mut conn)
                .await
        })
    }

    /// Get all status rows.
    pub async fn get_all(&self) -> Result<Vec<ScraperStatus>, DieselError> {
        with_conn!(self.pool, conn, {
            scraper_status::table
                .order(scraper_status::scraper_type.asc())
                .select(ScraperStatusRecord::as_select())
                .load::<ScraperStatusRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(ScraperStatus::try_from).collect())
        })
    }

    /// Get the status row for a worker type.
    pub async fn get(&self, worker: WorkerType) -> Result<Option<ScraperStatus>, DieselError> {
        with_conn!(self.pool, conn, {
            scraper_status::table
                .find(worker.as_str())
                .select(ScraperStatusRecord::as_select())
                .first::<ScraperStatusRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(ScraperStatus::try_from).transpose())
        })
    }

    /// Overwrite a row only if its stored state still equals `expected`.
    ///
    /// Returns false when another writer changed the state first.
    pub async fn save_if_state(
        &self,
        status: &ScraperStatus,
        expected: ScraperState,
    ) -> Result<bool, DieselError> {
        let row = ScraperStatusRow::from(status);
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                scraper_status::table
                    .filter(scraper_status::scraper_type.eq(status.scraper_type.as_str()))
                    .filter(scraper_status::state.eq(expected.as_str())),
            )
            .set(&row)
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// Set the enabled flag without touching the lifecycle state.
    pub async fn set_enabled(&self, worker: WorkerType, enabled: bool) -> Result<bool, DieselError> {
        let now = chrono::Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            let rows = diesel::update(scraper_status::table.find(worker.as_str()))
                .set((
                    scraper_status::enabled.eq(enabled as i32),
                    scraper_status::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrations::run_migrations;
    use chrono::Utc;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselScraperStatusRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db_url = db_path.display().to_string();
        run_migrations(&db_url).await.unwrap();
        (DieselScraperStatusRepository::new(DbPool::new(&db_url)), dir)
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (repo, _dir) = setup_test_db().await;
        assert_eq!(repo.ensure(&WorkerType::ALL).await.unwrap(), 6);
        assert_eq!(repo.ensure(&WorkerType::ALL).await.unwrap(), 0);

        let all = repo.get_all().await.unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.iter().all(|s| s.state == ScraperState::Idle && s.enabled));
    }

    #[tokio::test]
    async fn test_save_if_state_detects_concurrent_change() {
        let (repo, _dir) = setup_test_db().await;
        repo.ensure(&[WorkerType::Heights]).await.unwrap();

        let mut status = repo.get(WorkerType::Heights).await.unwrap().unwrap();
        status
            .start(Some(serde_json::json!({"states": ["CO"]})), Utc::now())
            .unwrap();
        assert!(repo.save_if_state(&status, ScraperState::Idle).await.unwrap());

        let stored = repo.get(WorkerType::Heights).await.unwrap().unwrap();
        assert_eq!(stored.state, ScraperState::Running);
        assert_eq!(stored.config["states"][0], "CO");
        assert!(stored.last_started_at.is_some());

        // A second writer still holding the idle snapshot loses.
        assert!(!repo.save_if_state(&status, ScraperState::Idle).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_enabled() {
        let (repo, _dir) = setup_test_db().await;
        repo.ensure(&[WorkerType::Directory]).await.unwrap();

        assert!(repo.set_enabled(WorkerType::Directory, false).await.unwrap());
        let status = repo.get(WorkerType::Directory).await.unwrap().unwrap();
        assert!(!status.enabled);
        assert!(!repo.set_enabled(WorkerType::Poi, false).await.unwrap());
    }
}
