//! Scraper status rows and their lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::WorkerType;

/// Consecutive errors at which a worker is reported critical.
const CRITICAL_CONSECUTIVE_ERRORS: i32 = 5;
/// Consecutive errors at which a worker is reported as a warning.
const WARNING_CONSECUTIVE_ERRORS: i32 = 3;
/// Rate limit hits above which a worker is reported as a warning.
const WARNING_RATE_LIMIT_HITS: i32 = 10;
/// Lifetime success rate below which a worker is reported degraded.
const DEGRADED_SUCCESS_RATE: f64 = 0.8;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScraperState {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ScraperState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: ScraperState) -> bool {
        use ScraperState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Completed, Idle)
                | (Running, Failed)
                | (Running, Idle)
                | (Paused, Idle)
                | (Failed, Idle)
        )
    }
}

impl fmt::Display for ScraperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change. The row it was attempted on is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal transition for {worker}: {from} -> {to}")]
pub struct IllegalTransition {
    pub worker: WorkerType,
    pub from: ScraperState,
    pub to: ScraperState,
}

/// Derived health of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Warning,
    Critical,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Snapshot of a run's position and counters, mirrored onto the status row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub current_cell: i32,
    pub total_cells: i32,
    pub items_found: i64,
    pub items_saved: i64,
    pub items_updated: i64,
    pub items_rejected: i64,
    pub errors: i64,
}

/// Status row for one worker type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperStatus {
    pub scraper_type: WorkerType,
    pub state: ScraperState,
    pub enabled: bool,
    /// Paused by the queue manager rather than by a rate limit.
    pub auto_paused: bool,
    pub current_activity: Option<String>,
    pub activity_detail: Option<String>,
    /// Free-form configuration payload handed to the worker on start.
    pub config: serde_json::Value,
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
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub lifetime_items_saved: i64,
    pub restart_count: i32,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub host: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ScraperStatus {
    /// Idle baseline row for a worker type.
    pub fn new(scraper_type: WorkerType) -> Self {
        Self {
            scraper_type,
            state: ScraperState::Idle,
            enabled: true,
            auto_paused: false,
            current_activity: None,
            activity_detail: None,
            config: serde_json::json!({}),
            run_id: None,
            current_cell: 0,
            total_cells: 0,
            items_found: 0,
            items_saved: 0,
            items_updated: 0,
            items_rejected: 0,
            session_errors: 0,
            consecutive_errors: 0,
            rate_limit_hits: 0,
            cooldown_until: None,
            last_activity: None,
            last_started_at: None,
            last_completed_at: None,
            last_error: None,
            last_error_at: None,
            total_runs: 0,
            successful_runs: 0,
            lifetime_items_saved: 0,
            restart_count: 0,
            last_restart_at: None,
            host: None,
            updated_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: ScraperState, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(to) {
            return Err(IllegalTransition {
                worker: self.scraper_type,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Start a session, acknowledging a finished or failed one first.
    ///
    /// Only enabled rows may start. Starting a paused row resumes it with its
    /// counters intact.
    pub fn start(
        &mut self,
        config: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        if !self.enabled {
            return Err(IllegalTransition {
                worker: self.scraper_type,
                from: self.state,
                to: ScraperState::Running,
            });
        }
        match self.state {
            ScraperState::Paused => return self.resume(now),
            ScraperState::Completed | ScraperState::Failed => {
                self.transition(ScraperState::Idle, now)?;
            }
            _ => {}
        }
        self.transition(ScraperState::Running, now)?;

        if let Some(config) = config {
            self.config = config;
        }
        self.auto_paused = false;
        self.cooldown_until = None;
        self.run_id = None;
        self.current_cell = 0;
        self.total_cells = 0;
        self.items_found = 0;
        self.items_saved = 0;
        self.items_updated = 0;
        self.items_rejected = 0;
        self.session_errors = 0;
        self.current_activity = Some("Starting".to_string());
        self.activity_detail = None;
        self.last_started_at = Some(now);
        self.last_activity = Some(now);
        self.host = get_hostname();
        Ok(())
    }

    /// Pause after the source rate limited us.
    pub fn pause_for_rate_limit(
        &mut self,
        cooldown_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        self.transition(ScraperState::Paused, now)?;
        self.auto_paused = false;
        self.rate_limit_hits += 1;
        self.cooldown_until = Some(cooldown_until);
        self.current_activity = Some("Rate limited".to_string());
        self.activity_detail = Some(format!("cooling down until {}", cooldown_until.to_rfc3339()));
        Ok(())
    }

    /// Pause so a manual crawl can run.
    pub fn pause_for_queue(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(ScraperState::Paused, now)?;
        self.auto_paused = true;
        self.cooldown_until = None;
        self.current_activity = Some("Paused for manual crawl".to_string());
        self.activity_detail = None;
        Ok(())
    }

    /// Resume a paused session.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(ScraperState::Running, now)?;
        self.auto_paused = false;
        self.cooldown_until = None;
        self.current_activity = Some("Resuming".to_string());
        self.activity_detail = None;
        self.last_activity = Some(now);
        Ok(())
    }

    /// Finish normally. Lifetime totals accumulate the session's counters.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(ScraperState::Completed, now)?;
        self.total_runs += 1;
        self.successful_runs += 1;
        self.lifetime_items_saved += self.items_saved;
        self.consecutive_errors = 0;
        self.last_completed_at = Some(now);
        self.last_activity = Some(now);
        self.current_activity = Some("Completed".to_string());
        self.activity_detail = None;
        Ok(())
    }

    /// Record a fatal error for the session.
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(ScraperState::Failed, now)?;
        self.total_runs += 1;
        self.lifetime_items_saved += self.items_saved;
        self.session_errors += 1;
        self.consecutive_errors += 1;
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(now);
        self.current_activity = Some("Failed".to_string());
        self.activity_detail = None;
        Ok(())
    }

    /// Explicit stop. Stopping an idle row is a no-op.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        if self.state == ScraperState::Idle {
            return Ok(());
        }
        self.transition(ScraperState::Idle, now)?;
        self.auto_paused = false;
        self.cooldown_until = None;
        self.current_activity = None;
        self.activity_detail = None;
        Ok(())
    }

    /// Collapse a completed or failed row back to idle.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(ScraperState::Idle, now)
    }

    /// Re-baseline to idle from any state, keeping lifetime totals and the
    /// enabled flag.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let baseline = Self {
            enabled: self.enabled,
            total_runs: self.total_runs,
            successful_runs: self.successful_runs,
            lifetime_items_saved: self.lifetime_items_saved,
            updated_at: now,
            ..Self::new(self.scraper_type)
        };
        *self = baseline;
    }

    /// Mirror a run's progress onto the row. Clears the consecutive error count.
    pub fn record_progress(&mut self, progress: &RunProgress, activity: &str, now: DateTime<Utc>) {
        self.current_cell = progress.current_cell;
        self.total_cells = progress.total_cells;
        self.items_found = progress.items_found;
        self.items_saved = progress.items_saved;
        self.items_updated = progress.items_updated;
        self.items_rejected = progress.items_rejected;
        self.session_errors = progress.errors;
        self.consecutive_errors = 0;
        self.current_activity = Some(activity.to_string());
        self.activity_detail = Some(format!(
            "cell {}/{}",
            progress.current_cell, progress.total_cells
        ));
        self.last_activity = Some(now);
        self.updated_at = now;
    }

    /// Record a non-fatal error, such as a failed cell.
    pub fn record_error(&mut self, error: &str, now: DateTime<Utc>) {
        self.session_errors += 1;
        self.consecutive_errors += 1;
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(now);
        self.last_activity = Some(now);
        self.updated_at = now;
    }

    /// Record that the supervisor restarted the backing service.
    pub fn record_restart(&mut self, now: DateTime<Utc>) {
        self.restart_count += 1;
        self.last_restart_at = Some(now);
        self.updated_at = now;
    }

    /// Running with no activity within `threshold`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.state != ScraperState::Running {
            return false;
        }
        match self.last_activity.or(self.last_started_at) {
            Some(at) => now - at >= threshold,
            None => true,
        }
    }

    /// Check staleness against the current time.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.is_stale_at(Utc::now(), threshold)
    }

    /// Stale, and the last restart (if any) is at least one threshold ago.
    pub fn restart_due_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.is_stale_at(now, threshold)
            && self
                .last_restart_at
                .map_or(true, |restarted| now - restarted >= threshold)
    }

    /// Paused by a rate limit whose cooldown has elapsed.
    pub fn cooldown_elapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.state == ScraperState::Paused
            && !self.auto_paused
            && self.cooldown_until.map_or(false, |until| until <= now)
    }

    /// Fraction of finished runs that completed normally.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_runs == 0 {
            None
        } else {
            Some(self.successful_runs as f64 / self.total_runs as f64)
        }
    }

    pub fn health(&self) -> Health {
        if self.consecutive_errors >= CRITICAL_CONSECUTIVE_ERRORS {
            Health::Critical
        } else if self.consecutive_errors >= WARNING_CONSECUTIVE_ERRORS
            || self.rate_limit_hits > WARNING_RATE_LIMIT_HITS
        {
            Health::Warning
        } else if self
            .success_rate()
            .is_some_and(|rate| rate < DEGRADED_SUCCESS_RATE)
        {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }
}

/// Get the current hostname.
pub fn get_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}
