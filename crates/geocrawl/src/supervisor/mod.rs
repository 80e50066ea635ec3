//! Process supervisor.
//!
//! Polls the status registry and keeps the OS services that host workers in
//! line with it: services are started for rows marked running, restarted
//! when a running row goes stale, and left alone to finish otherwise.
//! Workers sharing one service form an exclusive group, handled under a
//! per-group lock.

mod service;

pub use service::{ServiceController, ServiceError, SystemctlController};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{ScraperState, ScraperStatus, WorkerType};
use crate::queue::{CrawlQueueManager, QueueError, ReconcileOutcome};
use crate::registry::{RegistryError, StatusRegistry};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub reconcile: Option<ReconcileOutcome>,
    /// Rows collapsed from completed to idle.
    pub collapsed: Vec<WorkerType>,
    /// Rows resumed after their rate-limit cooldown.
    pub resumed: Vec<WorkerType>,
    /// Services started for running rows.
    pub started: Vec<String>,
    /// Services restarted because a member went stale.
    pub restarted: Vec<String>,
    /// Active services with no running member, left to exit on their own.
    pub finishing: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct GroupState {
    /// We started the service and have not seen it go inactive since.
    started_by_us: bool,
}

struct ServiceGroup {
    service: String,
    members: Vec<WorkerType>,
    state: Mutex<GroupState>,
}

/// Long-lived supervisor service.
pub struct Supervisor {
    registry: StatusRegistry,
    queue: CrawlQueueManager,
    controller: Arc<dyn ServiceController>,
    groups: Vec<ServiceGroup>,
    poll_interval: std::time::Duration,
}

impl Supervisor {
    /// `groups` maps each service to the worker types it hosts.
    pub fn new(
        registry: StatusRegistry,
        queue: CrawlQueueManager,
        controller: Arc<dyn ServiceController>,
        groups: BTreeMap<String, Vec<WorkerType>>,
        poll_interval: std::time::Duration,
    ) -> Self {
        let groups = groups
            .into_iter()
            .map(|(service, members)| ServiceGroup {
                service,
                members,
                state: Mutex::new(GroupState::default()),
            })
            .collect();
        Self {
            registry,
            queue,
            controller,
            groups,
            poll_interval,
        }
    }

    /// Poll until cancelled, then stop the services we started.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SupervisorError> {
        self.registry.ensure_all().await?;
        info!(
            "Supervising {} service groups every {}s",
            self.groups.len(),
            self.poll_interval.as_secs()
        );

        loop {
            match self.poll_once().await {
                Ok(report) => debug!("Poll: {:?}", report),
                Err(e) => warn!("Poll failed: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Supervisor shutting down");
        self.shutdown().await;
        Ok(())
    }

    /// One supervision pass over every group.
    pub async fn poll_once(&self) -> Result<PollReport, SupervisorError> {
        let mut report = PollReport::default();

        match self.queue.reconcile().await {
            Ok(outcome) => report.reconcile = Some(outcome),
            Err(e) => {
                warn!("Queue reconcile failed: {}", e);
                report.errors.push(e.to_string());
            }
        }

        for status in self.registry.all().await? {
            if status.state == ScraperState::Completed {
                self.registry.acknowledge(status.scraper_type).await?;
                report.collapsed.push(status.scraper_type);
            }
        }

        let rows: BTreeMap<WorkerType, ScraperStatus> = self
            .registry
            .all()
            .await?
            .into_iter()
            .map(|s| (s.scraper_type, s))
            .collect();

        for group in &self.groups {
            if let Err(e) = self.supervise_group(group, &rows, &mut report).await {
                warn!("Supervising {} failed: {}", group.service, e);
                report.errors.push(format!("{}: {}", group.service, e));
            }
        }

        Ok(report)
    }

    async fn supervise_group(
        &self,
        group: &ServiceGroup,
        rows: &BTreeMap<WorkerType, ScraperStatus>,
        report: &mut PollReport,
    ) -> Result<(), SupervisorError> {
        let mut state = group.state.lock().await;
        let now = Utc::now();

        let mut running = Vec::new();
        for worker in &group.members {
            let Some(status) = rows.get(worker) else {
                continue;
            };
            if status.cooldown_elapsed_at(now) {
                let resumed = self.registry.resume(*worker).await?;
                info!("{} cooldown elapsed, resuming", worker);
                report.resumed.push(*worker);
                running.push(resumed);
            } else if status.state == ScraperState::Running {
                running.push(status.clone());
            }
        }

        let active = self.controller.is_active(&group.service).await?;

        if running.is_empty() {
            if active {
                debug!("{} has no running worker, letting it finish", group.service);
                report.finishing.push(group.service.clone());
            } else {
                state.started_by_us = false;
            }
            return Ok(());
        }

        if !active {
            info!(
                "Starting {} for {}",
                group.service,
                worker_list(running.iter().map(|s| s.scraper_type))
            );
            self.controller.start(&group.service).await?;
            state.started_by_us = true;
            report.started.push(group.service.clone());
            return Ok(());
        }

        // Members of a group run one at a time, so waiting members never
        // report activity. Only a group with no fresh member is stuck.
        let threshold = self.registry.stale_threshold();
        if running.iter().any(|s| !s.is_stale_at(now, threshold)) {
            return Ok(());
        }
        let due: Vec<WorkerType> = running
            .iter()
            .filter(|s| s.restart_due_at(now, threshold))
            .map(|s| s.scraper_type)
            .collect();
        if due.is_empty() {
            return Ok(());
        }

        warn!(
            "Restarting {}: stale {}",
            group.service,
            worker_list(due.iter().copied())
        );
        self.controller.stop(&group.service).await?;
        self.controller.start(&group.service).await?;
        state.started_by_us = true;
        for worker in due {
            let status = self.registry.record_restart(worker).await?;
            info!("{} restart #{}", worker, status.restart_count);
        }
        report.restarted.push(group.service.clone());
        Ok(())
    }

    /// Stop every service this supervisor started and still believes active.
    pub async fn shutdown(&self) {
        for group in &self.groups {
            let mut state = group.state.lock().await;
            if !state.started_by_us {
                continue;
            }
            match self.controller.is_active(&group.service).await {
                Ok(true) => {
                    info!("Stopping {}", group.service);
                    if let Err(e) = self.controller.stop(&group.service).await {
                        warn!("Failed to stop {}: {}", group.service, e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to query {}: {}", group.service, e),
            }
            state.started_by_us = false;
        }
    }
}

fn worker_list(workers: impl Iterator<Item = WorkerType>) -> String {
    workers.map(|w| w.as_str()).collect::<Vec<_>>().join(", ")
}

/// Time elapsed since a timestamp, for log lines.
pub fn age(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match since {
        Some(at) => {
            let secs = (now - at).num_seconds().max(0);
            if secs >= 3600 {
                format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
            } else if secs >= 60 {
                format!("{}m{}s", secs / 60, secs % 60)
            } else {
                format!("{}s", secs)
            }
        }
        None => "never".to_string(),
    }
}
