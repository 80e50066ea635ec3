//! End-to-end supervision and queue handoff against a temporary database.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use geocrawl::grid::GridTiler;
use geocrawl::models::{
    CrawlScope, NewCrawlRun, RunCounters, RunKind, RunStatus, ScraperState, WorkerType,
};
use geocrawl::queue::{CrawlQueueManager, ManualOutcome, ReconcileOutcome};
use geocrawl::registry::StatusRegistry;
use geocrawl::repository::DbContext;
use geocrawl::supervisor::{ServiceController, ServiceError, Supervisor};

#[derive(Default)]
struct RecordingController {
    active: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingController {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceController for RecordingController {
    async fn is_active(&self, service: &str) -> Result<bool, ServiceError> {
        Ok(self.active.lock().unwrap().contains(service))
    }

    async fn start(&self, service: &str) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(format!("start {}", service));
        self.active.lock().unwrap().insert(service.to_string());
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(format!("stop {}", service));
        self.active.lock().unwrap().remove(service);
        Ok(())
    }
}

struct Harness {
    ctx: DbContext,
    registry: StatusRegistry,
    queue: CrawlQueueManager,
    controller: Arc<RecordingController>,
    supervisor: Supervisor,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DbContext::from_path(&dir.path().join("geocrawl.db"));
    ctx.migrate().await.unwrap();

    let registry = StatusRegistry::new(ctx.scraper_status(), Duration::minutes(5));
    registry.ensure_all().await.unwrap();
    let queue = CrawlQueueManager::new(
        registry.clone(),
        ctx.crawl_runs(),
        ctx.request_queue(),
        GridTiler::default(),
    );

    let mut groups = BTreeMap::new();
    for worker in WorkerType::ALL {
        groups
            .entry(worker.default_service().to_string())
            .or_insert_with(Vec::new)
            .push(worker);
    }

    let controller = Arc::new(RecordingController::default());
    let supervisor = Supervisor::new(
        registry.clone(),
        queue.clone(),
        controller.clone(),
        groups,
        std::time::Duration::from_secs(30),
    );

    Harness {
        ctx,
        registry,
        queue,
        controller,
        supervisor,
        _dir: dir,
    }
}

#[tokio::test]
async fn stale_worker_is_restarted_once_per_episode() {
    let h = harness().await;
    let service = WorkerType::Heights.default_service();

    h.registry.start(WorkerType::Heights, None).await.unwrap();
    h.controller.start(service).await.unwrap();

    let repo = h.ctx.scraper_status();
    let mut status = repo.get(WorkerType::Heights).await.unwrap().unwrap();
    status.last_activity = Some(Utc::now() - Duration::minutes(10));
    assert!(repo
        .save_if_state(&status, ScraperState::Running)
        .await
        .unwrap());

    let first = h.supervisor.poll_once().await.unwrap();
    assert_eq!(first.restarted, vec![service.to_string()]);

    let second = h.supervisor.poll_once().await.unwrap();
    assert!(second.restarted.is_empty());
    assert!(second.started.is_empty());

    assert_eq!(
        h.controller.calls(),
        vec![
            format!("start {}", service),
            format!("stop {}", service),
            format!("start {}", service),
        ]
    );

    let status = h.registry.get(WorkerType::Heights).await.unwrap();
    assert_eq!(status.restart_count, 1);
    assert!(status.last_restart_at.is_some());
}

#[tokio::test]
async fn fresh_worker_is_not_restarted() {
    let h = harness().await;
    h.registry.start(WorkerType::Weights, None).await.unwrap();

    let repo = h.ctx.scraper_status();
    let mut status = repo.get(WorkerType::Weights).await.unwrap().unwrap();
    status.last_activity = Some(Utc::now() - Duration::minutes(4));
    repo.save_if_state(&status, ScraperState::Running)
        .await
        .unwrap();

    let first = h.supervisor.poll_once().await.unwrap();
    assert_eq!(first.started.len(), 1);
    let second = h.supervisor.poll_once().await.unwrap();
    assert!(second.restarted.is_empty());
    assert_eq!(h.controller.calls().len(), 1);
}

#[tokio::test]
async fn manual_request_preempts_and_then_resumes_automatic() {
    let h = harness().await;
    let runs = h.ctx.crawl_runs();

    // Automatic crawl part-way through its run.
    h.registry.start(WorkerType::Poi, None).await.unwrap();
    let (auto_run, _) = runs
        .create_or_resume(&NewCrawlRun {
            scraper_type: WorkerType::Poi,
            kind: RunKind::Full,
            scope: CrawlScope::default(),
            total_cells: 10,
        })
        .await
        .unwrap();
    runs.mark_running(auto_run.id).await.unwrap();
    runs.advance(auto_run.id, &RunCounters::default()).await.unwrap();
    runs.advance(auto_run.id, &RunCounters::default()).await.unwrap();
    h.registry.attach_run(WorkerType::Poi, &auto_run).await.unwrap();

    let outcome = h
        .queue
        .request_manual(CrawlScope::new(vec!["rest_area".into()], vec!["RI".into()]))
        .await
        .unwrap();
    let ManualOutcome::Started { run_id: manual_id } = outcome else {
        panic!("expected manual crawl to start, got {:?}", outcome);
    };

    let auto = h.registry.get(WorkerType::Poi).await.unwrap();
    assert_eq!(auto.state, ScraperState::Paused);
    assert!(auto.auto_paused);
    assert!(auto.cooldown_until.is_none());
    let paused_run = runs.get(auto_run.id).await.unwrap().unwrap();
    assert_eq!(paused_run.status, RunStatus::Paused);

    // While the manual crawl runs, polls keep the automatic crawl paused.
    let report = h.supervisor.poll_once().await.unwrap();
    assert_eq!(report.reconcile, Some(ReconcileOutcome::ManualActive));
    assert_eq!(
        h.registry.get(WorkerType::Poi).await.unwrap().state,
        ScraperState::Paused
    );

    // Manual crawl finishes every cell.
    let manual_run = runs.get(manual_id).await.unwrap().unwrap();
    runs.mark_running(manual_id).await.unwrap();
    for _ in 0..manual_run.total_cells {
        runs.advance(manual_id, &RunCounters::default()).await.unwrap();
    }
    assert!(runs.complete(manual_id).await.unwrap());
    h.registry.complete(WorkerType::PoiManual).await.unwrap();

    let report = h.supervisor.poll_once().await.unwrap();
    assert_eq!(report.reconcile, Some(ReconcileOutcome::ResumedAutomatic));
    assert!(report.collapsed.contains(&WorkerType::PoiManual));

    let auto = h.registry.get(WorkerType::Poi).await.unwrap();
    assert_eq!(auto.state, ScraperState::Running);
    assert!(!auto.auto_paused);
    let resumed = runs.get(auto_run.id).await.unwrap().unwrap();
    assert_eq!(resumed.status, RunStatus::Running);
    assert_eq!(resumed.current_cell, 2);
    assert_eq!(
        h.registry.get(WorkerType::PoiManual).await.unwrap().state,
        ScraperState::Idle
    );
}

async fn set_activity(h: &Harness, worker: WorkerType, at: chrono::DateTime<Utc>) {
    let repo = h.ctx.scraper_status();
    let mut status = repo.get(worker).await.unwrap().unwrap();
    status.last_started_at = Some(at);
    status.last_activity = Some(at);
    assert!(repo
        .save_if_state(&status, ScraperState::Running)
        .await
        .unwrap());
}

#[tokio::test]
async fn waiting_group_member_does_not_restart_busy_service() {
    let h = harness().await;
    let service = WorkerType::Heights.default_service();
    assert_eq!(WorkerType::Crossings.default_service(), service);

    h.registry.start(WorkerType::Heights, None).await.unwrap();
    h.registry.start(WorkerType::Crossings, None).await.unwrap();
    h.controller.start(service).await.unwrap();

    // Heights is mid-session; Crossings has been waiting its turn.
    set_activity(&h, WorkerType::Heights, Utc::now()).await;
    set_activity(&h, WorkerType::Crossings, Utc::now() - Duration::minutes(10)).await;

    let report = h.supervisor.poll_once().await.unwrap();
    assert!(report.restarted.is_empty());
    assert_eq!(h.controller.calls(), vec![format!("start {}", service)]);
    assert_eq!(
        h.registry.get(WorkerType::Crossings).await.unwrap().restart_count,
        0
    );

    // Once the busy member goes quiet too, the service is stuck.
    set_activity(&h, WorkerType::Heights, Utc::now() - Duration::minutes(10)).await;
    let report = h.supervisor.poll_once().await.unwrap();
    assert_eq!(report.restarted, vec![service.to_string()]);
}

#[tokio::test]
async fn queued_request_waits_while_manual_worker_is_disabled() {
    let h = harness().await;
    h.registry.start(WorkerType::Poi, None).await.unwrap();

    h.queue
        .request_manual(CrawlScope::new(vec![], vec!["RI".into()]))
        .await
        .unwrap();
    let outcome = h
        .queue
        .request_manual(CrawlScope::new(vec![], vec!["NE".into()]))
        .await
        .unwrap();
    assert!(matches!(outcome, ManualOutcome::Queued { .. }));

    h.registry.reset(WorkerType::PoiManual).await.unwrap();
    h.registry
        .set_enabled(WorkerType::PoiManual, false)
        .await
        .unwrap();

    let report = h.supervisor.poll_once().await.unwrap();
    assert_eq!(report.reconcile, Some(ReconcileOutcome::ResumedAutomatic));

    let pending = h.queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].scope.states, vec!["NE"]);
    assert_eq!(
        h.registry.get(WorkerType::Poi).await.unwrap().state,
        ScraperState::Running
    );
    assert_eq!(
        h.registry.get(WorkerType::PoiManual).await.unwrap().state,
        ScraperState::Idle
    );
}
