//! Crawl loop behaviour against a scripted source and a temporary database.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use geocrawl::config::Settings;
use geocrawl::grid::{BoundingBox, Cell, GeoPoint, GridError, GridTiler};
use geocrawl::models::{CrawlScope, RecordKind, RunStatus, ScraperState, WorkerType};
use geocrawl::registry::StatusRegistry;
use geocrawl::repository::DbContext;
use geocrawl_scrape::overpass::TagFilter;
use geocrawl_scrape::worker::WorkerOptions;
use geocrawl_scrape::{
    CellSource, CrawlError, CrawlOutcome, CrawlWorker, ElementType, FetchError, RawElement,
};

enum Reply {
    Elements(Vec<RawElement>),
    RateLimited,
    Transient,
}

/// Serves a fixed reply per cell and records which cells were fetched.
struct ScriptedSource {
    cells: Vec<Cell>,
    replies: Mutex<Vec<Option<Reply>>>,
    fetched: Mutex<Vec<usize>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedSource {
    fn new(replies: Vec<Reply>) -> Self {
        let cells = (0..replies.len())
            .map(|index| {
                let center = GeoPoint::new(35.0 + index as f64, -97.0);
                Cell {
                    index,
                    region: "OK".to_string(),
                    center,
                    bounds: BoundingBox::around(center, 25.0),
                }
            })
            .collect();
        Self {
            cells,
            replies: Mutex::new(replies.into_iter().map(Some).collect()),
            fetched: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    fn cancel_after(mut self, cell: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((cell, token));
        self
    }

    fn fetched(&self) -> Vec<usize> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl CellSource for ScriptedSource {
    fn plan(&self, _tiler: &GridTiler, _scope: &CrawlScope) -> Result<Vec<Cell>, GridError> {
        Ok(self.cells.clone())
    }

    async fn fetch_cell(
        &self,
        cell: &Cell,
        _filters: &[TagFilter],
    ) -> Result<Vec<RawElement>, FetchError> {
        self.fetched.lock().unwrap().push(cell.index);
        if let Some((after, token)) = &self.cancel_after {
            if cell.index == *after {
                token.cancel();
            }
        }
        let reply = self.replies.lock().unwrap()[cell.index].take();
        match reply {
            Some(Reply::Elements(elements)) => Ok(elements),
            Some(Reply::RateLimited) => Err(FetchError::RateLimited {
                status: 429,
                retry_after_secs: Some(60),
            }),
            Some(Reply::Transient) => Err(FetchError::Transient("connection reset".into())),
            None => Ok(Vec::new()),
        }
    }
}

struct Env {
    settings: Settings,
    ctx: DbContext,
    registry: StatusRegistry,
    _dir: TempDir,
}

async fn env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
    settings.request_delay_ms = 0;
    let ctx = settings.create_db_context();
    ctx.migrate().await.unwrap();
    let registry = StatusRegistry::new(ctx.scraper_status(), settings.stale_threshold());
    registry.ensure_all().await.unwrap();
    Env {
        settings,
        ctx,
        registry,
        _dir: dir,
    }
}

fn poi(id: &str, lat: f64, lon: f64) -> RawElement {
    RawElement::new(ElementType::Node, id, lat, lon)
        .tag("amenity", "fuel")
        .tag("name", "Pilot Travel Center")
}

fn four_pois() -> Vec<Reply> {
    (0..4)
        .map(|i| {
            Reply::Elements(vec![poi(
                &format!("{}", 100 + i),
                35.0 + i as f64 + 0.0123,
                -97.4567,
            )])
        })
        .collect()
}

fn worker(env: &Env, kind: WorkerType, source: Arc<ScriptedSource>) -> CrawlWorker {
    CrawlWorker::new(kind, &env.settings, &env.ctx)
        .unwrap()
        .with_source(source)
}

#[tokio::test]
async fn full_crawl_saves_every_poi_once() {
    let env = env().await;
    env.registry.start(WorkerType::Poi, None).await.unwrap();
    let source = Arc::new(ScriptedSource::new(four_pois()));

    let outcome = worker(&env, WorkerType::Poi, source.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    let CrawlOutcome::Completed { run_id } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };

    let run = env.ctx.crawl_runs().get(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.current_cell, 4);
    assert_eq!(run.total_cells, 4);
    assert_eq!(run.counters.items_found, 4);
    assert_eq!(run.counters.items_saved, 4);

    let records = env.ctx.geo_records().list(RecordKind::Poi, 10).await.unwrap();
    assert_eq!(records.len(), 4);
    let serials: HashSet<&str> = records.iter().map(|r| r.serial.as_str()).collect();
    assert_eq!(serials.len(), 4);
    assert!(records.iter().all(|r| r.category == "truck_stop"));

    let row = env.registry.get(WorkerType::Poi).await.unwrap();
    assert_eq!(row.state, ScraperState::Completed);
    assert_eq!(row.items_saved, 4);
    assert_eq!(row.current_cell, 4);
    assert_eq!(row.successful_runs, 1);
    assert_eq!(source.fetched(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn recrawl_updates_without_new_serials() {
    let env = env().await;
    env.registry.start(WorkerType::Poi, None).await.unwrap();
    worker(&env, WorkerType::Poi, Arc::new(ScriptedSource::new(four_pois())))
        .run(&CancellationToken::new())
        .await
        .unwrap();
    let before: HashSet<String> = env
        .ctx
        .geo_records()
        .list(RecordKind::Poi, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.serial)
        .collect();

    env.registry.start(WorkerType::Poi, None).await.unwrap();
    let outcome = worker(&env, WorkerType::Poi, Arc::new(ScriptedSource::new(four_pois())))
        .run(&CancellationToken::new())
        .await
        .unwrap();
    let CrawlOutcome::Completed { run_id } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };

    let run = env.ctx.crawl_runs().get(run_id).await.unwrap().unwrap();
    assert_eq!(run.counters.items_saved, 0);
    assert_eq!(run.counters.items_updated, 4);
    let after: HashSet<String> = env
        .ctx
        .geo_records()
        .list(RecordKind::Poi, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.serial)
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn interrupted_crawl_resumes_from_checkpoint() {
    let env = env().await;
    env.registry.start(WorkerType::Poi, None).await.unwrap();

    let token = CancellationToken::new();
    let first = Arc::new(ScriptedSource::new(four_pois()).cancel_after(1, token.clone()));
    let outcome = worker(&env, WorkerType::Poi, first.clone())
        .run(&token)
        .await
        .unwrap();
    let CrawlOutcome::Interrupted { run_id } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };
    assert_eq!(first.fetched(), vec![0, 1]);
    let run = env.ctx.crawl_runs().get(run_id).await.unwrap().unwrap();
    assert_eq!(run.current_cell, 2);
    assert_eq!(run.status, RunStatus::Running);

    let second = Arc::new(ScriptedSource::new(four_pois()));
    let outcome = worker(&env, WorkerType::Poi, second.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CrawlOutcome::Completed { run_id });
    assert_eq!(second.fetched(), vec![2, 3]);
    assert_eq!(env.ctx.geo_records().count(RecordKind::Poi).await.unwrap(), 4);
}

#[tokio::test]
async fn rate_limit_pauses_row_and_run() {
    let env = env().await;
    env.registry.start(WorkerType::Heights, None).await.unwrap();

    let replies = vec![
        Reply::Elements(Vec::new()),
        Reply::RateLimited,
        Reply::Elements(Vec::new()),
    ];
    let source = Arc::new(ScriptedSource::new(replies));
    let outcome = worker(&env, WorkerType::Heights, source.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    let CrawlOutcome::RateLimited { run_id, until } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };

    // Default cooldown outweighs the 60 second Retry-After
    assert!(until > Utc::now() + chrono::Duration::minutes(14));
    let row = env.registry.get(WorkerType::Heights).await.unwrap();
    assert_eq!(row.state, ScraperState::Paused);
    assert!(!row.auto_paused);
    assert_eq!(row.rate_limit_hits, 1);

    let run = env.ctx.crawl_runs().get(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Paused);
    assert_eq!(run.current_cell, 1);
    assert_eq!(source.fetched(), vec![0, 1]);
}

#[tokio::test]
async fn rate_limited_crawl_continues_after_cooldown() {
    let env = env().await;
    env.registry.start(WorkerType::Heights, None).await.unwrap();

    let replies = vec![
        Reply::Elements(Vec::new()),
        Reply::RateLimited,
        Reply::Elements(Vec::new()),
    ];
    let outcome = worker(&env, WorkerType::Heights, Arc::new(ScriptedSource::new(replies)))
        .run(&CancellationToken::new())
        .await
        .unwrap();
    let CrawlOutcome::RateLimited { run_id, .. } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };

    // Still cooling down: the worker leaves the paused row alone.
    let waiting = Arc::new(ScriptedSource::new(
        (0..3).map(|_| Reply::Elements(Vec::new())).collect(),
    ));
    let outcome = worker(&env, WorkerType::Heights, waiting.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CrawlOutcome::NotRunning);
    assert!(waiting.fetched().is_empty());

    let repo = env.ctx.scraper_status();
    let mut row = repo.get(WorkerType::Heights).await.unwrap().unwrap();
    row.cooldown_until = Some(Utc::now() - chrono::Duration::seconds(1));
    assert!(repo.save_if_state(&row, ScraperState::Paused).await.unwrap());

    let row = env.registry.get(WorkerType::Heights).await.unwrap();
    assert!(row.cooldown_elapsed_at(Utc::now()));
    env.registry.resume(WorkerType::Heights).await.unwrap();

    let source = Arc::new(ScriptedSource::new(
        (0..3).map(|_| Reply::Elements(Vec::new())).collect(),
    ));
    let outcome = worker(&env, WorkerType::Heights, source.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CrawlOutcome::Completed { run_id });
    assert_eq!(source.fetched(), vec![1, 2]);

    let run = env.ctx.crawl_runs().get(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.current_cell, 3);
    let row = env.registry.get(WorkerType::Heights).await.unwrap();
    assert_eq!(row.state, ScraperState::Completed);
    assert!(row.cooldown_until.is_none());
}

#[tokio::test]
async fn nearby_crossings_collapse() {
    let env = env().await;
    env.registry.start(WorkerType::Crossings, None).await.unwrap();

    let crossing = |id: &str, lat: f64| {
        RawElement::new(ElementType::Node, id, lat, -97.5164).tag("railway", "level_crossing")
    };
    let replies = vec![
        Reply::Elements(vec![
            crossing("2", 35.4677),
            crossing("1", 35.4676),
            crossing("9", 35.5676),
        ]),
        Reply::Elements(vec![crossing("1", 35.4676), crossing("3", 35.4675)]),
    ];
    let outcome = worker(&env, WorkerType::Crossings, Arc::new(ScriptedSource::new(replies)))
        .run(&CancellationToken::new())
        .await
        .unwrap();
    let CrawlOutcome::Completed { run_id } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };

    let records = env.ctx.geo_records();
    assert_eq!(records.count(RecordKind::Crossing).await.unwrap(), 2);
    assert!(records
        .get_by_external_id(RecordKind::Crossing, "node/1")
        .await
        .unwrap()
        .is_some());
    assert!(records
        .get_by_external_id(RecordKind::Crossing, "node/2")
        .await
        .unwrap()
        .is_none());

    let run = env.ctx.crawl_runs().get(run_id).await.unwrap().unwrap();
    assert_eq!(run.counters.items_rejected, 2);
    assert_eq!(run.counters.items_saved, 2);
    assert_eq!(run.counters.items_updated, 1);
}

#[tokio::test]
async fn repeated_cell_failures_fail_the_run() {
    let env = env().await;
    env.registry.start(WorkerType::Weights, None).await.unwrap();

    let source = Arc::new(ScriptedSource::new(
        (0..6).map(|_| Reply::Transient).collect(),
    ));
    let options = WorkerOptions {
        max_consecutive_failures: 2,
        ..WorkerOptions::from(&env.settings)
    };
    let result = CrawlWorker::new(WorkerType::Weights, &env.settings, &env.ctx)
        .unwrap()
        .with_source(source.clone())
        .with_options(options)
        .run(&CancellationToken::new())
        .await;
    assert!(matches!(result, Err(CrawlError::TooManyFailures(3, _))));
    assert_eq!(source.fetched(), vec![0, 1, 2]);

    let row = env.registry.get(WorkerType::Weights).await.unwrap();
    assert_eq!(row.state, ScraperState::Failed);
    assert!(row.last_error.is_some());

    let runs = env
        .ctx
        .crawl_runs()
        .list(Some(WorkerType::Weights), 5)
        .await
        .unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].counters.errors, 3);
}

#[tokio::test]
async fn idle_row_is_left_alone() {
    let env = env().await;
    let source = Arc::new(ScriptedSource::new(four_pois()));
    let outcome = worker(&env, WorkerType::Poi, source.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CrawlOutcome::NotRunning);
    assert!(source.fetched().is_empty());
}
