//! Commands that change worker state.

use anyhow::bail;
use serde_json::{Map, Value};

use geocrawl::config::Settings;
use geocrawl::models::WorkerType;
use geocrawl::queue::{ManualOutcome, MANUAL_WORKER};

use super::helpers::{build_scope, open};
use crate::cli::icons;

/// Layer `--config-json` and the scope flags over the row's current payload.
fn merge_payload(
    current: &Value,
    config_json: Option<&str>,
    scope: Value,
) -> anyhow::Result<Value> {
    let mut payload = match current {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    if let Some(raw) = config_json {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(extra) => payload.extend(extra),
            _ => bail!("--config-json must be a JSON object"),
        }
    }

    if let Value::Object(scope) = scope {
        payload.extend(scope);
    }
    Ok(Value::Object(payload))
}

/// Mark a worker running. Its service does the crawling.
pub async fn cmd_start(
    settings: &Settings,
    worker: WorkerType,
    categories: Vec<String>,
    states: Vec<String>,
    config_json: Option<&str>,
) -> anyhow::Result<()> {
    if worker.is_manual() {
        bail!("{} only runs queued requests; use 'geocrawl crawl-manual'", worker);
    }

    let handles = open(settings).await?;
    let scope = build_scope(worker, categories, states)?;
    let current = handles.registry.get(worker).await?;
    let payload = merge_payload(&current.config, config_json, scope.to_config())?;

    let status = handles.registry.start(worker, Some(payload)).await?;
    println!(
        "{} {} is {} ({} via {})",
        icons::success(),
        worker,
        icons::state(status.state),
        scope.kind().as_str(),
        settings.service_for(worker)
    );
    Ok(())
}

/// Stop a worker and close its open runs.
pub async fn cmd_stop(settings: &Settings, worker: WorkerType) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    let status = handles.registry.stop(worker).await?;
    let stopped = handles.ctx.crawl_runs().stop_all_for(worker).await?;
    println!(
        "{} {} is {}, {} run(s) stopped",
        icons::success(),
        worker,
        icons::state(status.state),
        stopped
    );
    Ok(())
}

/// Force a worker's row back to idle, clearing session counters.
pub async fn cmd_reset(settings: &Settings, worker: WorkerType) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    handles.registry.reset(worker).await?;
    let stopped = handles.ctx.crawl_runs().stop_all_for(worker).await?;
    println!("{} {} reset to idle", icons::success(), worker);
    if stopped > 0 {
        println!("  {} {} open run(s) stopped", icons::warn(), stopped);
    }
    Ok(())
}

pub async fn cmd_set_enabled(
    settings: &Settings,
    worker: WorkerType,
    enabled: bool,
) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    handles.registry.set_enabled(worker, enabled).await?;
    let verb = if enabled { "enabled" } else { "disabled" };
    println!("{} {} {}", icons::success(), worker, verb);
    Ok(())
}

/// Submit a manual crawl; it starts now or waits behind the active one.
pub async fn cmd_crawl_manual(
    settings: &Settings,
    categories: Vec<String>,
    states: Vec<String>,
) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    let scope = build_scope(MANUAL_WORKER, categories, states)?;

    match handles.queue(settings)?.request_manual(scope).await? {
        ManualOutcome::Started { run_id } => {
            println!(
                "{} Manual crawl started as run {}; the automatic crawl is paused",
                icons::success(),
                run_id
            );
        }
        ManualOutcome::Queued {
            request_id,
            position,
        } => {
            println!(
                "{} Manual crawl queued as request {} (position {})",
                icons::info(),
                request_id,
                position
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocrawl::models::{CrawlScope, ScraperState};
    use serde_json::json;

    #[test]
    fn test_merge_payload_layers() {
        let current = json!({"base_url": "https://a.example", "states": ["TX"]});
        let scope = CrawlScope::new(vec![], vec!["ia".into()]).to_config();
        let merged = merge_payload(&current, Some(r#"{"username": "ops"}"#), scope).unwrap();
        assert_eq!(merged["base_url"], "https://a.example");
        assert_eq!(merged["username"], "ops");
        assert_eq!(merged["states"], json!(["IA"]));
        assert_eq!(merged["categories"], json!([]));
    }

    #[test]
    fn test_merge_payload_rejects_non_objects() {
        assert!(merge_payload(&Value::Null, Some("[1, 2]"), json!({})).is_err());
        assert!(merge_payload(&Value::Null, Some("{oops"), json!({})).is_err());
    }

    async fn initialized() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_data_dir(dir.path().to_path_buf());
        super::super::init::cmd_init(&settings).await.unwrap();
        (dir, settings)
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (_dir, settings) = initialized().await;

        cmd_start(&settings, WorkerType::Heights, vec![], vec!["ne".into()], None)
            .await
            .unwrap();
        let handles = open(&settings).await.unwrap();
        let row = handles.registry.get(WorkerType::Heights).await.unwrap();
        assert_eq!(row.state, ScraperState::Running);
        assert_eq!(CrawlScope::from_config(&row.config).states, vec!["NE"]);

        cmd_stop(&settings, WorkerType::Heights).await.unwrap();
        let row = handles.registry.get(WorkerType::Heights).await.unwrap();
        assert_eq!(row.state, ScraperState::Idle);
    }

    #[tokio::test]
    async fn test_disabled_worker_cannot_start() {
        let (_dir, settings) = initialized().await;
        cmd_set_enabled(&settings, WorkerType::Weights, false)
            .await
            .unwrap();
        assert!(cmd_start(&settings, WorkerType::Weights, vec![], vec![], None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_manual_requests_queue_behind_each_other() {
        let (_dir, settings) = initialized().await;
        assert!(cmd_start(&settings, MANUAL_WORKER, vec![], vec![], None)
            .await
            .is_err());

        cmd_crawl_manual(&settings, vec!["truck_stop".into()], vec!["IA".into()])
            .await
            .unwrap();
        cmd_crawl_manual(&settings, vec![], vec!["NE".into()])
            .await
            .unwrap();

        let handles = open(&settings).await.unwrap();
        let manual = handles.registry.get(MANUAL_WORKER).await.unwrap();
        assert_eq!(manual.state, ScraperState::Running);
        let pending = handles.queue(&settings).unwrap().pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].scope.states, vec!["NE"]);
    }
}
