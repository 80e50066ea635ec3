//! Shared helpers for CLI commands.

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;

use geocrawl::config::Settings;
use geocrawl::grid::resolve_regions;
use geocrawl::models::{CrawlScope, WorkerType};
use geocrawl::queue::CrawlQueueManager;
use geocrawl::registry::StatusRegistry;
use geocrawl::repository::DbContext;
use geocrawl_scrape::domains::domain_for;

/// Database handles every command past `init` needs.
pub struct Handles {
    pub ctx: DbContext,
    pub registry: StatusRegistry,
}

impl Handles {
    pub fn queue(&self, settings: &Settings) -> anyhow::Result<CrawlQueueManager> {
        Ok(CrawlQueueManager::new(
            self.registry.clone(),
            self.ctx.crawl_runs(),
            self.ctx.request_queue(),
            settings.tiler()?,
        ))
    }
}

/// Open an initialized database and make sure every worker has a row.
pub async fn open(settings: &Settings) -> anyhow::Result<Handles> {
    if !settings.database_exists() {
        bail!(
            "No database at {}. Run 'geocrawl init' first.",
            settings.database_path().display()
        );
    }

    let ctx = settings.create_db_context();
    let registry = StatusRegistry::new(ctx.scraper_status(), settings.stale_threshold());
    registry.ensure_all().await?;
    Ok(Handles { ctx, registry })
}

/// Build a scope, rejecting categories the worker does not know and unknown
/// state codes.
pub fn build_scope(
    worker: WorkerType,
    categories: Vec<String>,
    states: Vec<String>,
) -> anyhow::Result<CrawlScope> {
    let scope = CrawlScope::new(categories, states);

    let known = domain_for(worker).categories();
    if let Some(unknown) = scope
        .categories
        .iter()
        .find(|c| !known.contains(&c.as_str()))
    {
        bail!(
            "Unknown category '{}' for {} (expected one of: {})",
            unknown,
            worker,
            known.join(", ")
        );
    }

    resolve_regions(&scope.states).context("Invalid --states")?;
    Ok(scope)
}

/// Token cancelled on Ctrl-C or SIGTERM.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
