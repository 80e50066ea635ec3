//! Long-running commands: the worker process and the supervisor.

use std::sync::Arc;

use anyhow::bail;
use console::style;

use geocrawl::config::Settings;
use geocrawl::models::WorkerType;
use geocrawl::supervisor::{Supervisor, SystemctlController};
use geocrawl_scrape::run_service;

use super::helpers::{open, shutdown_token};
use crate::cli::icons;

/// Host the workers of one service until they go idle or a signal arrives.
pub async fn cmd_worker(settings: &Settings, service: &str) -> anyhow::Result<()> {
    let members = settings.workers_for_service(service);
    if members.is_empty() {
        let known: Vec<String> = settings.service_groups().into_keys().collect();
        bail!(
            "No workers are hosted by '{}' (configured services: {})",
            service,
            known.join(", ")
        );
    }

    let handles = open(settings).await?;
    let names: Vec<&str> = members.iter().map(WorkerType::as_str).collect();
    println!(
        "{} {} hosting {}",
        icons::info(),
        style(service).bold(),
        names.join(", ")
    );

    let cancel = shutdown_token();
    let sessions = run_service(service, settings, &handles.ctx, &cancel).await?;

    println!(
        "{} {} finished after {} session(s)",
        icons::success(),
        service,
        sessions
    );
    Ok(())
}

/// Supervise every configured service until interrupted.
pub async fn cmd_supervise(settings: &Settings, user: bool) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    let controller = SystemctlController::new(user)?;
    let groups = settings.service_groups();

    println!(
        "{} Supervising {} service(s) every {}s",
        icons::info(),
        groups.len(),
        settings.poll_interval().as_secs()
    );

    let supervisor = Supervisor::new(
        handles.registry.clone(),
        handles.queue(settings)?,
        Arc::new(controller),
        groups,
        settings.poll_interval(),
    );
    supervisor.run(shutdown_token()).await?;

    println!("{} Supervisor stopped", icons::success());
    Ok(())
}
