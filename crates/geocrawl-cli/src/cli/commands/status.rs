//! Status, queue and run listings.

use chrono::{DateTime, Duration, Utc};
use console::style;

use geocrawl::config::Settings;
use geocrawl::models::{CrawlRun, CrawlScope, ScraperStatus, WorkerType};
use geocrawl::queue::MANUAL_WORKER;
use geocrawl::supervisor::age;

use super::helpers::open;
use crate::cli::icons;

/// Show status rows with derived health.
pub async fn cmd_status(
    settings: &Settings,
    worker: Option<WorkerType>,
    json: bool,
) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    let statuses = match worker {
        Some(worker) => vec![handles.registry.get(worker).await?],
        None => handles.registry.all().await?,
    };

    let now = Utc::now();
    if json {
        let reports: Vec<_> = statuses
            .iter()
            .map(|s| handles.registry.health_of(s, now))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!(
        "{:<12} {:<10} {:<9} {:>11} {:>8} {:>8} {:>7}  {}",
        "WORKER", "STATE", "HEALTH", "CELLS", "SAVED", "UPDATED", "ERRORS", "LAST ACTIVITY"
    );
    for status in &statuses {
        let report = handles.registry.health_of(status, now);
        let mut activity = age(report.last_activity, now);
        if report.stale {
            activity = format!("{} (stale)", activity);
        }
        if !status.enabled {
            activity = format!("{} [disabled]", activity);
        }
        println!(
            "{:<12} {:<10} {:<9} {:>11} {:>8} {:>8} {:>7}  {}",
            status.scraper_type.as_str(),
            icons::state(status.state),
            icons::health(report.health),
            format!("{}/{}", status.current_cell, status.total_cells),
            status.items_saved,
            status.items_updated,
            status.consecutive_errors,
            activity,
        );
    }

    if let [status] = statuses.as_slice() {
        print_detail(status, now);
    }
    Ok(())
}

fn print_detail(status: &ScraperStatus, now: DateTime<Utc>) {
    println!();
    if let Some(ref activity) = status.current_activity {
        println!("{:<18} {}", "Activity:", activity);
    }
    if let Some(ref detail) = status.activity_detail {
        println!("{:<18} {}", "Detail:", detail);
    }
    if let Some(run_id) = status.run_id {
        println!("{:<18} {}", "Run:", run_id);
    }
    let scope = CrawlScope::from_config(&status.config);
    println!("{:<18} {}", "Scope:", describe_scope(&scope));
    if let Some(until) = status.cooldown_until.filter(|u| *u > now) {
        println!(
            "{:<18} {} (rate limit hits: {})",
            "Cooling down until:",
            until.format("%Y-%m-%d %H:%M:%S UTC"),
            status.rate_limit_hits
        );
    }
    if let Some(ref error) = status.last_error {
        println!(
            "{:<18} {} ({} ago)",
            "Last error:",
            style(error).red(),
            age(status.last_error_at, now)
        );
    }
    println!(
        "{:<18} {}/{} successful, {} saved lifetime",
        "Runs:", status.successful_runs, status.total_runs, status.lifetime_items_saved
    );
    if status.restart_count > 0 {
        println!(
            "{:<18} {} (last {} ago)",
            "Restarts:",
            status.restart_count,
            age(status.last_restart_at, now)
        );
    }
    if let Some(ref host) = status.host {
        println!("{:<18} {}", "Host:", host);
    }
}

fn describe_scope(scope: &CrawlScope) -> String {
    let categories = if scope.categories.is_empty() {
        "all categories".to_string()
    } else {
        scope.categories.join(", ")
    };
    let states = if scope.states.is_empty() {
        "all states".to_string()
    } else {
        scope.states.join(", ")
    };
    format!("{} in {}", categories, states)
}

/// Show manual crawl requests waiting in the queue.
pub async fn cmd_queue(settings: &Settings) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    let queue = handles.queue(settings)?;
    let pending = queue.pending().await?;

    let manual = handles.registry.get(MANUAL_WORKER).await?;
    println!(
        "{} Manual worker is {}",
        icons::info(),
        icons::state(manual.state)
    );

    if pending.is_empty() {
        println!("{} No queued requests", icons::success());
        return Ok(());
    }

    let now = Utc::now();
    for (position, request) in pending.iter().enumerate() {
        println!(
            "  {:>3}. #{:<5} {} (waiting {})",
            position + 1,
            request.id,
            describe_scope(&request.scope),
            age(Some(request.requested_at), now)
        );
    }
    Ok(())
}

/// List recent runs with progress and a rough ETA.
pub async fn cmd_runs(
    settings: &Settings,
    worker: Option<WorkerType>,
    limit: i64,
) -> anyhow::Result<()> {
    let handles = open(settings).await?;
    let runs = handles.ctx.crawl_runs().list(worker, limit).await?;
    if runs.is_empty() {
        println!("{} No crawl runs yet", icons::warn());
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:>5} {:<12} {:<9} {:<10} {:>13} {:>8} {:>8} {:>8}  {}",
        "ID", "WORKER", "KIND", "STATUS", "PROGRESS", "SAVED", "UPDATED", "REJECTED", "ETA"
    );
    for run in &runs {
        println!(
            "{:>5} {:<12} {:<9} {:<10} {:>13} {:>8} {:>8} {:>8}  {}",
            run.id,
            run.scraper_type.as_str(),
            run.kind.as_str(),
            icons::run_status(run.status),
            progress(run),
            run.counters.items_saved,
            run.counters.items_updated,
            run.counters.items_rejected,
            eta(run, now),
        );
        if let Some(ref error) = run.last_error {
            println!("      {} {}", icons::error(), style(error).dim());
        }
    }
    Ok(())
}

fn progress(run: &CrawlRun) -> String {
    format!(
        "{}/{} {:>3.0}%",
        run.current_cell,
        run.total_cells,
        run.fraction_done() * 100.0
    )
}

fn eta(run: &CrawlRun, now: DateTime<Utc>) -> String {
    match run.eta_at(now) {
        Some(remaining) => format_duration(remaining),
        None if run.status.is_terminal() => "-".to_string(),
        None => "unknown".to_string(),
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_scope() {
        assert_eq!(
            describe_scope(&CrawlScope::default()),
            "all categories in all states"
        );
        let scope = CrawlScope::new(vec!["truck_stop".into()], vec!["ia".into(), "ne".into()]);
        assert_eq!(describe_scope(&scope), "truck_stop in IA, NE");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(75)), "1m15s");
        assert_eq!(format_duration(Duration::seconds(3 * 3600 + 5 * 60)), "3h05m");
        assert_eq!(format_duration(Duration::seconds(-4)), "0m00s");
    }
}
