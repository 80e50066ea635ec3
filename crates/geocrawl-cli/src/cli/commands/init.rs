//! Initialize command.

use console::style;

use geocrawl::config::Settings;
use geocrawl::models::WorkerType;
use geocrawl::registry::StatusRegistry;

use crate::cli::icons;

/// Initialize the data directory, run migrations and seed status rows.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    println!("{} Running migrations...", icons::info());
    let ctx = settings.create_db_context();
    let applied = ctx.migrate().await?;
    for name in &applied {
        println!("  {} {}", icons::success(), name);
    }

    let registry = StatusRegistry::new(ctx.scraper_status(), settings.stale_threshold());
    registry.ensure_all().await?;

    println!("\n{}", style("Services").bold());
    for (service, members) in settings.service_groups() {
        let names: Vec<&str> = members.iter().map(WorkerType::as_str).collect();
        println!("  {:<28} {}", service, names.join(", "));
    }

    println!(
        "\n{} Initialized geocrawl in {}",
        icons::success(),
        settings.data_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_data_dir(dir.path().join("data"));

        cmd_init(&settings).await.unwrap();
        cmd_init(&settings).await.unwrap();

        assert!(settings.database_exists());
        let handles = super::super::helpers::open(&settings).await.unwrap();
        assert_eq!(handles.registry.all().await.unwrap().len(), WorkerType::ALL.len());
    }
}
