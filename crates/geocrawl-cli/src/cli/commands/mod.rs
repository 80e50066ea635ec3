//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod control;
mod helpers;
mod init;
mod status;
mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use geocrawl::config::{load_settings_with_options, LoadOptions};
use geocrawl::models::WorkerType;

#[derive(Parser)]
#[command(name = "geocrawl")]
#[command(about = "Distributed crawl orchestration and geospatial ingestion")]
#[command(version)]
pub struct Cli {
    /// Data directory or database file (overrides config file).
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check for the verbose flag before clap runs, so logging is set up first.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

fn parse_worker(s: &str) -> Result<WorkerType, String> {
    WorkerType::from_str(s).ok_or_else(|| {
        let known: Vec<&str> = WorkerType::ALL.iter().map(|w| w.as_str()).collect();
        format!("unknown worker '{}' (expected one of: {})", s, known.join(", "))
    })
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory, database and status rows
    Init,

    /// Show worker status and health
    Status {
        /// Only this worker
        #[arg(value_parser = parse_worker)]
        worker: Option<WorkerType>,

        /// Print health reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark a worker as running so its service picks it up
    Start {
        #[arg(value_parser = parse_worker)]
        worker: WorkerType,

        /// Categories to crawl (comma-separated, default all)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,

        /// State codes to crawl (comma-separated, default all)
        #[arg(long, value_delimiter = ',')]
        states: Vec<String>,

        /// Extra configuration payload as a JSON object
        #[arg(long)]
        config_json: Option<String>,
    },

    /// Stop a worker and its active runs
    Stop {
        #[arg(value_parser = parse_worker)]
        worker: WorkerType,
    },

    /// Reset a worker's status row to idle
    Reset {
        #[arg(value_parser = parse_worker)]
        worker: WorkerType,
    },

    /// Allow the supervisor to manage a worker again
    Enable {
        #[arg(value_parser = parse_worker)]
        worker: WorkerType,
    },

    /// Keep the supervisor from restarting a worker
    Disable {
        #[arg(value_parser = parse_worker)]
        worker: WorkerType,
    },

    /// Request a selective points-of-interest crawl
    CrawlManual {
        /// Categories to crawl (comma-separated, default all)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,

        /// State codes to crawl (comma-separated, default all)
        #[arg(long, value_delimiter = ',')]
        states: Vec<String>,
    },

    /// Show queued manual crawl requests
    Queue,

    /// List recent crawl runs
    Runs {
        #[arg(value_parser = parse_worker)]
        worker: Option<WorkerType>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Run the workers hosted by a service until interrupted
    Worker {
        /// Service name (see `supervise` for the configured groups)
        service: String,
    },

    /// Watch status rows and start, restart or stop worker services
    Supervise {
        /// Use the per-user service manager
        #[arg(long)]
        user: bool,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Status { worker, json } => status::cmd_status(&settings, worker, json).await,
        Commands::Start {
            worker,
            categories,
            states,
            config_json,
        } => {
            control::cmd_start(&settings, worker, categories, states, config_json.as_deref()).await
        }
        Commands::Stop { worker } => control::cmd_stop(&settings, worker).await,
        Commands::Reset { worker } => control::cmd_reset(&settings, worker).await,
        Commands::Enable { worker } => control::cmd_set_enabled(&settings, worker, true).await,
        Commands::Disable { worker } => control::cmd_set_enabled(&settings, worker, false).await,
        Commands::CrawlManual { categories, states } => {
            control::cmd_crawl_manual(&settings, categories, states).await
        }
        Commands::Queue => status::cmd_queue(&settings).await,
        Commands::Runs { worker, limit } => status::cmd_runs(&settings, worker, limit).await,
        Commands::Worker { service } => worker::cmd_worker(&settings, &service).await,
        Commands::Supervise { user } => worker::cmd_supervise(&settings, user).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_names_parse() {
        assert_eq!(parse_worker("poi_manual"), Ok(WorkerType::PoiManual));
        assert_eq!(parse_worker("crossings"), Ok(WorkerType::Crossings));
        assert!(parse_worker("trains").unwrap_err().contains("heights"));
    }

    #[test]
    fn test_scope_lists_split_on_commas() {
        let cli = Cli::try_parse_from([
            "geocrawl",
            "crawl-manual",
            "--categories",
            "truck_stop,rest_area",
            "--states",
            "ia",
        ])
        .unwrap();
        match cli.command {
            Commands::CrawlManual { categories, states } => {
                assert_eq!(categories, vec!["truck_stop", "rest_area"]);
                assert_eq!(states, vec!["ia"]);
            }
            _ => panic!("expected crawl-manual"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["geocrawl", "status", "poi", "--json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Status {
                worker: Some(WorkerType::Poi),
                json: true
            }
        ));
    }
}
