//! Site watcher CLI
//!
//! Local execution entry point for the periodic watcher and one-off passes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use watcher::{
    config::load_config,
    error::Result,
    models::Website,
    pipeline,
    storage::{LocalStorage, SnapshotStore},
};

/// Site watcher - page change monitor
#[derive(Parser, Debug)]
#[command(
    name = "watcher",
    version,
    about = "Watches web pages for content changes"
)]
struct Cli {
    /// Storage directory (overrides storage.root_dir)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Path to config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a cycle on every interval until interrupted
    Watch,

    /// Run a single cycle over all registered sites
    Once,

    /// Run the registration pass (snapshot and capture) for one site
    Capture {
        /// Website id from sites.json
        site_id: String,
    },

    /// Register sites from a JSON file and run their first pass
    Register {
        /// JSON array of `{id, url, xpathExpression}` objects
        file: PathBuf,
    },

    /// Validate configuration
    Validate,

    /// Show registered sites and their latest snapshot
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn preview(content: &str) -> String {
    const MAX: usize = 60;
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > MAX {
        format!("{}...", line.chars().take(MAX).collect::<String>())
    } else {
        line.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let base_dir = cli
        .storage_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("storage"));
    let config_path = cli.config.unwrap_or_else(|| base_dir.join("config.toml"));

    let mut config = load_config(&config_path)?;
    if let Some(dir) = cli.storage_dir {
        config.storage.root_dir = dir;
    }

    log::info!(
        "Using storage at {} (config {})",
        config.storage.root_dir.display(),
        config_path.display()
    );

    let storage = Arc::new(LocalStorage::with_container(
        config.storage.root_dir.clone(),
        config.storage.artifact_container.clone(),
    ));

    match cli.command {
        Command::Watch => {
            let stats = pipeline::run_watch(&config, storage, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await?;

            log::info!(
                "Watcher stopped after {} cycles ({} ticks skipped)",
                stats.cycles_started,
                stats.ticks_skipped
            );
        }

        Command::Once => {
            let report = pipeline::run_once(&config, storage).await?;
            for site in &report.sites {
                log::info!("{}: {:?}", site.website_id, site.outcome);
            }
        }

        Command::Capture { site_id } => {
            pipeline::run_capture(&config, storage, &site_id).await?;
            log::info!("Registration pass for {} complete", site_id);
        }

        Command::Register { file } => {
            let websites = Website::load_all(&file)?;
            log::info!("Loaded {} sites from {}", websites.len(), file.display());

            let handled = pipeline::register_sites(&config, storage, websites).await?;
            log::info!("{} sites registered and captured", handled);
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            config.validate()?;
            log::info!("✓ Config OK");

            let sites = storage.load_websites().await?;
            let without_selector = sites.iter().filter(|s| s.selector().is_none()).count();
            log::info!("✓ {} sites registered", sites.len());
            if without_selector > 0 {
                log::warn!("{} sites have no XPath expression", without_selector);
            }
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage.root_dir().display());

            let sites = storage.load_websites().await?;
            if sites.is_empty() {
                log::info!("No sites registered yet.");
            }

            for site in &sites {
                let history = storage.history(&site.id).await?;
                match history.last() {
                    Some(latest) => log::info!(
                        "{} {} - {} snapshots, latest {}: {}",
                        site.id,
                        site.url,
                        history.len(),
                        latest.timestamp.to_rfc3339(),
                        preview(&latest.content)
                    ),
                    None => log::info!("{} {} - no snapshots", site.id, site.url),
                }
            }
        }
    }

    Ok(())
}
