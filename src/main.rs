use anyhow::Result;
use awaywatch::config::load_config;
use awaywatch::harness::{HarnessOptions, run_harness};
use awaywatch::pipeline::{RunContext, RunOptions, run};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "awaywatch", about = "Away ticket sales phase watcher")]
struct Cli {
    #[arg(long, default_value = "configs/awaywatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scrape the listing and every away fixture, notifying on new phases.
    Scrape {
        /// Notify even for sales phases that were already notified.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    Validate,
    Harness,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape { force } => {
            let loaded = load_config(&cli.config)?;
            let ctx = RunContext::from_config(&loaded)?;
            let report = run(
                &ctx,
                &RunOptions {
                    force_notify: force,
                    ..RunOptions::new(Utc::now())
                },
            )?;
            info!(
                fixtures = report.fixtures_discovered,
                new_phases = report.new_phases,
                notified = report.notifications_sent,
                "scrape complete"
            );
        }
        Commands::Validate => {
            let loaded = load_config(&cli.config)?;
            let config = &loaded.config;
            println!("OK {}", loaded.path.display());
            println!("listing {}", config.listing_url()?);
            println!("timezone {}", config.site.timezone()?);
            println!(
                "state {}",
                loaded.resolve(&config.store.state_path)?.display()
            );
            println!(
                "notify enabled={} channels={} recipients={}",
                config.notify.enabled,
                config.notify.channels.join(","),
                config.notify.recipients.len()
            );
        }
        Commands::Harness => {
            let report = run_harness(&HarnessOptions {
                config_path: cli.config,
                now: Utc::now(),
            })?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
