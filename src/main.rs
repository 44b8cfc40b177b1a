use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

use tabulator::daemon;
use tabulator::metrics::RecordedMetrics;
use tabulator::path::{tab_state_path, test_group_path};
use tabulator::snapshot;
use tabulator::storage::{ContentStore, FsStore};

/// Route `log` and `tracing` output to stderr.
///
/// `RUST_LOG` wins when set; otherwise the level comes from the config file,
/// raised to debug by `--verbose`.
fn setup_logging(cli: &Cli, config: &Config) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env().init();
        return Ok(());
    }

    let level = if cli.is_verbose() {
        LevelFilter::Debug
    } else {
        match &config.log_level {
            Some(level) => level.parse().context("Invalid log_level")?,
            None => LevelFilter::Info,
        }
    };
    env_logger::Builder::new().filter_level(level).init();
    Ok(())
}

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_tabulator(config, false).await,
        Commands::Once => run_tabulator(config, true).await,
        Commands::Validate => validate_config(&config).await,
    }
}

async fn run_tabulator(config: Config, once: bool) -> Result<()> {
    let store: Arc<dyn ContentStore> = Arc::new(FsStore::new(&config.storage.root));
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            interrupt.cancel();
        }
    });

    let mut options = config.update_options()?;
    if once {
        options.cadence = Duration::ZERO;
    }
    if options.cadence.is_zero() {
        info!("Running {} workers for a single pass", options.concurrency);
    } else {
        info!(
            "Running {} workers, refreshing each dashboard every {}s",
            options.concurrency,
            options.cadence.as_secs()
        );
    }
    if !options.pipeline.confirm {
        println!("{}", "--confirm not set (DRY-RUN): will not write tab state".yellow());
    }

    info!(
        "Observing {} from {}",
        options.pipeline.config_path,
        config.storage.root.display()
    );
    let snapshots = snapshot::observe(
        Arc::clone(&store),
        options.pipeline.config_path.clone(),
        config.config_poll(),
        cancel.clone(),
    )
    .await
    .context("Failed to read dashboard configuration")?;

    let recorded = RecordedMetrics::new();
    let result = daemon::update(store, snapshots, recorded.metrics(), options, Vec::new(), cancel.clone()).await;
    cancel.cancel();

    info!("Metrics: {}", serde_json::to_string(&recorded.summary())?);
    result.context("Tabulator failed")
}

async fn validate_config(config: &Config) -> Result<()> {
    let store = FsStore::new(&config.storage.root);
    let config_path = config.config_gcs_path()?;
    let snap = snapshot::read_snapshot(&store, &config_path)
        .await
        .context(format!("Failed to read {}", config_path))?;

    println!("{} {} ({} dashboards)", "Config:".green(), config_path, snap.len());
    let active = snap.active_dashboards(&config.dashboards);
    for name in &active {
        let Some(dashboard) = snap.dashboard(name) else {
            continue;
        };
        println!("  {}", dashboard.name.cyan());
        for tab in &dashboard.tabs {
            let from = test_group_path(&config_path, &config.grid_prefix, &tab.test_group_name)?;
            let to = tab_state_path(&config_path, &config.tabs_prefix, &dashboard.name, &tab.name)?;
            println!("    {} {} -> {}", tab.name, from, to);
        }
    }
    println!("{} {} active dashboards", "OK:".green(), active.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let overrides = cli.overrides();
    config.apply_overrides(&overrides);

    setup_logging(&cli, &config).context("Failed to setup logging")?;
    if !overrides.is_empty() {
        log::debug!("Command line overrides: {}", serde_yaml::to_string(&overrides)?.trim());
    }
    config.validate().context("Invalid configuration")?;

    info!("Starting tabulator");
    run_application(&cli, config).await
}
