//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: keep tab state fresh until interrupted (default)
//! - once: tabulate every dashboard a single time
//! - validate: check the service and dashboard configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// Tabulator - keeps dashboard tab state fresh from test group grids
#[derive(Parser, Debug)]
#[command(name = "tabulator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// gs:// path of the dashboard configuration
    #[arg(long, global = true)]
    pub config_path: Option<String>,

    /// Number of dashboards to tabulate concurrently
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Prefix of test group grid state, relative to the configuration
    #[arg(long, global = true)]
    pub grid_prefix: Option<String>,

    /// Prefix of tab state, relative to the configuration
    #[arg(long, global = true)]
    pub tabs_prefix: Option<String>,

    /// Only update these dashboards (comma separated)
    #[arg(long, global = true, value_delimiter = ',')]
    pub dashboards: Vec<String>,

    /// Write tab state; otherwise only log what would be written
    #[arg(long, global = true)]
    pub confirm: bool,

    /// Filter grid rows using each tab's options
    #[arg(long, global = true)]
    pub filter: bool,

    /// Seconds between runs of one dashboard; 0 runs once
    #[arg(long, global = true)]
    pub refresh_secs: Option<u64>,

    /// Local directory standing in for the object store
    #[arg(long, global = true)]
    pub storage_root: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Config values set on the command line. Switches only ever turn on.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config_path.clone(),
            concurrency: self.concurrency,
            grid_prefix: self.grid_prefix.clone(),
            tabs_prefix: self.tabs_prefix.clone(),
            dashboards: (!self.dashboards.is_empty()).then(|| self.dashboards.clone()),
            confirm: self.confirm.then_some(true),
            filter: self.filter.then_some(true),
            refresh_secs: self.refresh_secs,
            storage_root: self.storage_root.clone(),
        }
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Keep tab state fresh until interrupted
    Run,
    /// Tabulate every active dashboard once and exit
    Once,
    /// Load the configuration and list what would be tabulated
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["tabulator"]);
        assert!(cli.command.is_none());
        assert!(cli.overrides().is_empty());
    }

    #[test]
    fn test_flags_become_overrides() {
        let cli = Cli::parse_from([
            "tabulator",
            "once",
            "--config-path",
            "gs://bucket/config",
            "--dashboards",
            "a,b",
            "--confirm",
            "--refresh-secs",
            "0",
        ]);
        assert_eq!(cli.command, Some(Commands::Once));
        let overrides = cli.overrides();
        assert_eq!(overrides.config_path.as_deref(), Some("gs://bucket/config"));
        assert_eq!(overrides.dashboards, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(overrides.confirm, Some(true));
        assert_eq!(overrides.filter, None);
        assert_eq!(overrides.refresh_secs, Some(0));
    }

    #[test]
    fn test_global_flags_before_subcommand() {
        let cli = Cli::parse_from(["tabulator", "-v", "--concurrency", "2", "validate"]);
        assert!(cli.is_verbose());
        assert_eq!(cli.concurrency, Some(2));
        assert_eq!(cli.command, Some(Commands::Validate));
    }
}
