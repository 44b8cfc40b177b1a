//! Service configuration for the tabulator binary.
//!
//! Loaded from the first of:
//! 1. The `--config` path, if given
//! 2. `~/.config/tabulator/tabulator.yml`
//! 3. `./tabulator.yml`
//!
//! Command-line flags are applied on top as `ConfigOverrides`.

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tabulator::daemon::UpdateOptions;
use tabulator::path::GcsPath;
use tabulator::pipeline::PipelineOptions;

pub use self::overrides::ConfigOverrides;

mod overrides;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// `gs://` location of the dashboard configuration
    pub config_path: String,
    /// Dashboards to keep fresh; empty means all
    pub dashboards: Vec<String>,
    /// Number of workers; must be set in the file or with `--concurrency`
    pub concurrency: Option<usize>,
    pub grid_prefix: String,
    pub tabs_prefix: String,
    /// Write tab state; without it every run is a dry run
    pub confirm: bool,
    /// Filter grid rows by tab options instead of copying
    pub filter: bool,
    /// Target seconds between runs of one dashboard; 0 runs once
    pub refresh_secs: u64,
    pub tick_secs: u64,
    pub config_poll_secs: u64,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            config_path: String::new(),
            dashboards: Vec::new(),
            concurrency: None,
            grid_prefix: "grid".to_string(),
            tabs_prefix: "tabs".to_string(),
            confirm: false,
            filter: false,
            refresh_secs: 300,
            tick_secs: 60,
            config_poll_secs: 60,
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local directory holding one subdirectory per bucket
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tabulator")
                .join("store"),
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        let mut candidates = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(project_name).join(format!("{}.yml", project_name)));
        }
        candidates.push(PathBuf::from(format!("{}.yml", project_name)));

        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from_file(&candidate)
                    .context(format!("Failed to load config from {}", candidate.display()));
            }
        }

        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.config_path {
            self.config_path = path.clone();
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = Some(concurrency);
        }
        if let Some(prefix) = &overrides.grid_prefix {
            self.grid_prefix = prefix.clone();
        }
        if let Some(prefix) = &overrides.tabs_prefix {
            self.tabs_prefix = prefix.clone();
        }
        if let Some(dashboards) = &overrides.dashboards {
            self.dashboards = dashboards.clone();
        }
        if let Some(confirm) = overrides.confirm {
            self.confirm = confirm;
        }
        if let Some(filter) = overrides.filter {
            self.filter = filter;
        }
        if let Some(secs) = overrides.refresh_secs {
            self.refresh_secs = secs;
        }
        if let Some(root) = &overrides.storage_root {
            self.storage.root = root.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.config_path.is_empty() {
            return Err(eyre!("config_path is required"));
        }
        self.config_gcs_path()?;
        let concurrency = self.concurrency()?;
        if concurrency < 1 {
            return Err(eyre!("concurrency must be positive, got: {}", concurrency));
        }
        if self.tick_secs == 0 {
            return Err(eyre!("tick_secs must be positive"));
        }
        if self.config_poll_secs == 0 {
            return Err(eyre!("config_poll_secs must be positive"));
        }
        if let Some(level) = &self.log_level {
            level
                .parse::<log::LevelFilter>()
                .map_err(|_| eyre!("unknown log_level: {}", level))?;
        }
        Ok(())
    }

    pub fn config_gcs_path(&self) -> Result<GcsPath> {
        GcsPath::parse(&self.config_path).context("Failed to parse config_path")
    }

    pub fn concurrency(&self) -> Result<usize> {
        self.concurrency.ok_or_else(|| eyre!("concurrency is required"))
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn config_poll(&self) -> Duration {
        Duration::from_secs(self.config_poll_secs)
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions> {
        Ok(PipelineOptions {
            config_path: self.config_gcs_path()?,
            grid_prefix: self.grid_prefix.clone(),
            tabs_prefix: self.tabs_prefix.clone(),
            confirm: self.confirm,
            filter: self.filter,
        })
    }

    pub fn update_options(&self) -> Result<UpdateOptions> {
        Ok(UpdateOptions::new(self.pipeline_options()?)
            .with_concurrency(self.concurrency()?)
            .with_cadence(self.refresh())
            .with_allowed_dashboards(self.dashboards.clone())
            .with_tick_interval(Duration::from_secs(self.tick_secs)))
    }
}
