//! Command-line overrides.
//!
//! Every field left `None` keeps the value from the config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tabs_prefix: Option<String>,

    /// Replaces the allow-list rather than extending it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboards: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.config_path.is_none()
            && self.concurrency.is_none()
            && self.grid_prefix.is_none()
            && self.tabs_prefix.is_none()
            && self.dashboards.is_none()
            && self.confirm.is_none()
            && self.filter.is_none()
            && self.refresh_secs.is_none()
            && self.storage_root.is_none()
    }
}
