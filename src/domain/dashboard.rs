//! Dashboards, tabs and configuration snapshots
//!
//! A Snapshot is decoded from a YAML document:
//!
//! ```yaml
//! dashboards:
//!   - name: sig-release
//!     tabs:
//!       - name: blocking
//!         test_group_name: ci-release-blocking
//!         base_options: include-filter-by-regex=^e2e
//! ```

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, TabulatorError};

/// One named view within a dashboard, backed by one test group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub name: String,
    pub test_group_name: String,
    /// Row filter options in URL query form
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_options: String,
}

impl Tab {
    pub fn new(name: impl Into<String>, test_group_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            test_group_name: test_group_name.into(),
            base_options: String::new(),
        }
    }

    pub fn with_base_options(mut self, options: impl Into<String>) -> Self {
        self.base_options = options.into();
        self
    }
}

/// A named, ordered group of tabs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub name: String,
    #[serde(default)]
    pub tabs: Vec<Tab>,
}

impl Dashboard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tabs: Vec::new(),
        }
    }

    pub fn with_tab(mut self, tab: Tab) -> Self {
        self.tabs.push(tab);
        self
    }

    /// Whether any tab reads the given test group.
    pub fn reads_group(&self, group: &str) -> bool {
        self.tabs.iter().any(|t| t.test_group_name == group)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    dashboards: Vec<Dashboard>,
}

/// Complete configuration at one point in time
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dashboards: BTreeMap<String, Dashboard>,
    /// Hex SHA-256 of the encoded document
    pub digest: String,
    pub observed_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            dashboards: BTreeMap::new(),
            digest: String::new(),
            observed_at: Utc::now(),
        }
    }
}

impl Snapshot {
    /// Build a snapshot from dashboards, validating names.
    pub fn from_dashboards(dashboards: impl IntoIterator<Item = Dashboard>) -> Result<Self> {
        let doc = SnapshotDocument {
            dashboards: dashboards.into_iter().collect(),
        };
        let encoded = serde_yaml::to_string(&doc)?;
        Self::build(doc, encoded.as_bytes())
    }

    /// Decode a YAML configuration document.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        let doc: SnapshotDocument = serde_yaml::from_slice(bytes)?;
        Self::build(doc, bytes)
    }

    fn build(doc: SnapshotDocument, raw: &[u8]) -> Result<Self> {
        let mut dashboards = BTreeMap::new();
        for dash in doc.dashboards {
            validate_dashboard(&dash)?;
            if dashboards.contains_key(&dash.name) {
                return Err(TabulatorError::Config(format!("duplicate dashboard {}", dash.name)));
            }
            dashboards.insert(dash.name.clone(), dash);
        }
        Ok(Self {
            dashboards,
            digest: digest(raw),
            observed_at: Utc::now(),
        })
    }

    pub fn dashboard(&self, name: &str) -> Option<&Dashboard> {
        self.dashboards.get(name)
    }

    pub fn len(&self) -> usize {
        self.dashboards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dashboards.is_empty()
    }

    /// Names of the dashboards to keep fresh.
    ///
    /// With an allow-list, the allowed names that exist in this snapshot, in
    /// allow-list order; unknown names are logged and skipped. Without one,
    /// every configured dashboard.
    pub fn active_dashboards(&self, allowed: &[String]) -> Vec<String> {
        if allowed.is_empty() {
            return self.dashboards.keys().cloned().collect();
        }
        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(allowed.len());
        for name in allowed {
            if !self.dashboards.contains_key(name) {
                tracing::error!(dashboard = %name, "Could not find requested dashboard in config");
                continue;
            }
            if seen.insert(name.as_str()) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Names of dashboards with at least one tab reading `group`.
    pub fn dashboards_reading(&self, group: &str) -> Vec<String> {
        self.dashboards
            .values()
            .filter(|d| d.reads_group(group))
            .map(|d| d.name.clone())
            .collect()
    }
}

fn validate_dashboard(dash: &Dashboard) -> Result<()> {
    if dash.name.trim().is_empty() {
        return Err(TabulatorError::Config("dashboard with empty name".to_string()));
    }
    let mut tabs = HashSet::new();
    for tab in &dash.tabs {
        if tab.name.trim().is_empty() {
            return Err(TabulatorError::Config(format!("dashboard {} has a tab with empty name", dash.name)));
        }
        if tab.test_group_name.trim().is_empty() {
            return Err(TabulatorError::Config(format!(
                "tab {}/{} has no test group",
                dash.name, tab.name
            )));
        }
        if !tabs.insert(tab.name.as_str()) {
            return Err(TabulatorError::Config(format!("dashboard {} has duplicate tab {}", dash.name, tab.name)));
        }
    }
    Ok(())
}

/// Hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
