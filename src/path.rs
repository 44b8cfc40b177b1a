//! Object store paths.
//!
//! A `GcsPath` is a `gs://bucket/object` URL. Source and destination paths are
//! computed relative to the configuration path and must stay in its bucket.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Result, TabulatorError};

/// Location of one object in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcsPath {
    url: Url,
}

impl GcsPath {
    /// Parse a `gs://bucket/object` string.
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| TabulatorError::Path(format!("invalid url {}: {}", s, e)))?;
        if url.scheme() != "gs" {
            return Err(TabulatorError::Path(format!("{} is not a gs:// path", s)));
        }
        let path = Self { url };
        if path.bucket().is_empty() {
            return Err(TabulatorError::Path(format!("{} has no bucket", s)));
        }
        Ok(path)
    }

    /// Bucket (URL host) of this path; empty when the URL has none.
    pub fn bucket(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    /// Object name within the bucket, without the leading slash.
    ///
    /// The URL keeps names percent-encoded; the object name is decoded.
    pub fn object(&self) -> Result<Cow<'_, str>> {
        let encoded = self.url.path().trim_start_matches('/');
        percent_decode_str(encoded)
            .decode_utf8()
            .map_err(|e| TabulatorError::Path(format!("{} has a non-utf8 object name: {}", self, e)))
    }

    /// Resolve a relative URL reference against this path.
    pub fn resolve_reference(&self, reference: &str) -> Result<GcsPath> {
        let url = self
            .url
            .join(reference)
            .map_err(|e| TabulatorError::Path(format!("resolve reference {}: {}", reference, e)))?;
        Ok(GcsPath { url })
    }

}

impl fmt::Display for GcsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl FromStr for GcsPath {
    type Err = TabulatorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Join slash-separated path elements, dropping empty elements and cleaning
/// `.` and `..` segments. Returns an empty string when every element is empty.
pub fn path_join(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return joined;
    }
    clean(&joined)
}

fn clean(p: &str) -> String {
    let rooted = p.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }
    let body = out.join("/");
    if rooted {
        format!("/{}", body)
    } else if body.is_empty() {
        ".".to_string()
    } else {
        body
    }
}

/// Where the derived state of one dashboard tab is written.
pub fn tab_state_path(config_path: &GcsPath, tabs_prefix: &str, dashboard: &str, tab: &str) -> Result<GcsPath> {
    let name = path_join(&[tabs_prefix, dashboard, tab]);
    resolve_in_bucket(config_path, &name, "tab state")
}

/// Where the upstream pipeline writes the grid of a test group.
pub fn test_group_path(config_path: &GcsPath, grid_prefix: &str, group: &str) -> Result<GcsPath> {
    let name = path_join(&[grid_prefix, group]);
    resolve_in_bucket(config_path, &name, "test group")
}

fn resolve_in_bucket(config_path: &GcsPath, name: &str, kind: &str) -> Result<GcsPath> {
    let resolved = config_path.resolve_reference(name)?;
    if resolved.bucket() != config_path.bucket() {
        return Err(TabulatorError::Path(format!("{} {} should not change bucket", kind, name)));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GcsPath {
        GcsPath::parse("gs://bucket/config").unwrap()
    }

    #[test]
    fn test_parse() {
        let p = GcsPath::parse("gs://bucket/some/object").unwrap();
        assert_eq!(p.bucket(), "bucket");
        assert_eq!(p.object().unwrap(), "some/object");
        assert_eq!(p.to_string(), "gs://bucket/some/object");
    }

    #[test]
    fn test_parse_rejects_other_scheme() {
        assert!(GcsPath::parse("https://bucket/object").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(GcsPath::parse("not a url").is_err());
    }

    #[test]
    fn test_from_str() {
        let p: GcsPath = "gs://b/o".parse().unwrap();
        assert_eq!(p.bucket(), "b");
    }

    #[test]
    fn test_path_join_basic() {
        assert_eq!(path_join(&["tabs", "dash", "tab"]), "tabs/dash/tab");
    }

    #[test]
    fn test_path_join_skips_empty() {
        assert_eq!(path_join(&["", "dash", "tab"]), "dash/tab");
        assert_eq!(path_join(&["", ""]), "");
    }

    #[test]
    fn test_path_join_cleans() {
        assert_eq!(path_join(&["tabs/", "./dash", "tab"]), "tabs/dash/tab");
        assert_eq!(path_join(&["tabs", "..", "..", "x"]), "../x");
        assert_eq!(path_join(&["/tabs", "..", "..", "x"]), "/x");
        assert_eq!(path_join(&["a", ".."]), ".");
    }

    #[test]
    fn test_tab_state_path() {
        let p = tab_state_path(&config(), "tabs", "dash", "tab").unwrap();
        assert_eq!(p.to_string(), "gs://bucket/tabs/dash/tab");
    }

    #[test]
    fn test_tab_state_path_decodes_spaces() {
        let p = tab_state_path(&config(), "tabs", "sig release", "blocking tab").unwrap();
        assert_eq!(p.to_string(), "gs://bucket/tabs/sig%20release/blocking%20tab");
        assert_eq!(p.object().unwrap(), "tabs/sig release/blocking tab");
    }

    #[test]
    fn test_object_rejects_invalid_utf8() {
        let p = GcsPath::parse("gs://bucket/bad%FF").unwrap();
        assert!(matches!(p.object(), Err(TabulatorError::Path(_))));
    }

    #[test]
    fn test_tab_state_path_absolute_prefix() {
        let p = tab_state_path(&config(), "/state/tabs", "dash", "tab").unwrap();
        assert_eq!(p.to_string(), "gs://bucket/state/tabs/dash/tab");
    }

    #[test]
    fn test_tab_state_path_nested_config() {
        let cfg = GcsPath::parse("gs://bucket/testgrid/config").unwrap();
        let p = tab_state_path(&cfg, "tabs", "dash", "tab").unwrap();
        assert_eq!(p.to_string(), "gs://bucket/testgrid/tabs/dash/tab");
    }

    #[test]
    fn test_tab_state_path_rejects_other_bucket() {
        let err = tab_state_path(&config(), "gs://other-bucket/tabs", "dash", "tab").unwrap_err();
        assert!(matches!(err, TabulatorError::Path(_)));
        assert!(err.to_string().contains("should not change bucket"));
    }

    #[test]
    fn test_tab_state_path_rejects_full_url_prefix() {
        assert!(tab_state_path(&config(), "gs://other/tabs", "dash", "tab").is_err());
    }

    #[test]
    fn test_tab_state_path_dotdot_stays_in_bucket() {
        let p = tab_state_path(&config(), "tabs", "../../escape", "tab").unwrap();
        assert_eq!(p.bucket(), "bucket");
    }

    #[test]
    fn test_test_group_path() {
        let p = test_group_path(&config(), "grid", "ci-kubernetes-e2e").unwrap();
        assert_eq!(p.to_string(), "gs://bucket/grid/ci-kubernetes-e2e");
    }

    #[test]
    fn test_test_group_path_rejects_other_bucket() {
        assert!(test_group_path(&config(), "gs://elsewhere/grid", "group").is_err());
    }
}
