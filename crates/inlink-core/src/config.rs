//! Configuration and data directory management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Paths to the extension's on-disk data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Extension configuration (`data/config.json`).
    pub config_file: PathBuf,
    /// Persisted shared store (`data/store.json`).
    pub store_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            config_file: root.join("config.json"),
            store_file: root.join("store.json"),
            root,
        })
    }
}

/// Extension settings shared by the background, content and popup contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
    /// Host suffix identifying the target site.
    #[serde(default = "default_site_domain")]
    pub site_domain: String,
    #[serde(default = "default_extension_version")]
    pub extension_version: String,
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
    /// Wait before scraping so the page can finish rendering.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_status_dismiss_ms")]
    pub status_dismiss_ms: u64,
    #[serde(default = "default_navigation_delay_ms")]
    pub navigation_delay_ms: u64,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Path to config file (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_api_base_url() -> String {
    "http://localhost:5000".into()
}
fn default_dashboard_url() -> String {
    "http://localhost:5000/dashboard".into()
}
fn default_site_domain() -> String {
    "linkedin.com".into()
}
fn default_extension_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}
fn default_extraction_timeout_ms() -> u64 {
    10_000
}
fn default_settle_delay_ms() -> u64 {
    2_000
}
fn default_status_dismiss_ms() -> u64 {
    5_000
}
fn default_navigation_delay_ms() -> u64 {
    1_000
}
fn default_retention_secs() -> u64 {
    3_600
}
fn default_sweep_interval_secs() -> u64 {
    3_600
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            dashboard_url: default_dashboard_url(),
            site_domain: default_site_domain(),
            extension_version: default_extension_version(),
            extraction_timeout_ms: default_extraction_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            status_dismiss_ms: default_status_dismiss_ms(),
            navigation_delay_ms: default_navigation_delay_ms(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            config_path: PathBuf::new(),
        }
    }
}

impl ExtensionConfig {
    /// Load config from a JSON file, or return defaults.
    pub fn load(config_path: &Path) -> Self {
        let mut config: ExtensionConfig = std::fs::read_to_string(config_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        config.config_path = config_path.to_path_buf();
        config
    }

    /// Load from the data directory, then apply environment overrides.
    pub fn from_env(paths: &DataPaths) -> Self {
        let mut config = Self::load(&paths.config_file);
        if let Ok(url) = std::env::var("INLINK_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("INLINK_DASHBOARD_URL") {
            config.dashboard_url = url;
        }
        config
    }

    /// Save config to the file it was loaded from.
    pub fn save(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            return Err(Error::Config("config has no file path".into()));
        }
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.config_path, json)?;
        Ok(())
    }

    /// URL patterns covering the target site, in tab-query form.
    pub fn site_patterns(&self) -> Vec<String> {
        vec![
            format!("https://{}/*", self.site_domain),
            format!("https://*.{}/*", self.site_domain),
        ]
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn status_dismiss(&self) -> Duration {
        Duration::from_millis(self.status_dismiss_ms)
    }

    pub fn navigation_delay(&self) -> Duration {
        Duration::from_millis(self.navigation_delay_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExtensionConfig::load(&dir.path().join("config.json"));
        assert_eq!(config.extraction_timeout_ms, 10_000);
        assert_eq!(config.retention_secs, 3_600);
        assert_eq!(config.site_domain, "linkedin.com");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url": "https://api.example.com"}"#).unwrap();

        let config = ExtensionConfig::load(&path);
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.status_dismiss_ms, 5_000);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data")).unwrap();
        let mut config = ExtensionConfig::load(&paths.config_file);
        config.navigation_delay_ms = 250;
        config.save().unwrap();

        let reloaded = ExtensionConfig::load(&paths.config_file);
        assert_eq!(reloaded.navigation_delay_ms, 250);
    }

    #[test]
    fn test_save_without_path_fails() {
        assert!(matches!(
            ExtensionConfig::default().save(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_site_patterns() {
        let config = ExtensionConfig::default();
        assert_eq!(
            config.site_patterns(),
            vec!["https://linkedin.com/*", "https://*.linkedin.com/*"]
        );
    }
}
