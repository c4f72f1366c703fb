use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_host")]
    pub host: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    /// Shared token clients must present on connect. None disables auth.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Host process argv. Empty means "current executable + `host`".
    #[serde(default)]
    pub host_command: Vec<String>,
}

fn default_bridge_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bridge_port() -> u16 {
    8787
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_frame_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_bridge_host(),
            port: default_bridge_port(),
            auth_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_frame_bytes: default_max_frame_bytes(),
            host_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted and their tab closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    /// Upper bound on waiting for the load event before returning
    /// "proceeding anyway".
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_tab_group_label")]
    pub tab_group_label: String,
    /// Tabs whose start URL begins with this prefix are never grouped.
    #[serde(default)]
    pub controller_url_prefix: Option<String>,
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_eviction_interval_secs() -> u64 {
    60
}

fn default_navigation_timeout_ms() -> u64 {
    10_000
}

fn default_tab_group_label() -> String {
    "tabrelay".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            tab_group_label: default_tab_group_label(),
            controller_url_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// DevTools HTTP endpoint of a running browser.
    #[serde(default = "default_cdp_url")]
    pub cdp_url: String,
    /// Launch a local browser when the endpoint is unreachable.
    #[serde(default)]
    pub launch: bool,
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub user_data_dir: Option<String>,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_protocol_timeout_secs")]
    pub protocol_timeout_secs: u64,
}

fn default_cdp_url() -> String {
    "http://127.0.0.1:9222".to_string()
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    800
}

fn default_protocol_timeout_secs() -> u64 {
    30
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_url: default_cdp_url(),
            launch: false,
            binary: None,
            headless: false,
            user_data_dir: None,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            protocol_timeout_secs: default_protocol_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotConfig {
    /// "jpeg" or "png".
    #[serde(default = "default_screenshot_format")]
    pub format: String,
    #[serde(default = "default_screenshot_quality")]
    pub quality: u8,
    /// Capture is clipped to at most this many CSS pixels of height.
    #[serde(default = "default_max_height_px")]
    pub max_height_px: u32,
}

fn default_screenshot_format() -> String {
    "jpeg".to_string()
}

fn default_screenshot_quality() -> u8 {
    70
}

fn default_max_height_px() -> u32 {
    1200
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            format: default_screenshot_format(),
            quality: default_screenshot_quality(),
            max_height_px: default_max_height_px(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bridge.port, 8787);
        assert_eq!(cfg.bridge.request_timeout_secs, 30);
        assert_eq!(cfg.session.idle_timeout_secs, 300);
        assert_eq!(cfg.session.navigation_timeout_ms, 10_000);
        assert_eq!(cfg.screenshot.quality, 70);
        assert!(cfg.bridge.auth_token.is_none());
    }

    #[test]
    fn test_partial_override() {
        let raw = r#"{
  "bridge": { "port": 9001, "authToken": "s3cret" },
  "session": { "idleTimeoutSecs": 60 }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.bridge.port, 9001);
        assert_eq!(cfg.bridge.auth_token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.session.idle_timeout_secs, 60);
        // untouched sections keep their defaults
        assert_eq!(cfg.browser.viewport_width, 1280);
    }
}
