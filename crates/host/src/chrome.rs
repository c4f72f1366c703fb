//! DevTools-backed [`Browser`] implementation.
//!
//! Tabs are discovered and managed over the browser's HTTP endpoint
//! (`/json/list`, `/json/new`, ...); per-tab commands go over a dedicated
//! WebSocket debugger connection held in [`CdpClient`]. When no browser is
//! reachable and launching is enabled, [`ensure_browser`] starts one with a
//! private profile and waits for the endpoint to come up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tabrelay_core::{BrowserConfig, Error, Paths, Result};

use crate::browser::{Browser, TabId, TabInfo};
use crate::cdp::CdpClient;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const READY_TIMEOUT: Duration = Duration::from_secs(15);
const WS_RESOLVE_ATTEMPTS: u32 = 3;

pub struct CdpBrowser {
    http: reqwest::Client,
    base_url: String,
    clients: Mutex<HashMap<TabId, Arc<CdpClient>>>,
    protocol_timeout: Duration,
    /// Child handle when this process launched the browser itself. Held so
    /// the browser is reaped when the host exits.
    launched: std::sync::Mutex<Option<Child>>,
}

impl CdpBrowser {
    pub fn new(base_url: &str, protocol_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            clients: Mutex::new(HashMap::new()),
            protocol_timeout,
            launched: std::sync::Mutex::new(None),
        }
    }

    /// Browser identity from `/json/version`. Used by the doctor command and
    /// the reachability probe.
    pub async fn version(&self) -> Result<Value> {
        let url = format!("{}/json/version", self.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| Error::Browser(format!("endpoint {url} unreachable: {e}")))?;
        resp.json::<Value>()
            .await
            .map_err(|e| Error::Browser(format!("bad /json/version payload: {e}")))
    }

    async fn raw_targets(&self) -> Result<Vec<Value>> {
        let url = format!("{}/json/list", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Browser(format!("list targets: {e}")))?;
        resp.json::<Vec<Value>>()
            .await
            .map_err(|e| Error::Browser(format!("bad /json/list payload: {e}")))
    }

    /// Resolve a tab's WebSocket debugger URL. The target can lag the HTTP
    /// list right after creation, so retry briefly before giving up.
    async fn target_ws_url(&self, tab: &TabId) -> Result<String> {
        for attempt in 0..WS_RESOLVE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            let targets = self.raw_targets().await?;
            for target in &targets {
                if target.get("id").and_then(|v| v.as_str()) == Some(tab.as_str()) {
                    if let Some(ws) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                        return Ok(ws.to_string());
                    }
                    // Present but already claimed by another debugger.
                    return Err(Error::Attachment(format!(
                        "tab {tab} has no free debugger endpoint"
                    )));
                }
            }
        }
        Err(Error::NotFound(format!("tab {tab} not found")))
    }
}

/// Parse one `/json/list` entry into a [`TabInfo`]. Non-page targets
/// (service workers, devtools frontends) return `None`.
fn tab_from_target(target: &Value, active: bool) -> Option<TabInfo> {
    if target.get("type").and_then(|v| v.as_str()) != Some("page") {
        return None;
    }
    let url = target.get("url").and_then(|v| v.as_str()).unwrap_or("");
    if url.starts_with("devtools://") {
        return None;
    }
    let id = target.get("id").and_then(|v| v.as_str())?;
    Some(TabInfo {
        id: id.to_string(),
        title: target
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        url: url.to_string(),
        active,
    })
}

/// Page targets from a raw target list. The endpoint orders the most
/// recently focused target first, which is the only activity signal it
/// exposes, so the first page entry carries the active flag.
fn targets_to_tabs(targets: &[Value]) -> Vec<TabInfo> {
    let mut tabs = Vec::new();
    for target in targets {
        if let Some(tab) = tab_from_target(target, tabs.is_empty()) {
            tabs.push(tab);
        }
    }
    tabs
}

fn new_tab_endpoint(base_url: &str, url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
    format!("{base_url}/json/new?{encoded}")
}

#[async_trait]
impl Browser for CdpBrowser {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        let targets = self.raw_targets().await?;
        Ok(targets_to_tabs(&targets))
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo> {
        // Newer browsers require PUT here; GET is rejected.
        let endpoint = new_tab_endpoint(&self.base_url, url);
        let resp = self
            .http
            .put(&endpoint)
            .send()
            .await
            .map_err(|e| Error::Browser(format!("create tab: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Browser(format!(
                "create tab: endpoint returned {}",
                resp.status()
            )));
        }
        let target = resp
            .json::<Value>()
            .await
            .map_err(|e| Error::Browser(format!("bad /json/new payload: {e}")))?;
        tab_from_target(&target, true)
            .ok_or_else(|| Error::Browser("new target is not a page".to_string()))
    }

    async fn close_tab(&self, tab: &TabId) -> Result<()> {
        self.detach(tab).await?;
        let url = format!("{}/json/close/{}", self.base_url, tab);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Browser(format!("close tab: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::NotFound(format!("tab {tab} not found")));
        }
        Ok(())
    }

    async fn activate_tab(&self, tab: &TabId) -> Result<()> {
        let url = format!("{}/json/activate/{}", self.base_url, tab);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Browser(format!("activate tab: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::NotFound(format!("tab {tab} not found")));
        }
        Ok(())
    }

    async fn attach(&self, tab: &TabId) -> Result<()> {
        let ws_url = self.target_ws_url(tab).await?;
        let client = CdpClient::connect(&ws_url, self.protocol_timeout).await?;
        let mut clients = self.clients.lock().await;
        if clients.insert(tab.clone(), Arc::new(client)).is_some() {
            debug!(tab = %tab, "replaced existing debugger connection");
        }
        Ok(())
    }

    async fn detach(&self, tab: &TabId) -> Result<()> {
        let mut clients = self.clients.lock().await;
        clients.remove(tab);
        Ok(())
    }

    async fn protocol(&self, tab: &TabId, method: &str, params: Value) -> Result<Value> {
        let client = {
            let clients = self.clients.lock().await;
            clients.get(tab).cloned()
        };
        let Some(client) = client else {
            return Err(Error::Attachment(format!("tab {tab} is not attached")));
        };
        client.send_command(method, params).await
    }

    async fn wait_event(&self, tab: &TabId, event: &str, timeout: Duration) -> Result<bool> {
        let client = {
            let clients = self.clients.lock().await;
            clients.get(tab).cloned()
        };
        let Some(client) = client else {
            return Err(Error::Attachment(format!("tab {tab} is not attached")));
        };
        let mut rx = client.subscribe_event(event).await;
        if let Some(domain) = event.split('.').next() {
            // Events only flow once the domain is enabled.
            let _ = client
                .send_command(&format!("{domain}.enable"), json!({}))
                .await;
        }
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(_) => Ok(false),
        }
    }

    async fn group_tab(&self, _tab: &TabId, _label: &str) -> Result<()> {
        // The protocol has no tab-group surface; callers treat this as a
        // soft failure.
        Err(Error::Other(
            "tab grouping is not supported over the DevTools endpoint".to_string(),
        ))
    }
}

// ─── Launch fallback ───────────────────────────────────────────────────

/// Connect to the configured endpoint, launching a browser first when that
/// is enabled and nothing is listening.
pub async fn ensure_browser(config: &BrowserConfig, paths: &Paths) -> Result<CdpBrowser> {
    let protocol_timeout = Duration::from_secs(config.protocol_timeout_secs);
    let browser = CdpBrowser::new(&config.cdp_url, protocol_timeout);

    match browser.version().await {
        Ok(version) => {
            info!(
                endpoint = %config.cdp_url,
                browser = version.get("Browser").and_then(|v| v.as_str()).unwrap_or("unknown"),
                "connected to running browser"
            );
            return Ok(browser);
        }
        Err(e) if !config.launch => {
            return Err(Error::Browser(format!(
                "{e}; start a browser with --remote-debugging-port or set browser.launch"
            )));
        }
        Err(e) => {
            debug!(error = %e, "endpoint not reachable, launching a browser");
        }
    }

    let binary = find_browser_binary(config.binary.as_deref())?;
    let port = find_free_port().await?;
    let user_data_dir = match &config.user_data_dir {
        Some(dir) => PathBuf::from(dir),
        None => paths.profile_dir(),
    };
    std::fs::create_dir_all(&user_data_dir)?;

    let args = build_launch_args(config, port, &user_data_dir);
    info!(binary = %binary, port = port, headless = config.headless, "launching browser");

    let child = Command::new(&binary)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Browser(format!("launch {binary}: {e}")))?;

    let base_url = format!("http://127.0.0.1:{port}");
    wait_for_ready(&base_url).await?;

    let browser = CdpBrowser::new(&base_url, protocol_timeout);
    *browser
        .launched
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(child);
    Ok(browser)
}

fn build_launch_args(config: &BrowserConfig, port: u16, user_data_dir: &std::path::Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// A chrome-family binary to launch. An explicitly configured path wins;
/// otherwise walk well-known names and locations.
pub fn find_browser_binary(configured: Option<&str>) -> Result<String> {
    if let Some(path) = configured {
        if std::path::Path::new(path).exists() || which::which(path).is_ok() {
            return Ok(path.to_string());
        }
        return Err(Error::Browser(format!(
            "configured browser binary '{path}' not found"
        )));
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    } else {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "microsoft-edge",
            "brave-browser",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Ok(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Ok(candidate.to_string());
        }
    }
    Err(Error::Browser(
        "no chrome-family browser found; set browser.binary in the config".to_string(),
    ))
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the freshly launched browser answers.
async fn wait_for_ready(base_url: &str) -> Result<Value> {
    let client = reqwest::Client::new();
    let url = format!("{base_url}/json/version");
    let start = tokio::time::Instant::now();
    loop {
        if let Ok(resp) = client.get(&url).send().await {
            if let Ok(body) = resp.json::<Value>().await {
                return Ok(body);
            }
        }
        if start.elapsed() > READY_TIMEOUT {
            return Err(Error::Browser(format!(
                "browser endpoint {base_url} not ready after {}s",
                READY_TIMEOUT.as_secs()
            )));
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_target(id: &str, url: &str) -> Value {
        json!({
            "id": id,
            "type": "page",
            "title": format!("title of {id}"),
            "url": url,
            "webSocketDebuggerUrl": format!("ws://127.0.0.1:9222/devtools/page/{id}"),
        })
    }

    #[test]
    fn test_tab_from_target_parses_page() {
        let target = page_target("AB12", "https://example.com/");
        let tab = tab_from_target(&target, true).unwrap();
        assert_eq!(tab.id, "AB12");
        assert_eq!(tab.url, "https://example.com/");
        assert_eq!(tab.title, "title of AB12");
        assert!(tab.active);
    }

    #[test]
    fn test_tab_from_target_rejects_non_pages() {
        let worker = json!({ "id": "W1", "type": "service_worker", "url": "https://x.test/sw.js" });
        assert!(tab_from_target(&worker, false).is_none());

        let devtools = json!({
            "id": "D1",
            "type": "page",
            "url": "devtools://devtools/bundled/inspector.html",
        });
        assert!(tab_from_target(&devtools, false).is_none());
    }

    #[test]
    fn test_targets_to_tabs_marks_first_page_active() {
        let targets = vec![
            json!({ "id": "W1", "type": "service_worker", "url": "https://x.test/sw.js" }),
            page_target("A", "https://a.test/"),
            page_target("B", "https://b.test/"),
        ];
        let tabs = targets_to_tabs(&targets);
        assert_eq!(tabs.len(), 2);
        assert!(tabs[0].active);
        assert_eq!(tabs[0].id, "A");
        assert!(!tabs[1].active);
    }

    #[test]
    fn test_new_tab_endpoint_percent_encodes() {
        let endpoint = new_tab_endpoint("http://127.0.0.1:9222", "https://example.com/a b?q=1&x=2");
        assert_eq!(
            endpoint,
            "http://127.0.0.1:9222/json/new?https%3A%2F%2Fexample.com%2Fa+b%3Fq%3D1%26x%3D2"
        );
    }

    #[test]
    fn test_find_browser_binary_missing_configured_path() {
        let err = find_browser_binary(Some("/definitely/not/a/browser")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/a/browser"));
    }

    #[tokio::test]
    async fn test_find_free_port_binds() {
        let port = find_free_port().await.unwrap();
        assert!(port > 0);
    }

    #[test]
    fn test_launch_args_include_port_and_profile() {
        let config = BrowserConfig {
            headless: true,
            ..Default::default()
        };
        let args = build_launch_args(&config, 9333, std::path::Path::new("/tmp/profile"));
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }
}
