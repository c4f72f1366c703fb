//! Agent session and debugger lifecycle management.
//!
//! Each session id is bound to at most one browser tab; each tab carries
//! its own attachment state. Tabs closed out-of-band are treated as gone
//! and recreated on next use, never surfaced as hard errors. `last_active`
//! runs on the tokio clock so eviction can be tested with time paused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tabrelay_core::{Error, Result, SessionConfig};
use tabrelay_extract::store::ElementStore;
use tabrelay_extract::types::{ElementDescriptor, IdMap};

use crate::browser::{Browser, TabId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Detached,
    Attaching,
    Attached,
}

#[derive(Debug)]
struct TabState {
    attach: AttachState,
    /// Device-metrics override is applied once per attachment.
    viewport_configured: bool,
}

impl Default for TabState {
    fn default() -> Self {
        Self {
            attach: AttachState::Detached,
            viewport_configured: false,
        }
    }
}

#[derive(Debug)]
struct AgentSession {
    tab: TabId,
    last_active: Instant,
    /// Last element id handed out; survives tab rebinds so ids are never
    /// reused within a session.
    ref_cursor: u32,
}

pub struct SessionManager {
    browser: Arc<dyn Browser>,
    sessions: Mutex<HashMap<String, AgentSession>>,
    tabs: Mutex<HashMap<TabId, TabState>>,
    store: Mutex<ElementStore>,
    config: SessionConfig,
    viewport: (u32, u32),
}

impl SessionManager {
    pub fn new(browser: Arc<dyn Browser>, config: SessionConfig, viewport: (u32, u32)) -> Arc<Self> {
        Arc::new(Self {
            browser,
            sessions: Mutex::new(HashMap::new()),
            tabs: Mutex::new(HashMap::new()),
            store: Mutex::new(ElementStore::new()),
            config,
            viewport,
        })
    }

    /// The tab bound to a session, creating one when the session is new or
    /// its tab was closed out-of-band. Refreshes the activity clock.
    pub async fn resolve_tab(&self, session_id: &str, start_url: Option<&str>) -> Result<TabId> {
        let bound = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(session_id) {
                Some(session) => {
                    session.last_active = Instant::now();
                    Some(session.tab.clone())
                }
                None => None,
            }
        };

        if let Some(tab) = bound {
            let alive = self
                .browser
                .list_tabs()
                .await
                .map(|tabs| tabs.iter().any(|t| t.id == tab))
                .unwrap_or(false);
            if alive {
                return Ok(tab);
            }
            info!(session = %session_id, tab = %tab, "bound tab gone, creating a replacement");
            self.tabs.lock().await.remove(&tab);
            self.store.lock().await.clear(session_id);
            let replacement = self.open_session_tab(session_id, start_url).await?;
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(session_id) {
                session.tab = replacement.clone();
                session.last_active = Instant::now();
            }
            return Ok(replacement);
        }

        let tab = self.open_session_tab(session_id, start_url).await?;
        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(
                session_id.to_string(),
                AgentSession {
                    tab: tab.clone(),
                    last_active: Instant::now(),
                    ref_cursor: 0,
                },
            );
        }
        Ok(tab)
    }

    /// Create, group, and best-effort attach a fresh tab. Attach failures
    /// are logged, not fatal; later commands retry lazily.
    async fn open_session_tab(&self, session_id: &str, start_url: Option<&str>) -> Result<TabId> {
        let url = start_url.unwrap_or("about:blank");
        let info = self.browser.create_tab(url).await?;
        let tab = info.id;
        self.tabs.lock().await.insert(tab.clone(), TabState::default());

        let skip_group = self
            .config
            .controller_url_prefix
            .as_deref()
            .is_some_and(|prefix| url.starts_with(prefix));
        if !skip_group {
            if let Err(e) = self.browser.group_tab(&tab, &self.config.tab_group_label).await {
                debug!(tab = %tab, error = %e, "tab grouping unavailable");
            }
        }

        if let Err(e) = self.attach(&tab).await {
            warn!(session = %session_id, tab = %tab, error = %e, "initial attach failed, will retry on demand");
        }
        Ok(tab)
    }

    /// Idempotent attach. A stale attachment the browser still holds is
    /// cleared with a detach first.
    pub async fn attach(&self, tab: &TabId) -> Result<()> {
        {
            let mut tabs = self.tabs.lock().await;
            let state = tabs.entry(tab.clone()).or_default();
            if state.attach == AttachState::Attached {
                return Ok(());
            }
            state.attach = AttachState::Attaching;
        }

        let _ = self.browser.detach(tab).await;
        match self.browser.attach(tab).await {
            Ok(()) => {
                {
                    let mut tabs = self.tabs.lock().await;
                    if let Some(state) = tabs.get_mut(tab) {
                        state.attach = AttachState::Attached;
                    }
                }
                self.configure_viewport(tab).await;
                Ok(())
            }
            Err(e) => {
                let mut tabs = self.tabs.lock().await;
                if let Some(state) = tabs.get_mut(tab) {
                    state.attach = AttachState::Detached;
                }
                Err(e)
            }
        }
    }

    async fn configure_viewport(&self, tab: &TabId) {
        {
            let tabs = self.tabs.lock().await;
            if tabs.get(tab).is_none_or(|s| s.viewport_configured) {
                return;
            }
        }
        let (width, height) = self.viewport;
        let params = json!({
            "width": width,
            "height": height,
            "deviceScaleFactor": 1,
            "mobile": false,
        });
        match self
            .browser
            .protocol(tab, "Emulation.setDeviceMetricsOverride", params)
            .await
        {
            Ok(_) => {
                let mut tabs = self.tabs.lock().await;
                if let Some(state) = tabs.get_mut(tab) {
                    state.viewport_configured = true;
                }
            }
            Err(e) => {
                // Left unset so the next attachment tries again.
                warn!(tab = %tab, error = %e, "viewport override failed");
            }
        }
    }

    /// Protocol round-trip with lazy attach. A failure attributable to a
    /// silent detachment gets exactly one transparent reattach-and-retry;
    /// a second failure propagates.
    pub async fn send_protocol(&self, tab: &TabId, method: &str, params: Value) -> Result<Value> {
        self.attach(tab).await?;
        match self.browser.protocol(tab, method, params.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if is_detached_error(&e) => {
                warn!(tab = %tab, method = method, "debugger detached mid-command, reattaching");
                self.force_reattach(tab).await?;
                self.browser.protocol(tab, method, params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn force_reattach(&self, tab: &TabId) -> Result<()> {
        {
            let mut tabs = self.tabs.lock().await;
            if let Some(state) = tabs.get_mut(tab) {
                state.attach = AttachState::Detached;
                state.viewport_configured = false;
            }
        }
        self.attach(tab).await
    }

    /// Idempotent detach. Local bookkeeping is cleared even when the
    /// underlying call fails.
    pub async fn detach(&self, tab: &TabId) {
        if let Err(e) = self.browser.detach(tab).await {
            debug!(tab = %tab, error = %e, "detach reported failure");
        }
        let mut tabs = self.tabs.lock().await;
        if let Some(state) = tabs.get_mut(tab) {
            state.attach = AttachState::Detached;
            state.viewport_configured = false;
        }
    }

    /// Remove every session idle for at least `threshold`, closing its tab
    /// and dropping its element map. Close errors are swallowed; removal is
    /// unconditional. Returns the evicted session ids.
    pub async fn evict_idle(&self, threshold: Duration) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<(String, TabId)> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, s)| now.duration_since(s.last_active) >= threshold)
                .map(|(id, s)| (id.clone(), s.tab.clone()))
                .collect()
        };

        let mut evicted = Vec::new();
        for (session_id, tab) in expired {
            let still_idle = {
                let mut sessions = self.sessions.lock().await;
                match sessions.get(&session_id) {
                    // duration_since saturates to zero when activity was
                    // refreshed after the scan, skipping the eviction.
                    Some(s) if now.duration_since(s.last_active) >= threshold => {
                        sessions.remove(&session_id);
                        true
                    }
                    _ => false,
                }
            };
            if !still_idle {
                continue;
            }

            info!(session = %session_id, tab = %tab, "evicting idle session");
            self.detach(&tab).await;
            if let Err(e) = self.browser.close_tab(&tab).await {
                debug!(tab = %tab, error = %e, "tab already gone during eviction");
            }
            self.tabs.lock().await.remove(&tab);
            self.store.lock().await.clear(&session_id);
            evicted.push(session_id);
        }
        evicted
    }

    /// Close a session's tab and forget it. Succeeds whether or not the
    /// tab (or the session itself) still exists.
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let removed = { self.sessions.lock().await.remove(session_id) };
        if let Some(session) = removed {
            self.detach(&session.tab).await;
            if let Err(e) = self.browser.close_tab(&session.tab).await {
                debug!(tab = %session.tab, error = %e, "tab already gone on session close");
            }
            self.tabs.lock().await.remove(&session.tab);
            self.store.lock().await.clear(session_id);
        }
        Ok(())
    }

    /// Bind the session to a different existing tab, detaching from the
    /// old one (without closing it) and invalidating stored element ids.
    pub async fn rebind(&self, session_id: &str, new_tab: TabId) -> Result<TabId> {
        let old = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| no_session(session_id))?;
            session.last_active = Instant::now();
            std::mem::replace(&mut session.tab, new_tab.clone())
        };

        if old != new_tab {
            self.detach(&old).await;
            self.tabs.lock().await.remove(&old);
            self.store.lock().await.clear(session_id);
        }
        self.tabs.lock().await.entry(new_tab.clone()).or_default();
        if let Err(e) = self.attach(&new_tab).await {
            warn!(session = %session_id, tab = %new_tab, error = %e, "attach after rebind failed");
        }
        Ok(new_tab)
    }

    /// The tab currently bound to the session, for commands that require
    /// an initialized session rather than creating one.
    pub async fn session_tab(&self, session_id: &str) -> Result<TabId> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|s| s.tab.clone())
            .ok_or_else(|| no_session(session_id))
    }

    pub async fn touch(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_active = Instant::now();
        }
    }

    pub async fn ref_cursor(&self, session_id: &str) -> u32 {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|s| s.ref_cursor).unwrap_or(0)
    }

    pub async fn set_ref_cursor(&self, session_id: &str, cursor: u32) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.ref_cursor = cursor;
        }
    }

    pub async fn put_elements(&self, session_id: &str, map: IdMap) {
        self.store.lock().await.put(session_id, map);
    }

    pub async fn get_element(&self, session_id: &str, id: u32) -> Result<ElementDescriptor> {
        let store = self.store.lock().await;
        store.get(session_id, id).cloned()
    }

    pub async fn clear_elements(&self, session_id: &str) {
        self.store.lock().await.clear(session_id);
    }

    /// Tabs currently claimed by sessions other than `session_id`.
    pub async fn tabs_bound_elsewhere(&self, session_id: &str) -> Vec<TabId> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|(id, _)| id.as_str() != session_id)
            .map(|(_, s)| s.tab.clone())
            .collect()
    }

    pub fn spawn_eviction_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let interval = Duration::from_secs(manager.config.eviction_interval_secs.max(1));
        let threshold = Duration::from_secs(manager.config.idle_timeout_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = manager.evict_idle(threshold).await;
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "idle session sweep");
                }
            }
        })
    }
}

fn no_session(session_id: &str) -> Error {
    Error::Session(format!(
        "no session '{session_id}'; run session-init first"
    ))
}

/// True when a protocol failure means the browser dropped our attachment
/// behind our back rather than rejecting the command itself.
fn is_detached_error(e: &Error) -> bool {
    match e {
        Error::Attachment(_) => true,
        Error::Browser(msg) => {
            let msg = msg.to_ascii_lowercase();
            msg.contains("not attached") || msg.contains("detached")
        }
        _ => false,
    }
}
