//! Browser backend abstraction.
//!
//! The session manager and dispatcher are written against this trait so the
//! whole command surface can be tested with a fake backend. The production
//! implementation ([`crate::chrome::CdpBrowser`]) speaks the DevTools
//! protocol to a Chrome-family browser.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use tabrelay_core::Result;

pub type TabId = String;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    pub title: String,
    pub url: String,
    pub active: bool,
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// Open page tabs. The active tab, when the backend can tell, comes
    /// first with its flag set.
    async fn list_tabs(&self) -> Result<Vec<TabInfo>>;

    /// Open a new tab in the preferred window (last-focused, else any, else
    /// a fresh window).
    async fn create_tab(&self, url: &str) -> Result<TabInfo>;

    async fn close_tab(&self, tab: &TabId) -> Result<()>;

    async fn activate_tab(&self, tab: &TabId) -> Result<()>;

    /// Open a debugger connection to the tab. Replaces any existing one.
    async fn attach(&self, tab: &TabId) -> Result<()>;

    /// Drop the debugger connection. Absent connections are fine.
    async fn detach(&self, tab: &TabId) -> Result<()>;

    /// Raw protocol command against an attached tab.
    async fn protocol(&self, tab: &TabId, method: &str, params: Value) -> Result<Value>;

    /// True if the event fired on the tab within the timeout.
    async fn wait_event(&self, tab: &TabId, event: &str, timeout: Duration) -> Result<bool>;

    /// Put the tab into the labeled group, where the backend has one.
    async fn group_tab(&self, tab: &TabId, label: &str) -> Result<()>;
}

/// In-memory backend for session and dispatch tests. Tabs are plain
/// records, attachment is a set, and protocol replies are scripted per
/// method name.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tabrelay_core::Error;

    #[derive(Default)]
    pub(crate) struct FakeBrowser {
        pub tabs: Mutex<Vec<TabInfo>>,
        pub attached: Mutex<HashSet<TabId>>,
        /// Every protocol call as (method, params), in order.
        pub calls: Mutex<Vec<(String, Value)>>,
        /// Scripted replies per method, popped front first. Methods with no
        /// script reply `{}`.
        pub replies: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
        pub fail_attach: Mutex<bool>,
        pub fail_group: Mutex<bool>,
        pub group_calls: Mutex<Vec<(TabId, String)>>,
        next_tab: AtomicU64,
    }

    impl FakeBrowser {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tab(url: &str) -> Self {
            let fake = Self::new();
            fake.push_tab(url, true);
            fake
        }

        pub fn push_tab(&self, url: &str, active: bool) -> TabId {
            let id = format!("tab-{}", self.next_tab.fetch_add(1, Ordering::SeqCst) + 1);
            let mut tabs = self.tabs.lock().unwrap();
            if active {
                for t in tabs.iter_mut() {
                    t.active = false;
                }
            }
            tabs.push(TabInfo {
                id: id.clone(),
                title: String::new(),
                url: url.to_string(),
                active,
            });
            id
        }

        pub fn remove_tab(&self, tab: &str) {
            self.tabs.lock().unwrap().retain(|t| t.id != tab);
        }

        pub fn enqueue(&self, method: &str, reply: Value) {
            self.replies
                .lock()
                .unwrap()
                .entry(method.to_string())
                .or_default()
                .push_back(Ok(reply));
        }

        pub fn enqueue_err(&self, method: &str, err: Error) {
            self.replies
                .lock()
                .unwrap()
                .entry(method.to_string())
                .or_default()
                .push_back(Err(err));
        }

        pub fn silently_detach(&self, tab: &str) {
            self.attached.lock().unwrap().remove(tab);
        }

        pub fn calls_for(&self, method: &str) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| m == method)
                .map(|(_, p)| p.clone())
                .collect()
        }

        pub fn attach_count(&self) -> usize {
            self.calls_for("__attach").len()
        }
    }

    #[async_trait]
    impl Browser for FakeBrowser {
        async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
            Ok(self.tabs.lock().unwrap().clone())
        }

        async fn create_tab(&self, url: &str) -> Result<TabInfo> {
            let id = self.push_tab(url, true);
            let tabs = self.tabs.lock().unwrap();
            Ok(tabs.iter().find(|t| t.id == id).cloned().unwrap())
        }

        async fn close_tab(&self, tab: &TabId) -> Result<()> {
            let mut tabs = self.tabs.lock().unwrap();
            let before = tabs.len();
            tabs.retain(|t| t.id != *tab);
            if tabs.len() == before {
                return Err(Error::NotFound(format!("tab {tab} not found")));
            }
            Ok(())
        }

        async fn activate_tab(&self, tab: &TabId) -> Result<()> {
            let mut tabs = self.tabs.lock().unwrap();
            if !tabs.iter().any(|t| t.id == *tab) {
                return Err(Error::NotFound(format!("tab {tab} not found")));
            }
            for t in tabs.iter_mut() {
                t.active = t.id == *tab;
            }
            Ok(())
        }

        async fn attach(&self, tab: &TabId) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("__attach".to_string(), Value::Null));
            if *self.fail_attach.lock().unwrap() {
                return Err(Error::Attachment(format!("cannot attach to {tab}")));
            }
            if !self.tabs.lock().unwrap().iter().any(|t| t.id == *tab) {
                return Err(Error::Attachment(format!("tab {tab} not found")));
            }
            self.attached.lock().unwrap().insert(tab.clone());
            Ok(())
        }

        async fn detach(&self, tab: &TabId) -> Result<()> {
            self.attached.lock().unwrap().remove(tab);
            Ok(())
        }

        async fn protocol(&self, tab: &TabId, method: &str, params: Value) -> Result<Value> {
            if !self.attached.lock().unwrap().contains(tab) {
                return Err(Error::Attachment(format!("tab {tab} is not attached")));
            }
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            let scripted = self
                .replies
                .lock()
                .unwrap()
                .get_mut(method)
                .and_then(|q| q.pop_front());
            match scripted {
                Some(reply) => reply,
                None => Ok(Value::Object(Default::default())),
            }
        }

        async fn wait_event(&self, _tab: &TabId, _event: &str, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }

        async fn group_tab(&self, tab: &TabId, label: &str) -> Result<()> {
            self.group_calls
                .lock()
                .unwrap()
                .push((tab.clone(), label.to_string()));
            if *self.fail_group.lock().unwrap() {
                return Err(Error::Other("tab grouping unavailable".to_string()));
            }
            Ok(())
        }
    }
}
