//! In-memory browser collaborator for tests.
//!
//! [`StubBrowser`] implements [`BrowserConnector`] against a shared
//! [`RemoteBrowser`] that stands in for the external process, so tests can
//! observe which branch ran, inject connection failures, and check that
//! `keep_alive` really leaves the remote side running.

use crate::core::browser::{BrowserConnector, BrowserHandle};
use crate::core::config::SessionConfig;
use crate::errors::{ConnectionError, Result, WardenError};
use crate::types::TabId;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The simulated external browser process.
#[derive(Debug, Default)]
pub struct RemoteBrowser {
    running: AtomicBool,
    tab_counter: AtomicUsize,
    tabs: Mutex<Vec<(TabId, String)>>,
}

impl RemoteBrowser {
    /// A remote browser that is already running, as if launched out of band.
    pub fn started() -> Arc<Self> {
        let remote = Arc::new(Self::default());
        remote.running.store(true, Ordering::SeqCst);
        remote
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Simulate the browser closing a tab on its own.
    pub fn close_tab_remotely(&self, tab: &TabId) {
        self.tabs
            .lock()
            .expect("tab lock")
            .retain(|(id, _)| id != tab);
    }

    fn open_tab(&self, url: &str) -> TabId {
        let n = self.tab_counter.fetch_add(1, Ordering::SeqCst);
        let id = TabId::from(format!("tab-{n}"));
        self.tabs
            .lock()
            .expect("tab lock")
            .push((id.clone(), url.to_string()));
        id
    }
}

/// Scriptable connector. Every connect/launch records the branch it ran.
pub struct StubBrowser {
    pub remote: Arc<RemoteBrowser>,
    /// Refuse all connection attempts.
    pub refuse: bool,
    /// Never complete a connection attempt (for timeout tests).
    pub hang: bool,
    pub branches: Arc<Mutex<Vec<&'static str>>>,
}

impl StubBrowser {
    pub fn new() -> Self {
        Self::with_remote(Arc::new(RemoteBrowser::default()))
    }

    pub fn with_remote(remote: Arc<RemoteBrowser>) -> Self {
        Self {
            remote,
            refuse: false,
            hang: false,
            branches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Branches attempted so far, in order.
    pub fn attempted_branches(&self) -> Vec<&'static str> {
        self.branches.lock().expect("branch lock").clone()
    }

    /// Mint a live handle directly, as an external caller would when passing
    /// an already-open browser into a session.
    pub fn live_handle(&self) -> StubHandle {
        self.remote.running.store(true, Ordering::SeqCst);
        StubHandle::new(self.remote.clone())
    }

    async fn connect(&self, branch: &'static str, target: &str) -> Result<StubHandle> {
        self.branches.lock().expect("branch lock").push(branch);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.refuse || !self.remote.is_running() {
            return Err(ConnectionError::Refused {
                branch,
                target: target.to_string(),
                reason: "stub remote is not accepting connections".to_string(),
            }
            .into());
        }
        Ok(StubHandle::new(self.remote.clone()))
    }
}

impl Default for StubBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserConnector for StubBrowser {
    type Handle = StubHandle;

    async fn connect_cdp(&self, url: &str, _timeout: Duration) -> Result<Self::Handle> {
        self.connect("cdp", url).await
    }

    async fn connect_ws(&self, url: &str, _timeout: Duration) -> Result<Self::Handle> {
        self.connect("websocket", url).await
    }

    async fn attach_by_pid(&self, pid: u32, _timeout: Duration) -> Result<Self::Handle> {
        self.connect("pid attach", &format!("pid {pid}")).await
    }

    async fn launch(
        &self,
        _config: &SessionConfig,
        user_data_dir: Option<&Path>,
    ) -> Result<Self::Handle> {
        let branch = if user_data_dir.is_some() {
            "persistent launch"
        } else {
            "ephemeral launch"
        };
        self.branches.lock().expect("branch lock").push(branch);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.refuse {
            return Err(ConnectionError::NotFound {
                branch: "launch",
                target: "stub executable".to_string(),
                reason: "stub launch disabled".to_string(),
            }
            .into());
        }
        self.remote.running.store(true, Ordering::SeqCst);
        Ok(StubHandle::new(self.remote.clone()))
    }
}

/// Handle onto the simulated remote browser.
pub struct StubHandle {
    remote: Arc<RemoteBrowser>,
    released: AtomicBool,
    /// Value returned from `evaluate`; defaults to a settled page probe.
    pub eval_result: Mutex<Value>,
    /// Scripts evaluated through this handle, in order.
    pub evaluated: Mutex<Vec<String>>,
}

impl StubHandle {
    pub fn new(remote: Arc<RemoteBrowser>) -> Self {
        Self {
            remote,
            released: AtomicBool::new(false),
            eval_result: Mutex::new(json!({"readyState": "complete", "resources": 0})),
            evaluated: Mutex::new(Vec::new()),
        }
    }

    pub fn remote(&self) -> &Arc<RemoteBrowser> {
        &self.remote
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) || !self.remote.is_running() {
            return Err(WardenError::Browser("stub handle released".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserHandle for StubHandle {
    async fn open_tab(&self, url: Option<&str>) -> Result<TabId> {
        self.ensure_live()?;
        Ok(self.remote.open_tab(url.unwrap_or("about:blank")))
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> Result<()> {
        self.ensure_live()?;
        let mut tabs = self.remote.tabs.lock().expect("tab lock");
        let entry = tabs
            .iter_mut()
            .find(|(id, _)| id == tab)
            .ok_or_else(|| WardenError::UnknownTab(tab.clone()))?;
        entry.1 = url.to_string();
        Ok(())
    }

    async fn close_tab(&self, tab: &TabId) -> Result<()> {
        self.ensure_live()?;
        let mut tabs = self.remote.tabs.lock().expect("tab lock");
        let index = tabs
            .iter()
            .position(|(id, _)| id == tab)
            .ok_or_else(|| WardenError::UnknownTab(tab.clone()))?;
        tabs.remove(index);
        Ok(())
    }

    async fn list_tabs(&self) -> Result<Vec<TabId>> {
        self.ensure_live()?;
        let tabs = self.remote.tabs.lock().expect("tab lock");
        Ok(tabs.iter().map(|(id, _)| id.clone()).collect())
    }

    async fn current_url(&self, tab: &TabId) -> Result<String> {
        self.ensure_live()?;
        let tabs = self.remote.tabs.lock().expect("tab lock");
        tabs.iter()
            .find(|(id, _)| id == tab)
            .map(|(_, url)| url.clone())
            .ok_or_else(|| WardenError::UnknownTab(tab.clone()))
    }

    async fn evaluate(&self, _tab: &TabId, script: &str) -> Result<Value> {
        self.ensure_live()?;
        self.evaluated
            .lock()
            .expect("script lock")
            .push(script.to_string());
        Ok(self.eval_result.lock().expect("eval lock").clone())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.remote.running.store(false, Ordering::SeqCst);
            self.remote.tabs.lock().expect("tab lock").clear();
        }
        Ok(())
    }

    async fn detach(&mut self) -> Result<()> {
        // Local handle released; the remote process keeps running.
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}
