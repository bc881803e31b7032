use crate::core::browser::{BrowserConnector, BrowserHandle};
use crate::core::config::SessionConfig;
use crate::errors::{ConnectionError, Result, WardenError};
use crate::types::TabId;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Chrome connector over the DevTools protocol.
pub struct ChromeConnector;

impl ChromeConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect_ws_inner(
        ws_url: String,
        branch: &'static str,
        target: &str,
    ) -> Result<ChromeHandle> {
        let target = target.to_string();
        let browser = tokio::task::spawn_blocking(move || Browser::connect(ws_url))
            .await
            .map_err(|e| WardenError::Browser(format!("connect task failed: {e}")))?
            .map_err(|e| ConnectionError::Refused {
                branch,
                target,
                reason: e.to_string(),
            })?;
        Ok(ChromeHandle::remote(browser))
    }
}

impl Default for ChromeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserConnector for ChromeConnector {
    type Handle = ChromeHandle;

    async fn connect_cdp(&self, url: &str, timeout: Duration) -> Result<Self::Handle> {
        let version_url = format!("{}/json/version", url.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WardenError::Browser(e.to_string()))?;

        let response = client
            .get(&version_url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, url, timeout))?;
        if !response.status().is_success() {
            return Err(ConnectionError::NotFound {
                branch: "cdp",
                target: url.to_string(),
                reason: format!("{} from {version_url}", response.status()),
            }
            .into());
        }

        let version: Value = response
            .json()
            .await
            .map_err(|e| WardenError::Browser(e.to_string()))?;
        let ws_url = version
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConnectionError::NotFound {
                branch: "cdp",
                target: url.to_string(),
                reason: "endpoint reported no webSocketDebuggerUrl".to_string(),
            })?;
        debug!(ws_url, "resolved CDP endpoint to websocket");
        Self::connect_ws_inner(ws_url.to_string(), "cdp", url).await
    }

    async fn connect_ws(&self, url: &str, _timeout: Duration) -> Result<Self::Handle> {
        Self::connect_ws_inner(url.to_string(), "websocket", url).await
    }

    async fn attach_by_pid(&self, pid: u32, timeout: Duration) -> Result<Self::Handle> {
        let port = debug_port_of_pid(pid)?;
        debug!(pid, port, "found remote debugging port");
        self.connect_cdp(&format!("http://127.0.0.1:{port}"), timeout)
            .await
    }

    async fn launch(
        &self,
        config: &SessionConfig,
        user_data_dir: Option<&Path>,
    ) -> Result<Self::Handle> {
        let config = config.clone();
        let user_data_dir = user_data_dir.map(Path::to_path_buf);
        let browser = tokio::task::spawn_blocking(move || launch_blocking(&config, user_data_dir))
            .await
            .map_err(|e| WardenError::Browser(format!("launch task failed: {e}")))??;
        Ok(ChromeHandle::launched(browser))
    }
}

fn launch_blocking(config: &SessionConfig, user_data_dir: Option<PathBuf>) -> Result<Browser> {
    let window_size_arg = config
        .viewport
        .filter(|_| !config.no_viewport)
        .map(|v| format!("--window-size={},{}", v.width, v.height));
    let user_agent_arg = config
        .user_agent
        .as_ref()
        .map(|ua| format!("--user-agent={ua}"));

    let mut args = vec![
        OsStr::new("--no-sandbox"),
        OsStr::new("--disable-dev-shm-usage"),
    ];
    if let Some(ref size_arg) = window_size_arg {
        args.push(OsStr::new(size_arg));
    }
    if let Some(ref ua_arg) = user_agent_arg {
        args.push(OsStr::new(ua_arg));
    }
    for arg in &config.launch_args {
        args.push(OsStr::new(arg));
    }

    let launch_options = LaunchOptions::default_builder()
        .headless(config.headless)
        .path(config.executable_path.clone())
        .user_data_dir(user_data_dir)
        .args(args)
        .build()
        .map_err(|e| WardenError::Validation(format!("bad launch options: {e}")))?;

    Browser::new(launch_options).map_err(|e| map_launch_error(e, config))
}

fn map_launch_error(err: anyhow::Error, config: &SessionConfig) -> WardenError {
    let reason = err.to_string();
    let target = config
        .executable_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "chrome".to_string());
    if reason.contains("executable") || reason.contains("auto detect") {
        ConnectionError::NotFound {
            branch: "launch",
            target,
            reason,
        }
        .into()
    } else {
        ConnectionError::Refused {
            branch: "launch",
            target,
            reason,
        }
        .into()
    }
}

fn map_reqwest_error(err: reqwest::Error, target: &str, timeout: Duration) -> WardenError {
    if err.is_timeout() {
        ConnectionError::Timeout {
            branch: "cdp",
            target: target.to_string(),
            waited_ms: timeout.as_millis() as u64,
        }
        .into()
    } else {
        ConnectionError::Refused {
            branch: "cdp",
            target: target.to_string(),
            reason: err.to_string(),
        }
        .into()
    }
}

#[cfg(target_os = "linux")]
fn debug_port_of_pid(pid: u32) -> Result<u16> {
    let cmdline =
        std::fs::read(format!("/proc/{pid}/cmdline")).map_err(|e| ConnectionError::NotFound {
            branch: "pid attach",
            target: format!("pid {pid}"),
            reason: e.to_string(),
        })?;
    for arg in cmdline.split(|b| *b == 0) {
        let arg = String::from_utf8_lossy(arg);
        if let Some(port) = arg.strip_prefix("--remote-debugging-port=") {
            return port.parse().map_err(|_| {
                ConnectionError::NotFound {
                    branch: "pid attach",
                    target: format!("pid {pid}"),
                    reason: format!("unparseable debugging port '{port}'"),
                }
                .into()
            });
        }
    }
    Err(ConnectionError::NotFound {
        branch: "pid attach",
        target: format!("pid {pid}"),
        reason: "process has no --remote-debugging-port argument".to_string(),
    }
    .into())
}

#[cfg(not(target_os = "linux"))]
fn debug_port_of_pid(pid: u32) -> Result<u16> {
    Err(ConnectionError::NotFound {
        branch: "pid attach",
        target: format!("pid {pid}"),
        reason: "pid attach is only supported on Linux".to_string(),
    }
    .into())
}

/// Live Chrome connection. Exclusively owned by its session; released exactly
/// once through `close` or `detach`.
pub struct ChromeHandle {
    browser: Option<Browser>,
    launched: bool,
}

impl ChromeHandle {
    fn launched(browser: Browser) -> Self {
        Self {
            browser: Some(browser),
            launched: true,
        }
    }

    fn remote(browser: Browser) -> Self {
        Self {
            browser: Some(browser),
            launched: false,
        }
    }

    fn browser(&self) -> Result<&Browser> {
        self.browser
            .as_ref()
            .ok_or_else(|| WardenError::Browser("browser handle already released".to_string()))
    }

    fn tabs_snapshot(&self) -> Result<Vec<Arc<Tab>>> {
        let tabs = self
            .browser()?
            .get_tabs()
            .lock()
            .map_err(|_| WardenError::Browser("tab registry lock poisoned".to_string()))?;
        Ok(tabs.iter().cloned().collect())
    }

    fn find_tab(&self, tab: &TabId) -> Result<Arc<Tab>> {
        self.tabs_snapshot()?
            .into_iter()
            .find(|t| {
                let id: &str = t.get_target_id().as_ref();
                id == tab.as_str()
            })
            .ok_or_else(|| WardenError::UnknownTab(tab.clone()))
    }
}

#[async_trait]
impl BrowserHandle for ChromeHandle {
    async fn open_tab(&self, url: Option<&str>) -> Result<TabId> {
        let tab = self
            .browser()?
            .new_tab()
            .map_err(|e| WardenError::Browser(e.to_string()))?;
        if let Some(url) = url {
            tab.navigate_to(url)
                .map_err(|e| WardenError::Browser(e.to_string()))?;
            tab.wait_until_navigated()
                .map_err(|e| WardenError::Browser(e.to_string()))?;
        }
        let id: &str = tab.get_target_id().as_ref();
        Ok(TabId::from(id))
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> Result<()> {
        let tab = self.find_tab(tab)?;
        tab.navigate_to(url)
            .map_err(|e| WardenError::Browser(e.to_string()))?;
        tab.wait_until_navigated()
            .map_err(|e| WardenError::Browser(e.to_string()))?;
        Ok(())
    }

    async fn close_tab(&self, tab: &TabId) -> Result<()> {
        let tab = self.find_tab(tab)?;
        tab.close(false)
            .map_err(|e| WardenError::Browser(e.to_string()))?;
        Ok(())
    }

    async fn list_tabs(&self) -> Result<Vec<TabId>> {
        Ok(self
            .tabs_snapshot()?
            .iter()
            .map(|t| {
                let id: &str = t.get_target_id().as_ref();
                TabId::from(id)
            })
            .collect())
    }

    async fn current_url(&self, tab: &TabId) -> Result<String> {
        Ok(self.find_tab(tab)?.get_url())
    }

    async fn evaluate(&self, tab: &TabId, script: &str) -> Result<Value> {
        let tab = self.find_tab(tab)?;
        // Object results only cross the protocol by reference; serialize in
        // the page and parse on this side so callers always get plain JSON.
        let wrapped = format!("JSON.stringify({script})");
        let result = tab
            .evaluate(&wrapped, false)
            .map_err(|e| WardenError::Browser(e.to_string()))?;
        Ok(match result.value {
            Some(Value::String(raw)) => {
                serde_json::from_str(&raw).unwrap_or(Value::String(raw))
            }
            Some(value) => value,
            None => Value::Null,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            debug!("tearing down chrome connection");
            drop(browser);
        }
        Ok(())
    }

    async fn detach(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            if self.launched {
                // Dropping a launched Browser reaps the child process, which
                // would defeat keep_alive; leak the local handle instead and
                // leave the process for the next connect.
                warn!("detaching from launched browser; process left running");
                std::mem::forget(browser);
            } else {
                drop(browser);
            }
        }
        Ok(())
    }
}
