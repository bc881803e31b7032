use crate::core::config::SessionConfig;
use crate::errors::Result;
use crate::types::TabId;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Strategies for obtaining an exclusive browser handle.
///
/// Each method corresponds to one resolver branch; implementations must not
/// fall back between transports on their own.
#[async_trait]
pub trait BrowserConnector: Send + Sync {
    type Handle: BrowserHandle;

    /// Connect to a remote debugging HTTP endpoint (resolved to its
    /// websocket URL by the implementation).
    async fn connect_cdp(&self, url: &str, timeout: Duration) -> Result<Self::Handle>;

    /// Connect directly to a debugging websocket endpoint.
    async fn connect_ws(&self, url: &str, timeout: Duration) -> Result<Self::Handle>;

    /// Attach to the debugging endpoint of a local browser process.
    async fn attach_by_pid(&self, pid: u32, timeout: Duration) -> Result<Self::Handle>;

    /// Launch a new browser process. `user_data_dir` selects a persistent
    /// profile; `None` launches an ephemeral instance.
    async fn launch(
        &self,
        config: &SessionConfig,
        user_data_dir: Option<&Path>,
    ) -> Result<Self::Handle>;
}

/// Capability surface of a live browser connection.
///
/// Tab-mutating calls take `&self`: the handle is shared state owned by the
/// browser side, and the session serializes its own view through its single
/// control flow.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a new tab, optionally at a URL.
    async fn open_tab(&self, url: Option<&str>) -> Result<TabId>;

    /// Navigate an existing tab.
    async fn navigate(&self, tab: &TabId, url: &str) -> Result<()>;

    /// Close a single tab.
    async fn close_tab(&self, tab: &TabId) -> Result<()>;

    /// Tabs currently open on the browser side, in the order the browser
    /// reports them.
    async fn list_tabs(&self) -> Result<Vec<TabId>>;

    /// URL currently loaded in a tab.
    async fn current_url(&self, tab: &TabId) -> Result<String>;

    /// Evaluate a script in a tab, returning its JSON value.
    async fn evaluate(&self, tab: &TabId, script: &str) -> Result<Value>;

    /// Tear down the underlying browser. Releases the connection exactly
    /// once; subsequent calls are no-ops.
    async fn close(&mut self) -> Result<()>;

    /// Release the local handle while leaving the remote browser running
    /// (`keep_alive` close path). The process stays reusable by a future
    /// connect against the same endpoint.
    async fn detach(&mut self) -> Result<()>;
}

/// An externally supplied live handle, accepted by the resolver in place of
/// opening any new connection.
///
/// The closed set of kinds replaces runtime introspection: callers say what
/// they are handing over, and the session dispatches on that.
pub enum SuppliedHandle<H> {
    /// A whole browser; the session discovers its tabs.
    Browser(H),
    /// A browser context; treated as a browser-scope handle owning its tabs.
    Context(H),
    /// A single page plus the handle that owns it; the page becomes the
    /// initial focus target.
    Page(H, TabId),
}

impl<H> SuppliedHandle<H> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Browser(_) => "browser",
            Self::Context(_) => "context",
            Self::Page(..) => "page",
        }
    }

    pub(crate) fn into_parts(self) -> (H, Option<TabId>) {
        match self {
            Self::Browser(handle) | Self::Context(handle) => (handle, None),
            Self::Page(handle, tab) => (handle, Some(tab)),
        }
    }
}
