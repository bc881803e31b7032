//! Composition root: owns the config, resolves the connection, drives the
//! lifecycle, and gates every navigation through the domain allow-list.

use crate::browser::navigation::{NavigationWaiter, PageSettle};
use crate::core::browser::{BrowserConnector, BrowserHandle, SuppliedHandle};
use crate::core::config::{ConfigOverrides, SessionConfig};
use crate::core::connection::{ConnectionResolver, ConnectionSpec, ResolvedConnection};
use crate::errors::{Result, WardenError};
use crate::security::DomainMatcher;
use crate::session::lifecycle::{SessionLifecycle, SessionState};
use crate::session::storage;
use crate::types::{CookieRecord, TabId};
use tracing::{debug, info, warn};

/// One automated browsing session.
///
/// All mutations flow through `&mut self`, so tab bookkeeping and focus
/// reassignment are serialized with respect to the caller. Multiple sessions
/// are independent and share no state.
pub struct SessionManager<C: BrowserConnector> {
    id: String,
    config: SessionConfig,
    connector: C,
    matcher: DomainMatcher,
    lifecycle: SessionLifecycle,
    connection: Option<ResolvedConnection<C::Handle>>,
}

impl<C: BrowserConnector> SessionManager<C> {
    pub fn new(connector: C, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let matcher = DomainMatcher::new(&config.allowed_domains)?;
        let keep_alive = config.keep_alive;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            connector,
            matcher,
            lifecycle: SessionLifecycle::new(keep_alive),
            connection: None,
        })
    }

    /// Build from a reusable profile layer plus session-level overrides.
    pub fn from_overrides(
        connector: C,
        profile: &ConfigOverrides,
        session: &ConfigOverrides,
    ) -> Result<Self> {
        Self::new(connector, SessionConfig::resolve(profile, session)?)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Which connection strategy this session resolved to, once started.
    pub fn connection_spec(&self) -> Option<&ConnectionSpec> {
        self.connection.as_ref().map(|c| &c.spec)
    }

    pub fn tabs(&self) -> &[TabId] {
        self.lifecycle.tabs()
    }

    /// The tab under automated control.
    pub fn current_page(&self) -> Option<&TabId> {
        self.lifecycle.agent_focus()
    }

    /// The tab the human is looking at.
    pub fn human_page(&self) -> Option<&TabId> {
        self.lifecycle.human_focus()
    }

    /// Start the session. Idempotent: starting an already-connected session
    /// is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        self.start_inner(None).await
    }

    /// Start the session around an externally supplied live handle instead
    /// of opening any new connection.
    pub async fn start_with(&mut self, supplied: SuppliedHandle<C::Handle>) -> Result<()> {
        self.start_inner(Some(supplied)).await
    }

    async fn start_inner(&mut self, supplied: Option<SuppliedHandle<C::Handle>>) -> Result<()> {
        match self.lifecycle.state() {
            SessionState::Connected => {
                debug!(session = %self.id, "start on a connected session is a no-op");
                return Ok(());
            }
            SessionState::Unstarted => {}
            state => {
                return Err(WardenError::InvalidState {
                    state: state.as_str(),
                    operation: "start",
                })
            }
        }

        self.lifecycle.begin_start()?;
        let resolved = ConnectionResolver::resolve(&self.connector, &self.config, supplied).await;
        let connection = match resolved {
            Ok(connection) => connection,
            Err(err) => {
                // Never leave a half-open session behind a failed start.
                self.lifecycle.fail_start();
                self.connection = None;
                return Err(err);
            }
        };

        info!(session = %self.id, branch = connection.spec.branch(), "session connected");
        self.lifecycle.mark_connected()?;
        let initial_tab = connection.initial_tab.clone();
        self.connection = Some(connection);

        if let Err(err) = self.finish_start(initial_tab).await {
            // Partial failure after connecting must still land in a clean
            // Closed state, never a half-open session.
            warn!(session = %self.id, %err, "post-connect setup failed, closing");
            let _ = self.close().await;
            return Err(err);
        }

        self.restore_cookies().await;
        self.restore_storage_state().await;
        Ok(())
    }

    async fn finish_start(&mut self, initial_tab: Option<TabId>) -> Result<()> {
        if let Some(tab) = initial_tab {
            self.lifecycle.register_tab(tab);
        }
        self.sync_tabs().await?;
        if self.lifecycle.tabs().is_empty() {
            let tab = self.handle()?.open_tab(Some("about:blank")).await?;
            self.lifecycle.register_tab(tab);
        }
        Ok(())
    }

    /// Navigate the agent-focused tab. The target is checked against the
    /// allow-list before anything reaches the browser; a denied navigation
    /// aborts with `NavigationBlocked` and leaves the session running.
    pub async fn navigate(&mut self, url: &str) -> Result<PageSettle> {
        self.require_connected("navigate")?;
        self.check_navigation(url)?;

        let tab = self
            .lifecycle
            .agent_focus()
            .cloned()
            .ok_or_else(|| WardenError::InvalidState {
                state: "connected",
                operation: "navigate without an open tab",
            })?;

        let handle = self.handle()?;
        handle.navigate(&tab, url).await?;
        let settle = NavigationWaiter::wait_until_stable(handle, &tab, &self.config).await?;
        debug!(session = %self.id, url, tab = %tab, "navigation settled");
        Ok(settle)
    }

    /// Open a tab, optionally at a URL (checked against the allow-list).
    /// The first tab opened becomes the focus target for both agent and
    /// human until reassigned.
    pub async fn open_tab(&mut self, url: Option<&str>) -> Result<TabId> {
        self.require_connected("open a tab")?;
        if let Some(url) = url {
            self.check_navigation(url)?;
        }
        let tab = self.handle()?.open_tab(url).await?;
        self.lifecycle.register_tab(tab.clone());
        Ok(tab)
    }

    /// Close a tab. Focus falls back to the most-recently-opened remaining
    /// tab.
    pub async fn close_tab(&mut self, tab: &TabId) -> Result<()> {
        self.require_connected("close a tab")?;
        if !self.lifecycle.contains(tab) {
            return Err(WardenError::UnknownTab(tab.clone()));
        }
        if let Err(err) = self.handle()?.close_tab(tab).await {
            // The tab may have closed on its own; bookkeeping still proceeds.
            debug!(session = %self.id, tab = %tab, %err, "browser-side tab close failed");
        }
        self.lifecycle.remove_tab(tab)
    }

    pub fn focus_agent(&mut self, tab: &TabId) -> Result<()> {
        self.lifecycle.focus_agent(tab)
    }

    pub fn focus_human(&mut self, tab: &TabId) -> Result<()> {
        self.lifecycle.focus_human(tab)
    }

    /// URL currently loaded in the agent-focused tab.
    pub async fn current_url(&self) -> Result<String> {
        let tab = self
            .lifecycle
            .agent_focus()
            .ok_or_else(|| WardenError::InvalidState {
                state: self.lifecycle.state().as_str(),
                operation: "read the current URL",
            })?;
        self.handle()?.current_url(tab).await
    }

    /// Reconcile the local tab set with what the browser reports, in the
    /// browser's order.
    pub async fn sync_tabs(&mut self) -> Result<()> {
        let live = self.handle()?.list_tabs().await?;
        self.lifecycle.sync(&live);
        Ok(())
    }

    /// Close the session. Idempotent; a second close is a no-op.
    ///
    /// With `keep_alive` set, only local bookkeeping is torn down and the
    /// remote browser stays running, reusable by a future resolve against
    /// the same endpoint. Otherwise the underlying connection (and any
    /// launched process) is released.
    pub async fn close(&mut self) -> Result<()> {
        if !self.lifecycle.begin_close()? {
            return Ok(());
        }

        self.persist_cookies().await;
        self.persist_storage_state().await;

        if let Some(connection) = self.connection.take() {
            let mut handle = connection.handle;
            let outcome = if self.lifecycle.keep_alive() {
                handle.detach().await
            } else {
                handle.close().await
            };
            if let Err(err) = outcome {
                // Teardown failures must not keep the session out of Closed.
                warn!(session = %self.id, %err, "error releasing browser connection");
            }
        }

        self.lifecycle.mark_closed();
        info!(session = %self.id, keep_alive = self.lifecycle.keep_alive(), "session closed");
        Ok(())
    }

    fn check_navigation(&self, url: &str) -> Result<()> {
        if self.config.disable_security {
            return Ok(());
        }
        if self.matcher.is_allowed_str(url)? {
            Ok(())
        } else {
            warn!(session = %self.id, url, "navigation blocked by allow-list");
            Err(WardenError::NavigationBlocked {
                url: url.to_string(),
            })
        }
    }

    fn require_connected(&self, operation: &'static str) -> Result<()> {
        if self.lifecycle.state() != SessionState::Connected {
            return Err(WardenError::InvalidState {
                state: self.lifecycle.state().as_str(),
                operation,
            });
        }
        Ok(())
    }

    fn handle(&self) -> Result<&C::Handle> {
        self.connection
            .as_ref()
            .map(|c| &c.handle)
            .ok_or_else(|| WardenError::Browser("session has no live connection".to_string()))
    }

    async fn restore_cookies(&self) {
        let Some(path) = self.config.cookies_file.clone() else {
            return;
        };
        let cookies = match storage::load_cookies(&path) {
            Ok(cookies) if !cookies.is_empty() => cookies,
            Ok(_) => return,
            Err(err) => {
                warn!(session = %self.id, %err, "could not read cookie file");
                return;
            }
        };
        if let Err(err) = self.inject_cookies(&cookies).await {
            warn!(session = %self.id, %err, "could not inject cookies");
        } else {
            debug!(session = %self.id, count = cookies.len(), "restored cookies");
        }
    }

    async fn inject_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        let tab = self
            .lifecycle
            .agent_focus()
            .ok_or_else(|| WardenError::Browser("no tab to inject cookies into".to_string()))?;
        let script = storage::cookie_injection_script(cookies)?;
        self.handle()?.evaluate(tab, &script).await?;
        Ok(())
    }

    async fn restore_storage_state(&self) {
        let Some(path) = self.config.storage_state_file.clone() else {
            return;
        };
        let state = match storage::load_storage_state(&path) {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(err) => {
                warn!(session = %self.id, %err, "could not read storage state");
                return;
            }
        };
        if !state.cookies.is_empty() {
            if let Err(err) = self.inject_cookies(&state.cookies).await {
                warn!(session = %self.id, %err, "could not replay stored cookies");
            }
        }
        let Some(tab) = self.lifecycle.agent_focus() else {
            return;
        };
        match storage::local_storage_injection_script(&state.origins) {
            Ok(script) => {
                if let Ok(handle) = self.handle() {
                    if let Err(err) = handle.evaluate(tab, &script).await {
                        warn!(session = %self.id, %err, "could not replay localStorage");
                    }
                }
            }
            Err(err) => warn!(session = %self.id, %err, "unusable storage state payload"),
        }
    }

    async fn persist_storage_state(&self) {
        let Some(path) = self.config.storage_state_file.clone() else {
            return;
        };
        let Some(tab) = self.lifecycle.agent_focus() else {
            return;
        };
        let Ok(handle) = self.handle() else {
            return;
        };
        let cookies = match handle.evaluate(tab, storage::COOKIE_EXTRACTION_SCRIPT).await {
            Ok(value) => storage::parse_extracted_cookies(value).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let origins = match handle
            .evaluate(tab, storage::LOCAL_STORAGE_SNAPSHOT_SCRIPT)
            .await
        {
            Ok(value) => value,
            Err(err) => {
                debug!(session = %self.id, %err, "localStorage snapshot failed during close");
                return;
            }
        };
        let state = storage::StorageState::new(cookies, origins);
        if let Err(err) = storage::save_storage_state(&path, &state) {
            warn!(session = %self.id, %err, "could not write storage state");
        }
    }

    async fn persist_cookies(&self) {
        let Some(path) = self.config.cookies_file.clone() else {
            return;
        };
        let Some(tab) = self.lifecycle.agent_focus() else {
            return;
        };
        let Ok(handle) = self.handle() else {
            return;
        };
        match handle.evaluate(tab, storage::COOKIE_EXTRACTION_SCRIPT).await {
            Ok(value) => match storage::parse_extracted_cookies(value) {
                Ok(cookies) => {
                    if let Err(err) = storage::save_cookies(&path, &cookies) {
                        warn!(session = %self.id, %err, "could not write cookie file");
                    }
                }
                Err(err) => {
                    warn!(session = %self.id, %err, "unexpected cookie payload");
                }
            },
            Err(err) => {
                debug!(session = %self.id, %err, "cookie extraction failed during close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::navigation::SettleReason;
    use crate::errors::ConnectionError;
    use crate::testing::{RemoteBrowser, StubBrowser};
    use std::time::Duration;

    fn fast_overrides() -> ConfigOverrides {
        ConfigOverrides {
            connect_timeout: Some(Duration::from_secs(1)),
            minimum_wait_page_load: Some(Duration::ZERO),
            wait_for_network_idle: Some(Duration::ZERO),
            maximum_wait_page_load: Some(Duration::from_secs(1)),
            ..Default::default()
        }
    }

    fn manager(over: ConfigOverrides, stub: StubBrowser) -> SessionManager<StubBrowser> {
        SessionManager::new(stub, over.materialize().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn start_launches_and_opens_an_initial_tab() {
        let stub = StubBrowser::new();
        let branches = stub.branches.clone();
        let mut session = manager(fast_overrides(), stub);

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(*branches.lock().unwrap(), vec!["persistent launch"]);
        assert_eq!(session.tabs().len(), 1);
        assert_eq!(session.current_page(), session.human_page());
    }

    #[tokio::test]
    async fn start_is_idempotent_once_connected() {
        let stub = StubBrowser::new();
        let branches = stub.branches.clone();
        let mut session = manager(fast_overrides(), stub);

        session.start().await.unwrap();
        session.start().await.unwrap();
        assert_eq!(branches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pid_config_selects_the_attach_branch_exclusively() {
        let stub = StubBrowser::with_remote(RemoteBrowser::started());
        let branches = stub.branches.clone();
        let mut session = manager(
            ConfigOverrides {
                browser_pid: Some(1234),
                ..fast_overrides()
            },
            stub,
        );

        session.start().await.unwrap();
        assert_eq!(*branches.lock().unwrap(), vec!["pid attach"]);
        assert_eq!(
            session.connection_spec(),
            Some(&ConnectionSpec::AttachToProcess { pid: 1234 })
        );
    }

    #[tokio::test]
    async fn ambiguous_spec_fails_before_any_connection_attempt() {
        let stub = StubBrowser::new();
        let branches = stub.branches.clone();
        let mut session = manager(
            ConfigOverrides {
                cdp_url: Some("http://localhost:9222".to_string()),
                browser_pid: Some(1234),
                ..fast_overrides()
            },
            stub,
        );

        let err = session.start().await.unwrap_err();
        assert!(matches!(
            err,
            WardenError::Connection(ConnectionError::AmbiguousSpec(_))
        ));
        assert!(branches.lock().unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn refused_connection_lands_in_a_clean_closed_state() {
        let mut stub = StubBrowser::new();
        stub.refuse = true;
        let mut session = manager(fast_overrides(), stub);

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, WardenError::Connection(_)));
        assert_eq!(session.state(), SessionState::Closed);
        // Closed is terminal; a restart is rejected.
        assert!(matches!(
            session.start().await,
            Err(WardenError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn hung_connection_surfaces_as_timeout_without_fallback() {
        let mut stub = StubBrowser::new();
        stub.hang = true;
        let branches = stub.branches.clone();
        let mut session = manager(
            ConfigOverrides {
                wss_url: Some("ws://localhost:9222/devtools".to_string()),
                connect_timeout: Some(Duration::from_millis(50)),
                ..fast_overrides()
            },
            stub,
        );

        let err = session.start().await.unwrap_err();
        assert!(matches!(
            err,
            WardenError::Connection(ConnectionError::Timeout { branch: "websocket", .. })
        ));
        // The websocket branch was the only one attempted.
        assert_eq!(*branches.lock().unwrap(), vec!["websocket"]);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn supplied_page_handle_is_wrapped_without_connecting() {
        let stub = StubBrowser::new();
        let handle = stub.live_handle();
        let page = handle.open_tab(Some("https://example.com")).await.unwrap();

        let connector = StubBrowser::with_remote(stub.remote.clone());
        let branches = connector.branches.clone();
        let mut session = manager(fast_overrides(), connector);
        session
            .start_with(SuppliedHandle::Page(handle, page.clone()))
            .await
            .unwrap();

        assert!(branches.lock().unwrap().is_empty());
        assert_eq!(
            session.connection_spec(),
            Some(&ConnectionSpec::UseSupplied { kind: "page" })
        );
        assert_eq!(session.current_page(), Some(&page));
        assert_eq!(session.current_url().await.unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn navigation_outside_the_allow_list_is_blocked() {
        let stub = StubBrowser::new();
        let mut session = manager(
            ConfigOverrides {
                allowed_domains: Some(vec!["example.com".to_string()]),
                ..fast_overrides()
            },
            stub,
        );
        session.start().await.unwrap();

        let err = session.navigate("https://evil.com").await.unwrap_err();
        assert!(matches!(err, WardenError::NavigationBlocked { .. }));
        // A blocked navigation never terminates the session.
        assert_eq!(session.state(), SessionState::Connected);

        let settle = session.navigate("https://example.com").await.unwrap();
        assert_eq!(settle.reason, SettleReason::NetworkIdle);
        assert_eq!(session.current_url().await.unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn subdomains_are_blocked_for_bare_host_patterns() {
        let stub = StubBrowser::new();
        let mut session = manager(
            ConfigOverrides {
                allowed_domains: Some(vec!["example.com".to_string()]),
                ..fast_overrides()
            },
            stub,
        );
        session.start().await.unwrap();

        assert!(matches!(
            session.navigate("https://sub.example.com").await,
            Err(WardenError::NavigationBlocked { .. })
        ));
    }

    #[tokio::test]
    async fn disable_security_bypasses_the_allow_list() {
        let stub = StubBrowser::new();
        let mut session = manager(
            ConfigOverrides {
                allowed_domains: Some(vec!["example.com".to_string()]),
                disable_security: Some(true),
                ..fast_overrides()
            },
            stub,
        );
        session.start().await.unwrap();
        session.navigate("https://anywhere.else").await.unwrap();
    }

    #[tokio::test]
    async fn blocked_url_cannot_be_opened_in_a_new_tab() {
        let stub = StubBrowser::new();
        let mut session = manager(
            ConfigOverrides {
                allowed_domains: Some(vec!["example.com".to_string()]),
                ..fast_overrides()
            },
            stub,
        );
        session.start().await.unwrap();

        assert!(matches!(
            session.open_tab(Some("https://evil.com")).await,
            Err(WardenError::NavigationBlocked { .. })
        ));
        session.open_tab(Some("https://example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn closing_the_agent_tab_falls_back_to_most_recent() {
        let stub = StubBrowser::new();
        let mut session = manager(fast_overrides(), stub);
        session.start().await.unwrap();

        let second = session.open_tab(None).await.unwrap();
        let third = session.open_tab(None).await.unwrap();
        session.focus_agent(&third).unwrap();
        session.close_tab(&third).await.unwrap();
        assert_eq!(session.current_page(), Some(&second));
    }

    #[tokio::test]
    async fn focusing_an_unknown_tab_errors() {
        let stub = StubBrowser::new();
        let mut session = manager(fast_overrides(), stub);
        session.start().await.unwrap();

        let ghost = TabId::from("ghost");
        assert!(matches!(
            session.focus_agent(&ghost),
            Err(WardenError::UnknownTab(_))
        ));
        assert!(matches!(
            session.close_tab(&ghost).await,
            Err(WardenError::UnknownTab(_))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_tears_the_remote_down() {
        let stub = StubBrowser::new();
        let remote = stub.remote.clone();
        let mut session = manager(fast_overrides(), stub);
        session.start().await.unwrap();
        assert!(remote.is_running());

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!remote.is_running());

        // Second close is a no-op with the same terminal state.
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn keep_alive_close_leaves_the_remote_reusable() {
        let stub = StubBrowser::new();
        let remote = stub.remote.clone();
        let mut session = manager(
            ConfigOverrides {
                keep_alive: Some(true),
                ..fast_overrides()
            },
            stub,
        );
        session.start().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(remote.is_running());

        // A later resolve against the same endpoint reconnects.
        let mut next = manager(
            ConfigOverrides {
                cdp_url: Some("http://localhost:9222".to_string()),
                ..fast_overrides()
            },
            StubBrowser::with_remote(remote),
        );
        next.start().await.unwrap();
        assert_eq!(next.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn operations_after_close_are_rejected() {
        let stub = StubBrowser::new();
        let mut session = manager(fast_overrides(), stub);
        session.start().await.unwrap();
        session.close().await.unwrap();

        assert!(matches!(
            session.navigate("https://example.com").await,
            Err(WardenError::InvalidState { .. })
        ));
        assert!(matches!(
            session.open_tab(None).await,
            Err(WardenError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn externally_closed_tabs_are_discovered_on_sync() {
        let stub = StubBrowser::new();
        let remote = stub.remote.clone();
        let mut session = manager(fast_overrides(), stub);
        session.start().await.unwrap();
        let second = session.open_tab(None).await.unwrap();
        session.focus_agent(&second).unwrap();

        // The browser closes the tab on its own.
        remote.close_tab_remotely(&second);
        session.sync_tabs().await.unwrap();
        assert!(!session.tabs().contains(&second));
        assert_ne!(session.current_page(), Some(&second));
    }
}
