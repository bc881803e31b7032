//! Session state machine and tab bookkeeping.
//!
//! `Unstarted → Starting → Connected → Closing → Closed`, with a failed start
//! jumping straight to `Closed` so no partially-started state is ever
//! observable. The tab set is a local view of the browser's tab list, kept in
//! the order tabs were reported open.

use crate::errors::{Result, WardenError};
use crate::types::TabId;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Starting,
    Connected,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local lifecycle and tab state of one session.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
    /// Open tabs in the order they were reported, oldest first.
    tabs: Vec<TabId>,
    agent_focus: Option<TabId>,
    human_focus: Option<TabId>,
    keep_alive: bool,
}

impl SessionLifecycle {
    pub fn new(keep_alive: bool) -> Self {
        Self {
            state: SessionState::Unstarted,
            tabs: Vec::new(),
            agent_focus: None,
            human_focus: None,
            keep_alive,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn tabs(&self) -> &[TabId] {
        &self.tabs
    }

    pub fn contains(&self, tab: &TabId) -> bool {
        self.tabs.contains(tab)
    }

    pub fn agent_focus(&self) -> Option<&TabId> {
        self.agent_focus.as_ref()
    }

    pub fn human_focus(&self) -> Option<&TabId> {
        self.human_focus.as_ref()
    }

    pub fn begin_start(&mut self) -> Result<()> {
        self.transition(SessionState::Unstarted, SessionState::Starting, "start")
    }

    pub fn mark_connected(&mut self) -> Result<()> {
        self.transition(SessionState::Starting, SessionState::Connected, "connect")
    }

    /// A failed start lands directly in `Closed`.
    pub fn fail_start(&mut self) {
        self.state = SessionState::Closed;
        self.clear_tabs();
    }

    /// Enter `Closing`. Returns `false` when there is nothing to do because
    /// the session is already closed (idempotent close) or never started.
    pub fn begin_close(&mut self) -> Result<bool> {
        match self.state {
            SessionState::Closed => Ok(false),
            SessionState::Unstarted => {
                self.state = SessionState::Closed;
                Ok(false)
            }
            SessionState::Connected | SessionState::Starting => {
                self.state = SessionState::Closing;
                Ok(true)
            }
            SessionState::Closing => Err(WardenError::InvalidState {
                state: self.state.as_str(),
                operation: "close",
            }),
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        self.clear_tabs();
    }

    /// Track a newly opened tab. The first tab becomes the default focus for
    /// both agent and human until explicitly reassigned.
    pub fn register_tab(&mut self, tab: TabId) {
        if self.tabs.contains(&tab) {
            return;
        }
        self.tabs.push(tab.clone());
        if self.agent_focus.is_none() {
            self.agent_focus = Some(tab.clone());
        }
        if self.human_focus.is_none() {
            self.human_focus = Some(tab);
        }
    }

    pub fn focus_agent(&mut self, tab: &TabId) -> Result<()> {
        if !self.contains(tab) {
            return Err(WardenError::UnknownTab(tab.clone()));
        }
        self.agent_focus = Some(tab.clone());
        Ok(())
    }

    pub fn focus_human(&mut self, tab: &TabId) -> Result<()> {
        if !self.contains(tab) {
            return Err(WardenError::UnknownTab(tab.clone()));
        }
        self.human_focus = Some(tab.clone());
        Ok(())
    }

    /// Remove a tab from the open set. A removed focus falls back to the
    /// most-recently-opened remaining tab, or to none.
    pub fn remove_tab(&mut self, tab: &TabId) -> Result<()> {
        let index = self
            .tabs
            .iter()
            .position(|t| t == tab)
            .ok_or_else(|| WardenError::UnknownTab(tab.clone()))?;
        self.tabs.remove(index);

        let fallback = self.tabs.last().cloned();
        if self.agent_focus.as_ref() == Some(tab) {
            self.agent_focus = fallback.clone();
        }
        if self.human_focus.as_ref() == Some(tab) {
            self.human_focus = fallback;
        }
        Ok(())
    }

    /// Reconcile the local view with the tab list the browser reports, in
    /// the browser's order: unseen tabs are registered, vanished tabs are
    /// dropped with the usual focus fallback.
    pub fn sync(&mut self, live: &[TabId]) {
        let gone: Vec<TabId> = self
            .tabs
            .iter()
            .filter(|t| !live.contains(t))
            .cloned()
            .collect();
        for tab in &gone {
            // Tabs in `gone` are from our own list, so removal cannot fail.
            let _ = self.remove_tab(tab);
        }
        for tab in live {
            self.register_tab(tab.clone());
        }
    }

    fn clear_tabs(&mut self) {
        self.tabs.clear();
        self.agent_focus = None;
        self.human_focus = None;
    }

    fn transition(
        &mut self,
        from: SessionState,
        to: SessionState,
        operation: &'static str,
    ) -> Result<()> {
        if self.state != from {
            return Err(WardenError::InvalidState {
                state: self.state.as_str(),
                operation,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: &str) -> TabId {
        TabId::from(id)
    }

    fn connected() -> SessionLifecycle {
        let mut lc = SessionLifecycle::new(false);
        lc.begin_start().unwrap();
        lc.mark_connected().unwrap();
        lc
    }

    #[test]
    fn happy_path_transitions() {
        let mut lc = SessionLifecycle::new(false);
        assert_eq!(lc.state(), SessionState::Unstarted);
        lc.begin_start().unwrap();
        assert_eq!(lc.state(), SessionState::Starting);
        lc.mark_connected().unwrap();
        assert_eq!(lc.state(), SessionState::Connected);
        assert!(lc.begin_close().unwrap());
        assert_eq!(lc.state(), SessionState::Closing);
        lc.mark_closed();
        assert_eq!(lc.state(), SessionState::Closed);
        assert!(lc.state().is_terminal());
    }

    #[test]
    fn failed_start_lands_in_closed() {
        let mut lc = SessionLifecycle::new(false);
        lc.begin_start().unwrap();
        lc.fail_start();
        assert_eq!(lc.state(), SessionState::Closed);
    }

    #[test]
    fn start_twice_is_rejected_by_the_machine() {
        let mut lc = connected();
        assert!(matches!(
            lc.begin_start(),
            Err(WardenError::InvalidState { .. })
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut lc = connected();
        assert!(lc.begin_close().unwrap());
        lc.mark_closed();
        assert!(!lc.begin_close().unwrap());
        assert_eq!(lc.state(), SessionState::Closed);
    }

    #[test]
    fn close_from_starting_is_valid() {
        let mut lc = SessionLifecycle::new(false);
        lc.begin_start().unwrap();
        assert!(lc.begin_close().unwrap());
    }

    #[test]
    fn close_before_start_is_a_local_noop() {
        let mut lc = SessionLifecycle::new(false);
        assert!(!lc.begin_close().unwrap());
        assert_eq!(lc.state(), SessionState::Closed);
    }

    #[test]
    fn first_tab_becomes_both_focuses() {
        let mut lc = connected();
        lc.register_tab(tab("a"));
        lc.register_tab(tab("b"));
        assert_eq!(lc.agent_focus(), Some(&tab("a")));
        assert_eq!(lc.human_focus(), Some(&tab("a")));
    }

    #[test]
    fn focus_reassignment_requires_known_tab() {
        let mut lc = connected();
        lc.register_tab(tab("a"));
        assert!(matches!(
            lc.focus_agent(&tab("ghost")),
            Err(WardenError::UnknownTab(_))
        ));
        lc.register_tab(tab("b"));
        lc.focus_agent(&tab("b")).unwrap();
        assert_eq!(lc.agent_focus(), Some(&tab("b")));
        assert_eq!(lc.human_focus(), Some(&tab("a")));
    }

    #[test]
    fn closing_focused_tab_falls_back_to_most_recent() {
        let mut lc = connected();
        lc.register_tab(tab("a"));
        lc.register_tab(tab("b"));
        lc.register_tab(tab("c"));
        lc.focus_agent(&tab("c")).unwrap();
        lc.remove_tab(&tab("c")).unwrap();
        assert_eq!(lc.agent_focus(), Some(&tab("b")));
        // Human focus was on "a" and is untouched.
        assert_eq!(lc.human_focus(), Some(&tab("a")));
    }

    #[test]
    fn closing_last_tab_clears_focus() {
        let mut lc = connected();
        lc.register_tab(tab("a"));
        lc.remove_tab(&tab("a")).unwrap();
        assert_eq!(lc.agent_focus(), None);
        assert_eq!(lc.human_focus(), None);
        assert!(lc.tabs().is_empty());
    }

    #[test]
    fn removing_unknown_tab_errors() {
        let mut lc = connected();
        assert!(matches!(
            lc.remove_tab(&tab("ghost")),
            Err(WardenError::UnknownTab(_))
        ));
    }

    #[test]
    fn sync_reconciles_with_browser_view() {
        let mut lc = connected();
        lc.register_tab(tab("a"));
        lc.register_tab(tab("b"));
        lc.focus_agent(&tab("b")).unwrap();

        // "b" closed remotely, "c" opened remotely.
        lc.sync(&[tab("a"), tab("c")]);
        assert_eq!(lc.tabs(), &[tab("a"), tab("c")]);
        // Focus fell back when "b" vanished.
        assert_eq!(lc.agent_focus(), Some(&tab("a")));
    }
}
