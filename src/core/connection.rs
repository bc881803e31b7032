//! Connection strategy selection and execution.
//!
//! The many optional "how to connect" inputs on [`SessionConfig`] collapse
//! into one tagged [`ConnectionSpec`] through a strict priority function.
//! Ambiguity is a hard error raised before any process or network activity;
//! a fully determined branch that fails is reported, never retried with a
//! different strategy.

use crate::core::browser::{BrowserConnector, SuppliedHandle};
use crate::core::config::SessionConfig;
use crate::errors::{ConnectionError, Result, WardenError};
use crate::types::TabId;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// The mutually exclusive ways to obtain a browser. Exactly one variant is
/// active per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSpec {
    /// Wrap a live handle supplied by the caller; no new connection.
    UseSupplied { kind: &'static str },
    /// Connect to a remote debugging HTTP endpoint.
    RemoteCdp { url: String },
    /// Connect to a debugging websocket endpoint.
    RemoteWs { url: String },
    /// Attach to a local browser process by pid.
    AttachToProcess { pid: u32 },
    /// Launch a new browser bound to an on-disk profile directory.
    LaunchPersistent { user_data_dir: PathBuf },
    /// Launch a new browser with no persisted profile.
    LaunchEphemeral,
}

impl ConnectionSpec {
    /// Short branch name used in logs and errors.
    pub fn branch(&self) -> &'static str {
        match self {
            Self::UseSupplied { .. } => "supplied handle",
            Self::RemoteCdp { .. } => "cdp",
            Self::RemoteWs { .. } => "websocket",
            Self::AttachToProcess { .. } => "pid attach",
            Self::LaunchPersistent { .. } => "persistent launch",
            Self::LaunchEphemeral => "ephemeral launch",
        }
    }

    /// Derive the single active strategy from the config plus whether a live
    /// handle was supplied.
    ///
    /// Any two concrete sources together are [`ConnectionError::AmbiguousSpec`]:
    /// resolution must not guess which one the caller meant.
    pub fn derive(
        config: &SessionConfig,
        supplied_kind: Option<&'static str>,
    ) -> std::result::Result<Self, ConnectionError> {
        let mut sources: Vec<&'static str> = Vec::new();
        if supplied_kind.is_some() {
            sources.push("a supplied handle");
        }
        if config.cdp_url.is_some() {
            sources.push("cdp_url");
        }
        if config.wss_url.is_some() {
            sources.push("wss_url");
        }
        if config.browser_pid.is_some() {
            sources.push("browser_pid");
        }
        if sources.len() > 1 {
            return Err(ConnectionError::AmbiguousSpec(format!(
                "{} are all set; supply exactly one connection source",
                sources.join(" and ")
            )));
        }

        if let Some(kind) = supplied_kind {
            return Ok(Self::UseSupplied { kind });
        }
        if let Some(url) = &config.cdp_url {
            return Ok(Self::RemoteCdp { url: url.clone() });
        }
        if let Some(url) = &config.wss_url {
            return Ok(Self::RemoteWs { url: url.clone() });
        }
        if let Some(pid) = config.browser_pid {
            return Ok(Self::AttachToProcess { pid });
        }
        if let Some(dir) = &config.user_data_dir {
            return Ok(Self::LaunchPersistent {
                user_data_dir: dir.clone(),
            });
        }
        Ok(Self::LaunchEphemeral)
    }
}

/// A live connection produced by [`ConnectionResolver::resolve`].
pub struct ResolvedConnection<H> {
    pub handle: H,
    pub spec: ConnectionSpec,
    /// Initial focus target when a page handle was supplied.
    pub initial_tab: Option<TabId>,
}

/// Executes the strategy selected by [`ConnectionSpec::derive`].
pub struct ConnectionResolver;

impl ConnectionResolver {
    /// Resolve exactly one connection strategy and execute it.
    ///
    /// The branch in progress is bounded by `config.connect_timeout`; on
    /// expiry it is abandoned and reported as `Timeout` without trying
    /// another branch.
    pub async fn resolve<C: BrowserConnector>(
        connector: &C,
        config: &SessionConfig,
        supplied: Option<SuppliedHandle<C::Handle>>,
    ) -> Result<ResolvedConnection<C::Handle>> {
        let spec = ConnectionSpec::derive(config, supplied.as_ref().map(|s| s.kind()))?;
        debug!(branch = spec.branch(), "resolving browser connection");

        let timeout = config.connect_timeout;
        match spec {
            ConnectionSpec::UseSupplied { .. } => {
                // Guaranteed by derive: UseSupplied is only selected when a
                // handle was passed in.
                let supplied = supplied.ok_or_else(|| {
                    WardenError::Browser("supplied handle vanished during resolve".to_string())
                })?;
                let (handle, initial_tab) = supplied.into_parts();
                Ok(ResolvedConnection {
                    handle,
                    spec,
                    initial_tab,
                })
            }
            ConnectionSpec::RemoteCdp { ref url } => {
                let handle =
                    bounded(connector.connect_cdp(url, timeout), timeout, "cdp", url).await?;
                Ok(ResolvedConnection {
                    handle,
                    spec,
                    initial_tab: None,
                })
            }
            ConnectionSpec::RemoteWs { ref url } => {
                let handle =
                    bounded(connector.connect_ws(url, timeout), timeout, "websocket", url).await?;
                Ok(ResolvedConnection {
                    handle,
                    spec,
                    initial_tab: None,
                })
            }
            ConnectionSpec::AttachToProcess { pid } => {
                let handle = bounded(
                    connector.attach_by_pid(pid, timeout),
                    timeout,
                    "pid attach",
                    &format!("pid {pid}"),
                )
                .await?;
                Ok(ResolvedConnection {
                    handle,
                    spec,
                    initial_tab: None,
                })
            }
            ConnectionSpec::LaunchPersistent { ref user_data_dir } => {
                let handle = bounded(
                    connector.launch(config, Some(user_data_dir)),
                    timeout,
                    "persistent launch",
                    &user_data_dir.display().to_string(),
                )
                .await?;
                Ok(ResolvedConnection {
                    handle,
                    spec,
                    initial_tab: None,
                })
            }
            ConnectionSpec::LaunchEphemeral => {
                let handle = bounded(
                    connector.launch(config, None),
                    timeout,
                    "ephemeral launch",
                    "temporary profile",
                )
                .await?;
                Ok(ResolvedConnection {
                    handle,
                    spec,
                    initial_tab: None,
                })
            }
        }
    }
}

/// Apply the caller-driven timeout to one branch. The future is dropped on
/// expiry; whatever the connector had in flight is abandoned.
async fn bounded<T>(
    fut: impl std::future::Future<Output = Result<T>>,
    timeout: Duration,
    branch: &'static str,
    target: &str,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout {
            branch,
            target: target.to_string(),
            waited_ms: timeout.as_millis() as u64,
        }
        .into()),
    }
}
