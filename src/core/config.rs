use crate::errors::{Result, WardenError};
use crate::security::DomainMatcher;
use crate::types::Viewport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fully materialized session options. Every field holds a concrete value;
/// layered construction goes through [`ConfigOverrides`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    // How to obtain a browser. At most one of cdp_url / wss_url / browser_pid
    // may be set; with none set, user_data_dir selects a persistent launch.
    pub cdp_url: Option<String>,
    pub wss_url: Option<String>,
    pub browser_pid: Option<u32>,
    pub user_data_dir: Option<PathBuf>,
    pub executable_path: Option<PathBuf>,
    pub launch_args: Vec<String>,

    // Browser behavior
    pub headless: bool,
    pub viewport: Option<Viewport>,
    pub no_viewport: bool,
    pub user_agent: Option<String>,

    // Security
    pub allowed_domains: Vec<String>,
    pub disable_security: bool,

    // Lifecycle
    pub keep_alive: bool,

    // Timing
    pub connect_timeout: Duration,
    pub minimum_wait_page_load: Duration,
    pub wait_for_network_idle: Duration,
    pub maximum_wait_page_load: Duration,

    // Persisted state at the boundary
    pub cookies_file: Option<PathBuf>,
    pub storage_state_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cdp_url: None,
            wss_url: None,
            browser_pid: None,
            user_data_dir: Some(default_user_data_dir()),
            executable_path: None,
            launch_args: vec![],
            headless: true,
            viewport: Some(Viewport::default()),
            no_viewport: false,
            user_agent: None,
            allowed_domains: vec![],
            disable_security: false,
            keep_alive: false,
            connect_timeout: Duration::from_secs(30),
            minimum_wait_page_load: Duration::from_millis(250),
            wait_for_network_idle: Duration::from_millis(500),
            maximum_wait_page_load: Duration::from_secs(5),
            cookies_file: None,
            storage_state_file: None,
        }
    }
}

impl SessionConfig {
    /// Check internal consistency. Connection-source exclusivity is enforced
    /// separately by the resolver, which reports it as `AmbiguousSpec`.
    pub fn validate(&self) -> Result<()> {
        if self.viewport.is_some() && self.no_viewport {
            return Err(WardenError::Validation(
                "viewport and no_viewport are mutually exclusive".to_string(),
            ));
        }
        if let Some(viewport) = &self.viewport {
            if viewport.width == 0 || viewport.height == 0 {
                return Err(WardenError::Validation(format!(
                    "viewport {}x{} has a zero dimension",
                    viewport.width, viewport.height
                )));
            }
        }
        if self.minimum_wait_page_load > self.maximum_wait_page_load {
            return Err(WardenError::Validation(format!(
                "minimum_wait_page_load ({:?}) exceeds maximum_wait_page_load ({:?})",
                self.minimum_wait_page_load, self.maximum_wait_page_load
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(WardenError::Validation(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        // Surface bad allow-list patterns before any navigation is attempted.
        DomainMatcher::new(&self.allowed_domains)?;
        Ok(())
    }

    /// Materialize a profile layer and a session layer into one config.
    /// Session-level values strictly override profile-level ones per key;
    /// unset keys fall through to defaults.
    pub fn resolve(profile: &ConfigOverrides, session: &ConfigOverrides) -> Result<Self> {
        ConfigOverrides::merge(profile, session).materialize()
    }
}

/// One override layer: every option optional, unset keys inherit from the
/// layer below (another `ConfigOverrides`, or the defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub cdp_url: Option<String>,
    pub wss_url: Option<String>,
    pub browser_pid: Option<u32>,
    pub user_data_dir: Option<Option<PathBuf>>,
    pub executable_path: Option<PathBuf>,
    pub launch_args: Option<Vec<String>>,
    pub headless: Option<bool>,
    pub viewport: Option<Option<Viewport>>,
    pub no_viewport: Option<bool>,
    pub user_agent: Option<String>,
    pub allowed_domains: Option<Vec<String>>,
    pub disable_security: Option<bool>,
    pub keep_alive: Option<bool>,
    pub connect_timeout: Option<Duration>,
    pub minimum_wait_page_load: Option<Duration>,
    pub wait_for_network_idle: Option<Duration>,
    pub maximum_wait_page_load: Option<Duration>,
    pub cookies_file: Option<PathBuf>,
    pub storage_state_file: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Per-key merge: any key set in `over` wins, everything else comes from
    /// `base`. Total, and idempotent: `merge(merge(b, a), a) == merge(b, a)`.
    pub fn merge(base: &ConfigOverrides, over: &ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            cdp_url: over.cdp_url.clone().or_else(|| base.cdp_url.clone()),
            wss_url: over.wss_url.clone().or_else(|| base.wss_url.clone()),
            browser_pid: over.browser_pid.or(base.browser_pid),
            user_data_dir: over
                .user_data_dir
                .clone()
                .or_else(|| base.user_data_dir.clone()),
            executable_path: over
                .executable_path
                .clone()
                .or_else(|| base.executable_path.clone()),
            launch_args: over.launch_args.clone().or_else(|| base.launch_args.clone()),
            headless: over.headless.or(base.headless),
            viewport: over.viewport.or(base.viewport),
            no_viewport: over.no_viewport.or(base.no_viewport),
            user_agent: over.user_agent.clone().or_else(|| base.user_agent.clone()),
            allowed_domains: over
                .allowed_domains
                .clone()
                .or_else(|| base.allowed_domains.clone()),
            disable_security: over.disable_security.or(base.disable_security),
            keep_alive: over.keep_alive.or(base.keep_alive),
            connect_timeout: over.connect_timeout.or(base.connect_timeout),
            minimum_wait_page_load: over.minimum_wait_page_load.or(base.minimum_wait_page_load),
            wait_for_network_idle: over.wait_for_network_idle.or(base.wait_for_network_idle),
            maximum_wait_page_load: over.maximum_wait_page_load.or(base.maximum_wait_page_load),
            cookies_file: over
                .cookies_file
                .clone()
                .or_else(|| base.cookies_file.clone()),
            storage_state_file: over
                .storage_state_file
                .clone()
                .or_else(|| base.storage_state_file.clone()),
        }
    }

    /// Fill unset keys with defaults and validate the result.
    pub fn materialize(&self) -> Result<SessionConfig> {
        let defaults = SessionConfig::default();
        let config = SessionConfig {
            cdp_url: self.cdp_url.clone(),
            wss_url: self.wss_url.clone(),
            browser_pid: self.browser_pid,
            user_data_dir: self
                .user_data_dir
                .clone()
                .unwrap_or(defaults.user_data_dir),
            executable_path: self.executable_path.clone(),
            launch_args: self.launch_args.clone().unwrap_or(defaults.launch_args),
            headless: self.headless.unwrap_or(defaults.headless),
            viewport: self.viewport.unwrap_or(defaults.viewport),
            no_viewport: self.no_viewport.unwrap_or(defaults.no_viewport),
            user_agent: self.user_agent.clone(),
            allowed_domains: self
                .allowed_domains
                .clone()
                .unwrap_or(defaults.allowed_domains),
            disable_security: self.disable_security.unwrap_or(defaults.disable_security),
            keep_alive: self.keep_alive.unwrap_or(defaults.keep_alive),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            minimum_wait_page_load: self
                .minimum_wait_page_load
                .unwrap_or(defaults.minimum_wait_page_load),
            wait_for_network_idle: self
                .wait_for_network_idle
                .unwrap_or(defaults.wait_for_network_idle),
            maximum_wait_page_load: self
                .maximum_wait_page_load
                .unwrap_or(defaults.maximum_wait_page_load),
            cookies_file: self.cookies_file.clone(),
            storage_state_file: self.storage_state_file.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn default_user_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("browser-warden")
        .join("profile")
}
