//! Bounded page-settle gate.
//!
//! After a navigation is forwarded to the browser, control returns to the
//! caller only once the page looks stable: wait at least the minimum, then
//! poll for idle network up to the idle threshold, never exceeding the
//! maximum. Hitting the maximum yields control rather than an error.

use crate::core::browser::BrowserHandle;
use crate::core::config::SessionConfig;
use crate::errors::Result;
use crate::types::TabId;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot script: document ready state plus the number of resources the
/// page has fetched so far. A stable resource count is the idle signal.
const SETTLE_PROBE_SCRIPT: &str = r#"
    (function() {
        return {
            readyState: document.readyState,
            resources: performance.getEntriesByType('resource').length
        };
    })()
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleReason {
    /// Document complete and no network activity for the idle threshold.
    NetworkIdle,
    /// The maximum wait elapsed before the page went idle.
    MaximumWaitReached,
}

#[derive(Debug, Clone)]
pub struct PageSettle {
    pub reason: SettleReason,
    pub waited: Duration,
}

pub struct NavigationWaiter;

impl NavigationWaiter {
    /// Gate until the tab's page state is considered stable per the config's
    /// timing options.
    pub async fn wait_until_stable<H: BrowserHandle>(
        handle: &H,
        tab: &TabId,
        config: &SessionConfig,
    ) -> Result<PageSettle> {
        let started = Instant::now();
        tokio::time::sleep(config.minimum_wait_page_load).await;

        let mut last_resources: Option<u64> = None;
        let mut idle_since: Option<Instant> = None;

        loop {
            if started.elapsed() >= config.maximum_wait_page_load {
                let settle = PageSettle {
                    reason: SettleReason::MaximumWaitReached,
                    waited: started.elapsed(),
                };
                debug!(tab = %tab, waited_ms = settle.waited.as_millis() as u64,
                       "page did not go idle before the maximum wait");
                return Ok(settle);
            }

            // Probe failures (e.g. a navigation in flight) reset the idle
            // clock rather than aborting the gate.
            let probe = handle.evaluate(tab, SETTLE_PROBE_SCRIPT).await.ok();
            let (ready, resources) = match probe.as_ref() {
                Some(value) => (
                    value.get("readyState").and_then(|v| v.as_str()) == Some("complete"),
                    value.get("resources").and_then(|v| v.as_u64()),
                ),
                None => (false, None),
            };

            if ready && resources.is_some() && resources == last_resources {
                let quiet_for = idle_since.get_or_insert_with(Instant::now).elapsed();
                if quiet_for >= config.wait_for_network_idle {
                    let settle = PageSettle {
                        reason: SettleReason::NetworkIdle,
                        waited: started.elapsed(),
                    };
                    debug!(tab = %tab, waited_ms = settle.waited.as_millis() as u64,
                           "page settled");
                    return Ok(settle);
                }
            } else {
                idle_since = None;
            }
            last_resources = resources;

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
