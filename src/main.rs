use browser_warden::{ChromeConnector, ConfigOverrides, SessionManager};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "browser_warden=debug".into()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());

    let overrides = ConfigOverrides {
        allowed_domains: std::env::var("WARDEN_ALLOWED_DOMAINS")
            .ok()
            .map(|raw| raw.split(',').map(|d| d.trim().to_string()).collect()),
        cdp_url: std::env::var("WARDEN_CDP_URL").ok(),
        ..Default::default()
    };

    let mut session =
        SessionManager::from_overrides(ChromeConnector::new(), &ConfigOverrides::default(), &overrides)?;
    session.start().await?;
    info!(session = session.id(), "session started");

    let settle = session.navigate(&url).await?;
    info!(
        url,
        waited_ms = settle.waited.as_millis() as u64,
        "navigation complete"
    );
    info!(current = session.current_url().await?, "current page");

    session.close().await?;
    Ok(())
}
