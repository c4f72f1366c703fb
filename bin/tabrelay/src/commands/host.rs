use tabrelay_core::{Config, Paths};
use tracing::info;

/// Start the browser host, serving framed commands on stdio.
pub async fn run(launch: bool, headless: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let mut config = Config::load_or_default(&paths)?;

    // flags only widen what the config allows
    if launch {
        config.browser.launch = true;
    }
    if headless {
        config.browser.headless = true;
    }

    info!(cdp = %config.browser.cdp_url, launch = config.browser.launch, "host starting");
    tabrelay_host::run(config).await?;
    Ok(())
}
