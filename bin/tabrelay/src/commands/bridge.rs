use tabrelay_bridge::server::{self, HostChannel};
use tabrelay_core::{Config, Paths};
use tracing::info;

/// Start the WebSocket listener and bring up the host channel.
pub async fn run(host: Option<String>, port: Option<u16>, stdio: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let mut config = Config::load_or_default(&paths)?;

    if let Some(host) = host {
        config.bridge.host = host;
    }
    if let Some(port) = port {
        config.bridge.port = port;
    }

    let channel = if stdio {
        HostChannel::Stdio
    } else {
        HostChannel::Spawn
    };
    info!(stdio, "bridge starting");
    server::run(config, channel).await?;
    Ok(())
}
