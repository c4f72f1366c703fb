use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tabrelay_core::{Config, Paths, WsReply, WsRequest};

/// Send one command over the bridge's WebSocket and print the reply.
pub async fn run(command: &str, params: &str, url: Option<String>, save: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let params: Value = serde_json::from_str(params)
        .map_err(|e| anyhow::anyhow!("--params is not valid JSON: {e}"))?;

    let mut url = url
        .unwrap_or_else(|| format!("ws://{}:{}/ws", config.bridge.host, config.bridge.port));
    if let Some(token) = config.bridge.auth_token.as_deref().filter(|t| !t.is_empty()) {
        let sep = if url.contains('?') { '&' } else { '?' };
        url = format!("{url}{sep}token={token}");
    }

    let (mut socket, _) = connect_async(url.as_str()).await?;
    let request = WsRequest {
        ws_request_id: format!("cli-{}", Uuid::new_v4()),
        command: command.to_string(),
        params,
        tab_id: None,
    };
    socket
        .send(Message::Text(serde_json::to_string(&request)?))
        .await?;

    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => {
                let reply: WsReply = serde_json::from_str(&text)?;
                if reply.ws_request_id != request.ws_request_id {
                    continue;
                }
                print_reply(reply, save, &paths)?;
                socket.close(None).await.ok();
                return Ok(());
            }
            Message::Close(frame) => {
                anyhow::bail!("connection closed before a reply arrived: {frame:?}");
            }
            _ => {}
        }
    }
    anyhow::bail!("connection ended before a reply arrived")
}

fn print_reply(reply: WsReply, save: bool, paths: &Paths) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(&reply)?;
    if save {
        if let Some(path) = save_artifact(&mut value, paths)? {
            eprintln!("saved {}", path.display());
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Pull a base64 `data` payload out of the result and write it to the media
/// directory; the printed reply references the file instead.
fn save_artifact(reply: &mut Value, paths: &Paths) -> anyhow::Result<Option<PathBuf>> {
    use base64::Engine;

    let result = match reply.get_mut("result") {
        Some(result) => result,
        None => return Ok(None),
    };
    let data = match result.get("data").and_then(|v| v.as_str()) {
        Some(data) if !data.is_empty() => data.to_string(),
        _ => return Ok(None),
    };
    let ext = match result.get("format").and_then(|v| v.as_str()).unwrap_or("bin") {
        "jpeg" => "jpg",
        other => other,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.as_bytes())
        .map_err(|e| anyhow::anyhow!("result.data is not valid base64: {e}"))?;
    std::fs::create_dir_all(paths.media_dir())?;
    let path = paths.media_dir().join(format!("{}.{ext}", Uuid::new_v4()));
    std::fs::write(&path, bytes)?;

    result["data"] = Value::String(path.display().to_string());
    Ok(Some(path))
}
