//! WebSocket front door for browser clients.
//!
//! Binds loopback, spawns the host process, and pumps every accepted
//! connection through the [`Mux`]. Auth is a shared token checked during the
//! WebSocket handshake; failures close with code 4401 after the upgrade so
//! clients see the reason instead of a bare 1006.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use tabrelay_core::{Config, Error, Result, WsRequest};

use crate::mux::Mux;

#[derive(Clone)]
struct BridgeState {
    mux: Arc<Mux>,
    auth_token: Option<String>,
}

/// How the bridge reaches its host process.
pub enum HostChannel {
    /// Spawn `tabrelay host` (or the configured command) as a child and use
    /// the child's stdio.
    Spawn,
    /// Use this process's own stdin/stdout; an outer supervisor owns the
    /// pipe. Logging must stay on stderr in this mode.
    Stdio,
}

pub async fn run(config: Config, channel: HostChannel) -> Result<()> {
    let bind = format!("{}:{}", config.bridge.host, config.bridge.port);
    let timeout = Duration::from_secs(config.bridge.request_timeout_secs);
    let (mux, host_rx) = Mux::new(timeout, config.bridge.max_frame_bytes);

    let shutdown = mux.shutdown_token();
    match channel {
        HostChannel::Spawn => {
            let mut child = spawn_host(&config)?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::Transport("host stdin unavailable".to_string()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| Error::Transport("host stdout unavailable".to_string()))?;
            mux.spawn_host_link(stdout, stdin, host_rx);

            let exit_token = shutdown.clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => error!(%status, "host process exited"),
                    Err(e) => error!(error = %e, "failed waiting on host process"),
                }
                exit_token.cancel();
            });
        }
        HostChannel::Stdio => {
            mux.spawn_host_link(tokio::io::stdin(), tokio::io::stdout(), host_rx);
        }
    }

    let state = BridgeState {
        mux: mux.clone(),
        auth_token: config.bridge.auth_token.clone(),
    };
    let app = Router::new()
        .route("/ws", get(handle_ws_upgrade))
        .route("/healthz", get(handle_healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, auth = config.bridge.auth_token.is_some(), "bridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => info!("host link closed; shutting down"),
                _ = tokio::signal::ctrl_c() => info!("interrupt received; shutting down"),
            }
        })
        .await?;
    Ok(())
}

fn spawn_host(config: &Config) -> Result<tokio::process::Child> {
    let argv: Vec<String> = if config.bridge.host_command.is_empty() {
        let exe = std::env::current_exe()?;
        vec![exe.to_string_lossy().into_owned(), "host".to_string()]
    } else {
        config.bridge.host_command.clone()
    };
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Config("host command is empty".to_string()))?;

    info!(command = %argv.join(" "), "spawning host process");
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    Ok(child)
}

async fn handle_healthz(State(state): State<BridgeState>) -> impl IntoResponse {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(std::time::Instant::now);

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.mux.conn_count().await,
        "pending": state.mux.pending_count().await,
        "uptimeSecs": start.elapsed().as_secs(),
    }))
}

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn token_from_query(query: Option<&str>) -> Option<String> {
    let q = query?;
    url::form_urlencoded::parse(q.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<BridgeState>,
    req: axum::extract::Request,
) -> impl IntoResponse {
    // Check the token here but report the failure over the socket, so the
    // client gets close code 4401 instead of a failed upgrade.
    let token_valid = match &state.auth_token {
        Some(t) if !t.is_empty() => {
            let from_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(|h| h.strip_prefix("Bearer ").is_some_and(|rest| secure_eq(rest, t)))
                .unwrap_or(false);
            let from_query = token_from_query(req.uri().query())
                .map(|v| secure_eq(&v, t))
                .unwrap_or(false);
            from_header || from_query
        }
        _ => true,
    };

    ws.on_upgrade(move |socket| async move {
        if !token_valid {
            let mut socket = socket;
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: 4401,
                    reason: std::borrow::Cow::Borrowed("Unauthorized"),
                })))
                .await;
            return;
        }
        handle_ws_connection(socket, state).await;
    })
}

async fn handle_ws_connection(socket: WebSocket, state: BridgeState) {
    let (conn_id, mut replies) = state.mux.register_conn().await;
    info!(conn_id, "client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            let text = match serde_json::to_string(&reply) {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "unserializable reply");
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(conn_id, error = %e, "websocket receive error");
                break;
            }
        };
        match msg {
            WsMessage::Text(text) => match serde_json::from_str::<WsRequest>(&text) {
                Ok(req) => state.mux.submit(conn_id, req).await,
                Err(e) => {
                    // answer only this connection; no correlation id is spent
                    let ws_request_id = serde_json::from_str::<serde_json::Value>(&text)
                        .ok()
                        .and_then(|v| {
                            v.get("wsRequestId")
                                .and_then(|id| id.as_str())
                                .map(|s| s.to_string())
                        })
                        .unwrap_or_default();
                    warn!(conn_id, error = %e, "malformed request frame");
                    state
                        .mux
                        .reject(conn_id, &ws_request_id, &format!("invalid request: {e}"))
                        .await;
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.mux.deregister_conn(conn_id).await;
    send_task.abort();
    info!(conn_id, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_eq() {
        assert!(secure_eq("abc123", "abc123"));
        assert!(!secure_eq("abc123", "abc124"));
        assert!(!secure_eq("abc", "abc123"));
        assert!(secure_eq("", ""));
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(
            token_from_query(Some("token=s3cret&x=1")).as_deref(),
            Some("s3cret")
        );
        assert_eq!(
            token_from_query(Some("x=1&token=a%2Bb")).as_deref(),
            Some("a+b")
        );
        assert!(token_from_query(Some("x=1")).is_none());
        assert!(token_from_query(None).is_none());
    }
}
