//! Host process loop: framed commands in on stdin, framed responses out on
//! stdout.
//!
//! Commands execute concurrently, each in its own task, so a slow navigation
//! never blocks an unrelated session. Responses funnel through a single
//! writer task and leave in completion order; the bridge correlates them by
//! `requestId`, never by position.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tabrelay_bridge::codec::{self, FrameDecoder};
use tabrelay_core::{Config, Error, Paths, ResponseEnvelope, Result};

use crate::chrome::ensure_browser;
use crate::dispatch::Dispatcher;
use crate::session::SessionManager;

const READ_CHUNK: usize = 16 * 1024;
const REPLY_QUEUE: usize = 64;

/// Bring up the browser backend and serve commands on stdio until EOF.
pub async fn run(config: Config) -> Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;

    let browser = Arc::new(ensure_browser(&config.browser, &paths).await?);
    let sessions = SessionManager::new(
        browser.clone(),
        config.session.clone(),
        (config.browser.viewport_width, config.browser.viewport_height),
    );
    let eviction = sessions.spawn_eviction_loop();
    let dispatcher = Arc::new(Dispatcher::new(sessions, browser, &config));

    info!("host ready, serving commands on stdio");
    let result = run_loop(
        dispatcher,
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.bridge.max_frame_bytes,
    )
    .await;
    eviction.abort();
    result
}

/// Serve envelopes from `input` until it reaches EOF, then drain in-flight
/// responses before returning.
pub async fn run_loop<R, W>(
    dispatcher: Arc<Dispatcher>,
    mut input: R,
    output: W,
    max_frame: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::channel::<ResponseEnvelope>(REPLY_QUEUE);
    let writer = tokio::spawn(write_replies(output, reply_rx, max_frame));

    let mut decoder = FrameDecoder::with_limit(max_frame);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = input.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        decoder.push(&chunk[..n]);
        loop {
            match decoder.next_frame() {
                Ok(Some(payload)) => dispatch_frame(&dispatcher, &reply_tx, payload).await,
                Ok(None) => break,
                // the decoder has already resynced past the bad record
                Err(e) => warn!(error = %e, "dropped oversized frame"),
            }
        }
    }

    debug!("input closed, draining in-flight responses");
    // in-flight tasks hold their own sender clones; the writer exits once
    // the last of them finishes
    drop(reply_tx);
    match writer.await {
        Ok(result) => result,
        Err(e) => Err(Error::Transport(format!("reply writer failed: {e}"))),
    }
}

async fn dispatch_frame(
    dispatcher: &Arc<Dispatcher>,
    reply_tx: &mpsc::Sender<ResponseEnvelope>,
    payload: Vec<u8>,
) {
    match codec::decode_command(&payload) {
        Ok(envelope) => {
            let dispatcher = dispatcher.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let response = dispatcher.handle(envelope).await;
                if reply_tx.send(response).await.is_err() {
                    debug!("reply channel closed before a response could be sent");
                }
            });
        }
        Err(e) => {
            // salvage the correlation id so the request does not hang on
            // the far side
            let request_id = recover_request_id(&payload);
            warn!(request_id, error = %e, "unparseable command frame");
            let response =
                ResponseEnvelope::error(request_id, format!("bad command frame: {e}"));
            if reply_tx.send(response).await.is_err() {
                debug!("reply channel closed before a response could be sent");
            }
        }
    }
}

/// A malformed frame may still carry a readable `requestId`; 0 when not.
fn recover_request_id(payload: &[u8]) -> u64 {
    serde_json::from_slice::<Value>(payload)
        .ok()
        .and_then(|v| v.get("requestId").and_then(|id| id.as_u64()))
        .unwrap_or(0)
}

async fn write_replies<W>(
    mut output: W,
    mut reply_rx: mpsc::Receiver<ResponseEnvelope>,
    max_frame: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = reply_rx.recv().await {
        let payload = serde_json::to_vec(&response)?;
        let frame = match codec::encode_frame_limited(&payload, max_frame) {
            Ok(frame) => frame,
            Err(e) => {
                error!(request_id = response.request_id, error = %e, "response exceeded frame limit");
                let fallback = ResponseEnvelope::error(
                    response.request_id,
                    "response exceeded the frame size limit",
                );
                codec::encode_frame_limited(&serde_json::to_vec(&fallback)?, max_frame)?
            }
        };
        output.write_all(&frame).await?;
        output.flush().await?;
    }
    Ok(())
}
