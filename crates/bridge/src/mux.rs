//! Request multiplexer between WebSocket clients and the single host process.
//!
//! Every client request is assigned a fresh correlation id before it crosses
//! the framed channel; the reply (or a synthesized timeout) is routed back to
//! the originating connection under the client's own `wsRequestId`. The host
//! never learns about connections and clients never see correlation ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tabrelay_core::{CommandEnvelope, WsReply, WsRequest};

use crate::codec::{self, FrameDecoder};

struct Pending {
    conn_id: u64,
    ws_request_id: String,
    command: String,
    created_at: Instant,
    timeout_task: JoinHandle<()>,
}

pub struct Mux {
    pending: Mutex<HashMap<u64, Pending>>,
    conns: Mutex<HashMap<u64, mpsc::UnboundedSender<WsReply>>>,
    next_request_id: AtomicU64,
    next_conn_id: AtomicU64,
    host_tx: mpsc::Sender<Vec<u8>>,
    timeout: Duration,
    max_frame: usize,
    shutdown: CancellationToken,
}

impl Mux {
    /// Returns the mux and the receiver carrying encoded frames bound for
    /// the host's input stream.
    pub fn new(timeout: Duration, max_frame: usize) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (host_tx, host_rx) = mpsc::channel(64);
        let mux = Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            conns: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            next_conn_id: AtomicU64::new(1),
            host_tx,
            timeout,
            max_frame,
            shutdown: CancellationToken::new(),
        });
        (mux, host_rx)
    }

    /// Cancelled when the host stream closes. The server stops accepting
    /// once this fires; without a host there is nothing to serve.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn register_conn(&self) -> (u64, mpsc::UnboundedReceiver<WsReply>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns.lock().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drops the connection and every pending entry it owns. The host keeps
    /// processing those requests; its late replies hit the unknown-id path.
    pub async fn deregister_conn(&self, conn_id: u64) {
        self.conns.lock().await.remove(&conn_id);
        let mut pending = self.pending.lock().await;
        let stale: Vec<u64> = pending
            .iter()
            .filter(|(_, p)| p.conn_id == conn_id)
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            if let Some(entry) = pending.remove(&id) {
                entry.timeout_task.abort();
                debug!(request_id = id, conn_id, "dropped pending request for closed connection");
            }
        }
    }

    /// Forward a client request to the host under a fresh correlation id.
    /// Failures to reach the host are answered locally on the originating
    /// connection; they never vanish.
    pub async fn submit(self: &Arc<Self>, conn_id: u64, req: WsRequest) {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let env = CommandEnvelope {
            request_id,
            command: req.command.clone(),
            params: req.params,
            tab_id: req.tab_id,
        };

        let frame = match serde_json::to_vec(&env)
            .map_err(tabrelay_core::Error::from)
            .and_then(|payload| codec::encode_frame_limited(&payload, self.max_frame))
        {
            Ok(frame) => frame,
            Err(e) => {
                self.reply_local(conn_id, &req.ws_request_id, &format!("cannot encode request: {e}"))
                    .await;
                return;
            }
        };

        let timeout_task = self.spawn_timeout(request_id);
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                request_id,
                Pending {
                    conn_id,
                    ws_request_id: req.ws_request_id,
                    command: req.command,
                    created_at: Instant::now(),
                    timeout_task,
                },
            );
        }

        if self.host_tx.send(frame).await.is_err() {
            if let Some(entry) = self.pending.lock().await.remove(&request_id) {
                entry.timeout_task.abort();
                self.reply_local(entry.conn_id, &entry.ws_request_id, "host process unavailable")
                    .await;
            }
        }
    }

    /// Route a host reply back to whoever asked. Unknown correlation ids
    /// (timed out, duplicate, or from a disconnected client) are dropped.
    pub async fn dispatch_response(&self, resp: tabrelay_core::ResponseEnvelope) {
        let entry = { self.pending.lock().await.remove(&resp.request_id) };
        let Some(entry) = entry else {
            warn!(
                request_id = resp.request_id,
                "response for unknown correlation id; dropping"
            );
            return;
        };
        entry.timeout_task.abort();
        debug!(
            request_id = resp.request_id,
            command = %entry.command,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "host reply routed"
        );

        let reply = WsReply::from_response(entry.ws_request_id, resp);
        let conns = self.conns.lock().await;
        match conns.get(&entry.conn_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(conn_id = entry.conn_id, "connection closed before reply arrived"),
        }
    }

    /// Bridge-synthesized error for one connection, bypassing the host.
    pub async fn reject(&self, conn_id: u64, ws_request_id: &str, message: &str) {
        self.reply_local(conn_id, ws_request_id, message).await;
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn conn_count(&self) -> usize {
        self.conns.lock().await.len()
    }

    async fn reply_local(&self, conn_id: u64, ws_request_id: &str, message: &str) {
        let conns = self.conns.lock().await;
        if let Some(tx) = conns.get(&conn_id) {
            let _ = tx.send(WsReply::local_error(ws_request_id, message));
        }
    }

    fn spawn_timeout(self: &Arc<Self>, request_id: u64) -> JoinHandle<()> {
        let mux = Arc::clone(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = { mux.pending.lock().await.remove(&request_id) };
            if let Some(entry) = entry {
                warn!(
                    request_id,
                    command = %entry.command,
                    conn_id = entry.conn_id,
                    "no host reply within {}s; synthesizing timeout",
                    timeout.as_secs()
                );
                mux.reply_local(
                    entry.conn_id,
                    &entry.ws_request_id,
                    &format!("command '{}' timed out after {}s", entry.command, timeout.as_secs()),
                )
                .await;
            }
        })
    }

    /// Pump frames between the mux and the host's stdio. Reader EOF or a
    /// read error is fatal for the whole bridge: the shutdown token fires.
    pub fn spawn_host_link<R, W>(
        self: &Arc<Self>,
        stdout: R,
        stdin: W,
        mut outbound: mpsc::Receiver<Vec<u8>>,
    ) -> (JoinHandle<()>, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = stdin.write_all(&frame).await {
                    error!(error = %e, "host stdin write failed");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!(error = %e, "host stdin flush failed");
                    break;
                }
            }
        });

        let mux = Arc::clone(self);
        let reader = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut decoder = FrameDecoder::with_limit(mux.max_frame);
            let mut chunk = vec![0u8; 16 * 1024];
            'read: loop {
                let n = match stdout.read(&mut chunk).await {
                    Ok(0) => {
                        error!("host stream closed (EOF)");
                        break 'read;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        error!(error = %e, "host stream read failed");
                        break 'read;
                    }
                };
                decoder.push(&chunk[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(payload)) => match codec::decode_response(&payload) {
                            Ok(resp) => mux.dispatch_response(resp).await,
                            Err(e) => warn!(error = %e, "undecodable record from host; skipping"),
                        },
                        Ok(None) => break,
                        Err(e) => warn!(error = %e, "framing error on host stream; resyncing"),
                    }
                }
            }
            mux.shutdown.cancel();
        });

        (reader, writer)
    }
}
