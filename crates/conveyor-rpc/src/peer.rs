//! Bidirectional RPC endpoint over a byte pipe.
//!
//! One [`RpcPeer`] sits on each end of the plugin channel. Outgoing calls
//! are multiplexed through an id-keyed pending map; incoming frames are
//! either responses (completing a pending call) or requests, which are
//! dispatched to the peer's [`ServiceHandler`] on their own task so that a
//! cheap `ping` is never stuck behind a long-running `execute`.
//!
//! Transport failures complete every pending call with
//! [`ChannelError::Closed`] and flip the peer to disconnected; they are
//! kept strictly apart from business failures, which arrive as
//! [`RpcError`] values inside response frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use conveyor_core::{ChannelError, RpcError};

use crate::proto::Envelope;

// =============================================================================
// ServiceHandler
// =============================================================================

/// Serves requests arriving from the remote side of the channel.
///
/// On the plugin side this dispatches the `plugin.*` surface; on the host
/// side it serves the `host.*` config capability back to the plugin.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

// =============================================================================
// CallError
// =============================================================================

/// Failure modes of [`RpcPeer::call`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The remote completed the call with a structured business error.
    /// The channel is still healthy.
    #[error(transparent)]
    Remote(RpcError),

    /// The channel itself failed; the caller should consider the peer
    /// disconnected.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl CallError {
    /// Whether this failure invalidates the channel.
    pub fn is_channel(&self) -> bool {
        matches!(self, CallError::Channel(_))
    }
}

// =============================================================================
// RpcPeer
// =============================================================================

type PendingSlot = oneshot::Sender<Result<Value, RpcError>>;

struct Shared {
    pending: Mutex<HashMap<u64, PendingSlot>>,
    outbound: mpsc::UnboundedSender<String>,
    connected: AtomicBool,
    next_id: AtomicU64,
    closed: Notify,
}

impl Shared {
    fn send_frame(&self, frame: &Envelope) {
        match serde_json::to_string(frame) {
            Ok(line) => {
                let _ = self.outbound.send(line);
            }
            Err(err) => warn!(error = %err, "dropping unencodable frame"),
        }
    }

    /// Marks the channel dead and fails every pending call.
    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("rpc channel disconnected");
        }
        self.pending.lock().clear();
        self.closed.notify_waiters();
    }
}

/// One end of the plugin channel.
///
/// Created with [`RpcPeer::spawn`] over the two halves of a pipe; owns a
/// reader task and a writer task for its lifetime. Dropping the peer (or
/// calling [`close`](Self::close)) tears both down.
pub struct RpcPeer {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RpcPeer {
    /// Starts a peer over `reader`/`writer`, serving incoming requests
    /// through `handler`.
    pub fn spawn<R, W>(reader: R, writer: W, handler: Arc<dyn ServiceHandler>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel::<String>();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            outbound,
            connected: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            closed: Notify::new(),
        });

        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared), handler));
        let writer_task = tokio::spawn(write_loop(writer, outbound_rx, Arc::clone(&shared)));

        Self {
            shared,
            tasks: Mutex::new(vec![reader_task, writer_task]),
        }
    }

    /// Whether the channel is still usable.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Resolves once the channel is no longer usable.
    pub async fn closed(&self) {
        loop {
            let notified = self.shared.closed.notified();
            if !self.is_connected() {
                return;
            }
            notified.await;
        }
    }

    /// Sends `method` and waits for the matching response under `deadline`.
    ///
    /// A timed-out call is forgotten: a late response for its id is
    /// discarded by the reader loop.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, CallError> {
        if !self.is_connected() {
            return Err(ChannelError::Closed.into());
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let frame = Envelope::request(id, method, params);
        let line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(err) => {
                self.shared.pending.lock().remove(&id);
                return Err(ChannelError::from(err).into());
            }
        };
        if self.shared.outbound.send(line).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(ChannelError::Closed.into());
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(rpc))) => Err(CallError::Remote(rpc)),
            // Sender dropped: the channel died while we waited.
            Ok(Err(_)) => Err(ChannelError::Closed.into()),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(ChannelError::Timeout(deadline).into())
            }
        }
    }

    /// Tears down both I/O tasks and fails pending calls.
    pub fn close(&self) {
        self.shared.disconnect();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// I/O loops
// =============================================================================

async fn read_loop<R>(reader: R, shared: Arc<Shared>, handler: Arc<dyn ServiceHandler>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(line) {
                    Ok(frame) if frame.is_request() => {
                        dispatch_request(frame, &shared, &handler);
                    }
                    Ok(frame) => complete_call(frame, &shared),
                    Err(err) => {
                        warn!(error = %err, "discarding undecodable frame");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "channel read failed");
                break;
            }
        }
    }
    shared.disconnect();
}

/// Runs the handler on its own task and routes its outcome back as a
/// response frame. Requests without an id are fire-and-forget.
fn dispatch_request(frame: Envelope, shared: &Arc<Shared>, handler: &Arc<dyn ServiceHandler>) {
    let Some(method) = frame.method else { return };
    let params = frame.params.unwrap_or(Value::Null);
    let id = frame.id;
    let shared = Arc::clone(shared);
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        let outcome = handler.handle(&method, params).await;
        if let Some(id) = id {
            let response = match outcome {
                Ok(result) => Envelope::response(id, result),
                Err(error) => Envelope::error_response(id, error),
            };
            shared.send_frame(&response);
        }
    });
}

fn complete_call(frame: Envelope, shared: &Arc<Shared>) {
    let Some(id) = frame.id else {
        warn!("discarding frame with neither method nor id");
        return;
    };
    let Some(slot) = shared.pending.lock().remove(&id) else {
        // Usually a response that raced a call timeout.
        trace!(id, "discarding response for unknown call");
        return;
    };
    let outcome = match frame.error {
        Some(error) => Err(error),
        None => Ok(frame.result.unwrap_or(Value::Null)),
    };
    let _ = slot.send(outcome);
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>, shared: Arc<Shared>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            debug!(error = %err, "channel write failed");
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
    shared.disconnect();
}
