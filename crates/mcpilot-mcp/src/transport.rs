//! Line-delimited JSON-RPC session over a pair of byte streams.
//!
//! A background reader task routes each response to the request waiting on
//! its id. When the stream ends, or the session is closed, every waiter is
//! released with a `Disconnected` error instead of hanging.

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use mcpilot_core::{McpilotError, McpilotResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type Waiters = HashMap<u64, oneshot::Sender<JsonRpcResponse>>;

/// `None` once the session is closed.
type Pending = Arc<Mutex<Option<Waiters>>>;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A JSON-RPC session with one tool server.
pub struct RpcSession {
    label: String,
    writer: tokio::sync::Mutex<Writer>,
    pending: Pending,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Removes a waiter if the request future is dropped early (timeout, abort).
struct WaiterGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if let Some(waiters) = self.pending.lock().as_mut() {
            waiters.remove(&self.id);
        }
    }
}

impl RpcSession {
    /// Starts a session and its reader task.
    pub fn start<R, W>(label: impl Into<String>, reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let task = tokio::spawn(read_loop(label.clone(), reader, pending.clone()));

        Arc::new(Self {
            label,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(Some(task)),
        })
    }

    /// Whether the session can still carry requests.
    pub fn is_open(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Sends a request and waits for its response.
    ///
    /// Remote JSON-RPC errors are returned inside the response; transport
    /// failures surface as [`McpilotError::Disconnected`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> McpilotResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            let waiters = pending
                .as_mut()
                .ok_or_else(|| self.disconnected(method))?;
            waiters.insert(id, tx);
        }
        let _guard = WaiterGuard {
            pending: &self.pending,
            id,
        };

        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        self.write_line(&line).await.map_err(|e| {
            McpilotError::Disconnected(format!("{}: failed to send '{method}': {e}", self.label))
        })?;

        rx.await.map_err(|_| self.disconnected(method))
    }

    /// Sends a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> McpilotResult<()> {
        if !self.is_open() {
            return Err(self.disconnected(method));
        }
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_line(&line).await.map_err(|e| {
            McpilotError::Disconnected(format!("{}: failed to send '{method}': {e}", self.label))
        })
    }

    /// Closes the session.
    ///
    /// Waiters are released first, then the reader is stopped and the write
    /// half shut down. Closing twice is a no-op.
    pub async fn close(&self) -> McpilotResult<()> {
        let released = self.pending.lock().take();
        let Some(waiters) = released else {
            return Ok(());
        };
        if !waiters.is_empty() {
            debug!(server = %self.label, in_flight = waiters.len(), "releasing in-flight requests");
        }
        drop(waiters);

        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    fn disconnected(&self, method: &str) -> McpilotError {
        McpilotError::Disconnected(format!(
            "{}: connection closed while awaiting '{method}'",
            self.label
        ))
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.abort();
        }
    }
}

async fn read_loop<R>(label: String, reader: R, pending: Pending)
where
    R: AsyncRead + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(server = %label, "tool server stdout closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                    Ok(resp) if resp.method.is_some() => {
                        debug!(server = %label, method = ?resp.method, "ignoring server-initiated message");
                    }
                    Ok(resp) => {
                        let Some(id) = resp.id else { continue };
                        let waiter = pending.lock().as_mut().and_then(|w| w.remove(&id));
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(resp);
                            }
                            None => debug!(server = %label, id, "response for unknown request"),
                        }
                    }
                    Err(e) => {
                        debug!(server = %label, line = %trimmed, error = %e, "non-JSON-RPC line from tool server");
                    }
                }
            }
            Err(e) => {
                error!(server = %label, error = %e, "error reading tool server stdout");
                break;
            }
        }
    }

    if let Some(waiters) = pending.lock().take() {
        if !waiters.is_empty() {
            warn!(server = %label, in_flight = waiters.len(), "tool server went away with requests in flight");
        }
    }
}
