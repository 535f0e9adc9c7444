//! RPC client: id-correlated unary calls over a dialed connection.

use super::codec::{read_frame, write_frame, RequestFrame, ResponseFrame};
use super::status::Status;
use super::RpcError;
use crate::config::ClientConfig;
use crate::transport::{CloseHandle, Connection, ConnectionId, Dialer, ReadHalf, TransportResult, WriteHalf};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingCalls = DashMap<u64, oneshot::Sender<Result<Value, Status>>>;

/// Client side of an RPC connection. Clones share the connection, so calls may
/// be issued concurrently from several tasks.
#[derive(Debug, Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    connection_id: ConnectionId,
    config: ClientConfig,
    shared: Arc<ClientShared>,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<RequestFrame>,
    close_handle: CloseHandle,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct ClientShared {
    pending: PendingCalls,
    closed: AtomicBool,
}

impl ClientShared {
    /// Mark the connection dead and fail every call still waiting on it
    fn fail_all(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(Status::unavailable(reason)));
            }
        }
    }
}

/// Removes a call's pending entry when the call ends, including when the
/// caller drops the call future before a response arrives.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl RpcClient {
    /// Dial a new connection and start a client on it
    pub async fn connect<D>(dialer: &D, config: ClientConfig) -> TransportResult<Self>
    where
        D: Dialer + ?Sized,
    {
        let conn = dialer.dial().await?;
        Ok(Self::from_connection(conn, config))
    }

    /// Start a client on an already established connection
    pub fn from_connection(conn: Connection, config: ClientConfig) -> Self {
        let connection_id = conn.id();
        let close_handle = conn.close_handle();
        let (reader, writer) = conn.into_split();
        let shared = Arc::new(ClientShared::default());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_responses(
            reader,
            Arc::clone(&shared),
            config.max_frame_size,
        ));
        let writer_task = tokio::spawn(write_requests(
            writer,
            outbound_rx,
            Arc::clone(&shared),
            config.max_frame_size,
        ));

        debug!(connection_id = %connection_id, "RPC client connected");

        Self {
            inner: Arc::new(ClientInner {
                connection_id,
                config,
                shared,
                next_id: AtomicU64::new(1),
                outbound,
                close_handle,
                reader_task,
                writer_task,
            }),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::SeqCst)
    }

    /// Calls awaiting a response
    pub fn in_flight(&self) -> usize {
        self.inner.shared.pending.len()
    }

    /// Invoke `method` and wait for its typed response.
    ///
    /// Fails with `DeadlineExceeded` after the configured request timeout and
    /// with `Unavailable` if the connection is, or becomes, closed.
    pub async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, Status>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let shared = &self.inner.shared;
        if self.is_closed() {
            return Err(Status::unavailable("connection closed"));
        }

        let payload = serde_json::to_value(request)
            .map_err(|e| Status::invalid_argument(format!("failed to encode request: {e}")))?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        shared.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &shared.pending,
            id,
        };
        // The reader may have failed everything between the check above and the insert.
        if shared.closed.load(Ordering::SeqCst) {
            return Err(Status::unavailable("connection closed"));
        }

        debug!(request_id = id, method = method, "Sending RPC request");

        let frame = RequestFrame {
            id,
            method: method.to_string(),
            payload,
        };
        if self.inner.outbound.send(frame).is_err() {
            return Err(Status::unavailable("connection closed"));
        }

        let timeout = self.inner.config.request_timeout();
        let outcome = tokio::time::timeout(timeout, rx).await;

        let value = match outcome {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Status::unavailable("connection closed before response")),
            Err(_) => {
                return Err(Status::deadline_exceeded(format!(
                    "{method} did not respond within {timeout:?}"
                )))
            }
        };

        serde_json::from_value(value)
            .map_err(|e| Status::internal(format!("failed to decode response: {e}")))
    }

    /// Close the connection. In-flight calls fail with `Unavailable`. Idempotent.
    pub fn close(&self) {
        self.inner.shared.fail_all("client closed");
        self.inner.close_handle.close();
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.close_handle.close();
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

async fn read_responses(mut reader: ReadHalf, shared: Arc<ClientShared>, max_frame_size: usize) {
    let connection_id = reader.id();
    loop {
        match read_frame::<_, ResponseFrame>(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => match shared.pending.remove(&frame.id) {
                Some((_, tx)) => {
                    let _ = tx.send(frame.result);
                }
                None => debug!(request_id = frame.id, "Discarding response for abandoned call"),
            },
            Ok(None) => {
                debug!(connection_id = %connection_id, "RPC connection closed by server");
                break;
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "RPC client stopped reading");
                break;
            }
        }
    }
    shared.fail_all("connection closed");
}

async fn write_requests(
    mut writer: WriteHalf,
    mut outbound: mpsc::UnboundedReceiver<RequestFrame>,
    shared: Arc<ClientShared>,
    max_frame_size: usize,
) {
    while let Some(frame) = outbound.recv().await {
        let id = frame.id;
        match write_frame(&mut writer, &frame, max_frame_size).await {
            Ok(()) => {}
            Err(e @ RpcError::FrameTooLarge { .. }) => {
                if let Some((_, tx)) = shared.pending.remove(&id) {
                    let _ = tx.send(Err(e.into()));
                }
            }
            Err(e) => {
                warn!(request_id = id, error = %e, "RPC client failed to send request");
                shared.fail_all("connection closed");
                break;
            }
        }
    }
}
