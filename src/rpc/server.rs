//! RPC server: accept loop, per-connection dispatch and lifecycle handle.

use super::codec::{read_frame, write_frame, RequestFrame, ResponseFrame};
use super::registry::ServiceRegistry;
use super::status::Status;
use super::{RpcError, RpcResult};
use crate::config::ServerConfig;
use crate::transport::{Connection, Listener, TransportError, WriteHalf};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Serves the methods of a [`ServiceRegistry`] to every connection accepted from a [`Listener`].
#[derive(Debug)]
pub struct RpcServer {
    config: ServerConfig,
    registry: Arc<ServiceRegistry>,
}

impl RpcServer {
    /// Build a server, rejecting limits that could never serve a request.
    pub fn new(config: ServerConfig, registry: ServiceRegistry) -> RpcResult<Self> {
        if config.max_concurrent_requests == 0 {
            return Err(RpcError::InvalidConfiguration(
                "max_concurrent_requests must be positive".to_string(),
            ));
        }
        if config.max_frame_size == 0 {
            return Err(RpcError::InvalidConfiguration(
                "max_frame_size must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Serve until the listener is closed.
    ///
    /// Connections accepted before the close keep being served until their
    /// clients hang up.
    pub async fn serve(self, listener: Listener) -> RpcResult<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve until the listener is closed or `shutdown` resolves.
    ///
    /// On shutdown the listener and every live connection are closed.
    pub async fn serve_with_shutdown<F>(self, listener: Listener, shutdown: F) -> RpcResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            methods = ?self.registry.method_names(),
            max_frame_size = self.config.max_frame_size,
            max_concurrent_requests = self.config.max_concurrent_requests,
            "Starting RPC server"
        );

        let mut connections: JoinSet<RpcResult<()>> = JoinSet::new();
        tokio::pin!(shutdown);

        let listener_closed = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("RPC server shutdown requested");
                    listener.close();
                    break false;
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        let registry = Arc::clone(&self.registry);
                        let config = self.config.clone();
                        connections.spawn(serve_connection(conn, registry, config));
                    }
                    Err(TransportError::ListenerClosed) => {
                        info!("Listener closed, no longer accepting connections");
                        break true;
                    }
                    Err(e) => return Err(e.into()),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_outcome(joined);
                }
            }
        };

        if listener_closed {
            loop {
                tokio::select! {
                    () = &mut shutdown => break,
                    joined = connections.join_next() => match joined {
                        Some(joined) => log_connection_outcome(joined),
                        None => break,
                    },
                }
            }
        }

        let remaining = connections.len();
        connections.shutdown().await;
        info!(aborted_connections = remaining, "RPC server stopped");
        Ok(())
    }

    /// Run the server on a background task
    pub fn spawn(self, listener: Listener) -> RpcServerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_listener = listener.clone();

        let handle = tokio::spawn(async move {
            let result = self
                .serve_with_shutdown(serve_listener, async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = &result {
                error!(error = %e, "RPC server error");
            }
            result
        });

        RpcServerHandle {
            shutdown_tx: Some(shutdown_tx),
            handle,
            listener,
        }
    }
}

/// Handle for a running [`RpcServer`]. Dropping it also stops the server.
#[derive(Debug)]
pub struct RpcServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<RpcResult<()>>,
    listener: Listener,
}

impl RpcServerHandle {
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop accepting, close all connections and wait for the server task.
    pub async fn stop(mut self) -> RpcResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.listener.close();

        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) => Err(RpcError::ServerTask(e.to_string())),
        }
    }
}

fn log_connection_outcome(joined: Result<RpcResult<()>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "RPC connection ended with error"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(error = %e, "RPC connection task panicked"),
    }
}

async fn serve_connection(
    conn: Connection,
    registry: Arc<ServiceRegistry>,
    config: ServerConfig,
) -> RpcResult<()> {
    let connection_id = conn.id();
    debug!(connection_id = %connection_id, "Serving RPC connection");

    let (mut reader, mut writer) = conn.into_split();
    let (tx, mut rx) = mpsc::channel::<ResponseFrame>(config.max_concurrent_requests);

    let max_frame_size = config.max_frame_size;
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            write_response(&mut writer, frame, max_frame_size).await?;
        }
        RpcResult::Ok(())
    });

    let permits = Arc::new(Semaphore::new(config.max_concurrent_requests));
    let mut in_flight = JoinSet::new();

    loop {
        let request: RequestFrame = match read_frame(&mut reader, config.max_frame_size).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Dropping RPC connection after unreadable frame");
                writer_task.abort();
                return Err(e);
            }
        };

        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|e| RpcError::ServerTask(e.to_string()))?;

        debug!(
            connection_id = %connection_id,
            request_id = request.id,
            method = %request.method,
            "Dispatching RPC request"
        );

        let registry = Arc::clone(&registry);
        let tx = tx.clone();
        in_flight.spawn(async move {
            let RequestFrame {
                id,
                method,
                payload,
            } = request;
            let result = match AssertUnwindSafe(registry.dispatch(&method, payload))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    error!(
                        request_id = id,
                        method = %method,
                        panic = panic_message(&*panic),
                        "RPC handler panicked"
                    );
                    Err(Status::internal(format!("{method} handler panicked")))
                }
            };

            if tx.send(ResponseFrame { id, result }).await.is_err() {
                debug!(request_id = id, "Response dropped, connection writer is gone");
            }
            drop(permit);
        });

        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    drop(tx);

    debug!(connection_id = %connection_id, "RPC connection finished");
    writer_task
        .await
        .map_err(|e| RpcError::ServerTask(e.to_string()))?
}

/// Write a response, answering `ResourceExhausted` instead when it exceeds
/// the frame limit. Only stream failures are returned.
async fn write_response(
    writer: &mut WriteHalf,
    frame: ResponseFrame,
    max_frame_size: usize,
) -> RpcResult<()> {
    let id = frame.id;
    let too_large = match write_frame(writer, &frame, max_frame_size).await {
        Err(e @ RpcError::FrameTooLarge { .. }) => e,
        other => return other,
    };
    warn!(request_id = id, error = %too_large, "RPC response exceeds frame limit");

    // Nothing was written yet, so the caller can still be told why.
    let fallbacks = [
        Status::from(too_large),
        Status::resource_exhausted("response too large"),
    ];
    for status in fallbacks {
        let fallback = ResponseFrame {
            id,
            result: Err(status),
        };
        match write_frame(writer, &fallback, max_frame_size).await {
            Err(RpcError::FrameTooLarge { .. }) => continue,
            other => return other,
        }
    }

    warn!(
        request_id = id,
        max_frame_size, "Frame limit too small for any response, dropping it"
    );
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
