//! Rendezvous listener producing paired in-memory connections.

use super::connection::{pair, Connection};
use super::error::{TransportError, TransportResult};
use crate::config::TransportConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Produces connections for a client, the way a context dialer does for a socket.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> TransportResult<Connection>;
}

/// In-memory listener. Clones share the same rendezvous point.
#[derive(Debug, Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

#[derive(Debug)]
struct ListenerInner {
    capacity: usize,
    state: Mutex<ListenerState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct ListenerState {
    closed: bool,
    /// Server ends of dialed connections not yet handed to `accept()`
    backlog: VecDeque<Connection>,
}

impl Listener {
    /// Create a listener whose connections buffer `capacity` bytes per direction
    pub fn create(capacity: usize) -> TransportResult<Self> {
        if capacity == 0 {
            return Err(TransportError::InvalidConfiguration);
        }

        debug!(capacity = capacity, "Creating in-process listener");

        Ok(Self {
            inner: Arc::new(ListenerInner {
                capacity,
                state: Mutex::new(ListenerState::default()),
                notify: Notify::new(),
            }),
        })
    }

    pub fn from_config(config: &TransportConfig) -> TransportResult<Self> {
        Self::create(config.buffer_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Connections dialed but not yet accepted
    pub fn pending_connections(&self) -> usize {
        self.inner.state.lock().backlog.len()
    }

    /// Wait for the next dialed connection.
    ///
    /// Fails with `ListenerClosed` if the listener is, or becomes, closed.
    pub async fn accept(&self) -> TransportResult<Connection> {
        loop {
            // Register interest before inspecting state so a dial or close that
            // lands in between is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(TransportError::ListenerClosed);
                }
                if let Some(conn) = state.backlog.pop_front() {
                    debug!(connection_id = %conn.id(), "Accepted in-process connection");
                    return Ok(conn);
                }
            }

            notified.await;
        }
    }

    /// Create a connection pair, returning the client end now and queueing the
    /// server end for `accept()`.
    pub fn dial(&self) -> TransportResult<Connection> {
        let (client, server) = pair(self.inner.capacity);

        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TransportError::ListenerClosed);
            }
            state.backlog.push_back(server);
        }
        self.inner.notify.notify_one();

        debug!(connection_id = %client.id(), "Dialed in-process connection");
        Ok(client)
    }

    /// Close the listener. Idempotent.
    ///
    /// Pending `accept()` calls fail with `ListenerClosed`. Connections already
    /// accepted stay usable; queued, never-accepted ones are closed.
    pub fn close(&self) {
        let abandoned = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.backlog)
        };
        self.inner.notify.notify_waiters();

        info!(
            abandoned_connections = abandoned.len(),
            "In-process listener closed"
        );
        for conn in abandoned {
            conn.close();
        }
    }
}

#[async_trait]
impl Dialer for Listener {
    async fn dial(&self) -> TransportResult<Connection> {
        Listener::dial(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert_eq!(
            Listener::create(0).unwrap_err(),
            TransportError::InvalidConfiguration
        );
    }

    #[test]
    fn test_from_config_uses_buffer_capacity() {
        let config = TransportConfig {
            buffer_capacity: 2048,
        };
        let listener = Listener::from_config(&config).unwrap();
        assert_eq!(listener.capacity(), 2048);
        assert!(!listener.is_closed());
    }

    #[tokio::test]
    async fn test_dial_before_accept_is_queued() {
        let listener = Listener::create(64).unwrap();

        let client = listener.dial().unwrap();
        assert_eq!(listener.pending_connections(), 1);

        let server = listener.accept().await.unwrap();
        assert_eq!(server.id(), client.id());
        assert_eq!(listener.pending_connections(), 0);
    }

    #[tokio::test]
    async fn test_dial_after_close_fails() {
        let listener = Listener::create(64).unwrap();
        listener.close();
        assert_eq!(listener.dial().unwrap_err(), TransportError::ListenerClosed);
        assert_eq!(
            Dialer::dial(&listener).await.unwrap_err(),
            TransportError::ListenerClosed
        );
    }

    #[tokio::test]
    async fn test_close_wakes_every_pending_accept() {
        let listener = Listener::create(64).unwrap();

        let acceptors: Vec<_> = (0..3)
            .map(|_| {
                let listener = listener.clone();
                tokio::spawn(async move { listener.accept().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.close();

        for acceptor in acceptors {
            let result = tokio::time::timeout(Duration::from_secs(1), acceptor)
                .await
                .expect("accept should unblock on close")
                .unwrap();
            assert_eq!(result.unwrap_err(), TransportError::ListenerClosed);
        }
    }

    #[tokio::test]
    async fn test_close_drops_unaccepted_connections() {
        let listener = Listener::create(64).unwrap();
        let mut client = listener.dial().unwrap();

        listener.close();
        assert_eq!(listener.pending_connections(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(
            client.read(&mut buf).await,
            Err(TransportError::EndOfStream)
        );
        assert_eq!(
            client.write(b"ping").await,
            Err(TransportError::ConnectionClosed)
        );
    }
}
