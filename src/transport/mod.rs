//! # In-Process Duplex Transport
//!
//! A connection-oriented, in-memory stand-in for a TCP listener. Request/response
//! protocol code can be exercised end to end without binding a real port.
//!
//! ## Architecture
//!
//! - [`Listener`]: rendezvous point handing out connection pairs. `dial()` returns the
//!   client end immediately and queues the server end for `accept()`.
//! - [`Connection`]: one endpoint of a bidirectional byte stream. Each direction is a
//!   bounded buffer of the listener's capacity, so a fast writer is held back by a
//!   slow reader.
//! - [`Dialer`]: the seam clients connect through.
//!
//! ## Usage
//!
//! ```rust
//! use orion_core::transport::Listener;
//!
//! # tokio_test::block_on(async {
//! let listener = Listener::create(1024).unwrap();
//!
//! let mut client = listener.dial().unwrap();
//! let mut server = listener.accept().await.unwrap();
//!
//! client.write_all(b"ping").await.unwrap();
//! let mut buf = [0u8; 4];
//! let n = server.read(&mut buf).await.unwrap();
//! assert_eq!(&buf[..n], b"ping");
//!
//! listener.close();
//! # });
//! ```

mod connection;
mod error;
mod listener;
mod pipe;

pub use connection::{CloseHandle, Connection, ConnectionId, ReadHalf, WriteHalf};
pub use error::{TransportError, TransportResult};
pub use listener::{Dialer, Listener};

/// Buffer capacity used when none is configured (1 MiB per direction)
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;
