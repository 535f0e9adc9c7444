//! # Unary RPC over byte streams
//!
//! A small request/response protocol carried over any `AsyncRead + AsyncWrite`
//! stream, most commonly an in-process [`Connection`](crate::transport::Connection).
//!
//! ## Architecture
//!
//! - **Codec**: length-prefixed JSON frames ([`codec`])
//! - **Registry**: fully-qualified method names mapped to typed async handlers
//! - **Server**: accept loop dispatching requests concurrently per connection
//! - **Client**: id-correlated calls with per-request deadlines
//!
//! ## Usage
//!
//! ```rust
//! use orion_core::config::{ClientConfig, ServerConfig};
//! use orion_core::rpc::{RpcClient, RpcServer, ServiceRegistry, Status};
//! use orion_core::transport::Listener;
//!
//! # tokio_test::block_on(async {
//! let mut registry = ServiceRegistry::new();
//! registry
//!     .register("demo.v1.Echo/Say", |text: String| async move {
//!         Ok::<_, Status>(text)
//!     })
//!     .unwrap();
//!
//! let listener = Listener::create(4096).unwrap();
//! let server = RpcServer::new(ServerConfig::default(), registry).unwrap().spawn(listener.clone());
//!
//! let client = RpcClient::connect(&listener, ClientConfig::default()).await.unwrap();
//! let reply: String = client.call("demo.v1.Echo/Say", &"hi".to_string()).await.unwrap();
//! assert_eq!(reply, "hi");
//!
//! client.close();
//! server.stop().await.unwrap();
//! # });
//! ```

pub mod client;
pub mod codec;
pub mod registry;
pub mod server;
pub mod status;

pub use client::RpcClient;
pub use registry::{MethodInfo, RegistryStats, ServiceRegistry};
pub use server::{RpcServer, RpcServerHandle};
pub use status::{Code, Status};

use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("invalid method name '{0}', expected 'package.Service/Method'")]
    InvalidMethodName(String),
    #[error("method '{0}' is already registered")]
    DuplicateMethod(String),
    #[error("invalid server configuration: {0}")]
    InvalidConfiguration(String),
    #[error("server task failed: {0}")]
    ServerTask(String),
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;
