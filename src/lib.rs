#![allow(clippy::doc_markdown)] // Allow technical terms like gRPC, MiB in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Orion Core
//!
//! Protocol plumbing for the Orion orchestrator that runs entirely in process.
//!
//! ## Overview
//!
//! The centrepiece is an in-memory duplex transport: a [`transport::Listener`] that
//! behaves like a socket listener, with connections dialed and accepted without any
//! network stack. Request/response services are wired on top of it so protocol
//! handlers can be tested deterministically, with no port conflicts and explicit
//! control over connection lifecycle.
//!
//! ## Module Organization
//!
//! - [`transport`] - In-process listener, connections and dialer seam
//! - [`rpc`] - Framed unary RPC: registry, server and client
//! - [`health`] - Health-check service contract and typed client
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use orion_core::transport::Listener;
//!
//! # tokio_test::block_on(async {
//! let listener = Listener::create(1024 * 1024).unwrap();
//! let client_end = listener.dial().unwrap();
//! let server_end = listener.accept().await.unwrap();
//! assert_eq!(client_end.id(), server_end.id());
//! listener.close();
//! listener.close();
//! # });
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod rpc;
pub mod transport;

pub use config::OrionConfig;
pub use error::{OrionError, OrionResult};
pub use health::{HealthCheckRequest, HealthCheckResponse, HealthService, HealthServiceClient};
pub use rpc::{RpcClient, RpcServer, ServiceRegistry, Status};
pub use transport::{Connection, Dialer, Listener, TransportError};
