//! Error types for the Orion core crate.
//!
//! Each layer owns its own error enum ([`TransportError`], [`RpcError`]); this
//! module folds them into [`OrionError`] for callers that wire the layers together.

use crate::rpc::RpcError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrionError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

impl From<::config::ConfigError> for OrionError {
    fn from(error: ::config::ConfigError) -> Self {
        OrionError::Configuration(error.to_string())
    }
}

pub type OrionResult<T> = std::result::Result<T, OrionError>;
