//! # Health Service
//!
//! Contract for the orchestrator's health-check RPC. The concrete health logic
//! lives with the deployment; this module supplies the message types, the
//! server-side registration adapter and a typed client.
//!
//! ```rust
//! use async_trait::async_trait;
//! use orion_core::config::{ClientConfig, ServerConfig};
//! use orion_core::health::{
//!     register_health_service, HealthCheckRequest, HealthCheckResponse, HealthService,
//!     HealthServiceClient,
//! };
//! use orion_core::rpc::{RpcClient, RpcServer, ServiceRegistry, Status};
//! use orion_core::transport::Listener;
//! use std::sync::Arc;
//!
//! struct AlwaysOk;
//!
//! #[async_trait]
//! impl HealthService for AlwaysOk {
//!     async fn check(&self, request: HealthCheckRequest) -> Result<HealthCheckResponse, Status> {
//!         Ok(HealthCheckResponse::new("ok", format!("{} is fine", request.service)))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut registry = ServiceRegistry::new();
//! register_health_service(&mut registry, Arc::new(AlwaysOk)).unwrap();
//!
//! let listener = Listener::create(1024).unwrap();
//! let server = RpcServer::new(ServerConfig::default(), registry).unwrap().spawn(listener.clone());
//!
//! let rpc = RpcClient::connect(&listener, ClientConfig::default()).await.unwrap();
//! let client = HealthServiceClient::new(rpc);
//! let response = client.check(HealthCheckRequest::new("api")).await.unwrap();
//! assert_eq!(response.status, "ok");
//!
//! server.stop().await.unwrap();
//! # });
//! ```

use crate::rpc::{RpcClient, RpcResult, ServiceRegistry, Status};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Fully-qualified name of the health-check method
pub const HEALTH_CHECK_METHOD: &str = "orchestrator.v1.HealthService/Check";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckRequest {
    /// Name of the service whose health is queried
    pub service: String,
}

impl HealthCheckRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckResponse {
    pub status: String,
    pub message: String,
}

impl HealthCheckResponse {
    pub fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
        }
    }
}

/// Server-side health check.
///
/// Implementations override `check`; the default answers `Unimplemented`.
#[async_trait]
pub trait HealthService: Send + Sync + 'static {
    async fn check(&self, _request: HealthCheckRequest) -> Result<HealthCheckResponse, Status> {
        Err(Status::unimplemented("method Check not implemented"))
    }
}

/// Register `service` under [`HEALTH_CHECK_METHOD`]
pub fn register_health_service<S>(registry: &mut ServiceRegistry, service: Arc<S>) -> RpcResult<()>
where
    S: HealthService + ?Sized,
{
    registry.register(HEALTH_CHECK_METHOD, move |request: HealthCheckRequest| {
        let service = Arc::clone(&service);
        async move {
            debug!(service = %request.service, "Health check requested");
            service.check(request).await
        }
    })
}

/// Typed client for the health service
#[derive(Debug, Clone)]
pub struct HealthServiceClient {
    client: RpcClient,
}

impl HealthServiceClient {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    pub async fn check(&self, request: HealthCheckRequest) -> Result<HealthCheckResponse, Status> {
        self.client.call(HEALTH_CHECK_METHOD, &request).await
    }

    pub fn into_inner(self) -> RpcClient {
        self.client
    }
}
