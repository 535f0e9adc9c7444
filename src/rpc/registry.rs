//! # Service Registry
//!
//! Maps fully-qualified method names (`package.Service/Method`) to typed async handlers.
//!
//! The registry is populated before serving and moved into [`RpcServer`](super::RpcServer),
//! so it is never mutated while requests are in flight. Passing it explicitly keeps
//! servers independent of one another, which lets tests run in parallel.

use super::status::Status;
use super::{RpcError, RpcResult};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

type ErasedHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, Status>> + Send + Sync>;

struct RegisteredMethod {
    info: MethodInfo,
    handler: ErasedHandler,
}

/// Metadata about a registered method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Full name, e.g. `orchestrator.v1.HealthService/Check`
    pub name: String,
    pub service: String,
    pub method: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_methods: usize,
    pub total_services: usize,
}

#[derive(Default)]
pub struct ServiceRegistry {
    methods: HashMap<String, RegisteredMethod>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("methods", &self.method_names())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler taking a typed request and returning a typed response or a `Status`.
    ///
    /// Requests that fail to decode as `Req` are answered with `InvalidArgument`
    /// without reaching the handler.
    pub fn register<Req, Resp, F, Fut>(&mut self, name: &str, handler: F) -> RpcResult<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let (service, method) = parse_method_name(name)?;
        if self.methods.contains_key(name) {
            return Err(RpcError::DuplicateMethod(name.to_string()));
        }

        let method_name = name.to_string();
        let erased: ErasedHandler = Arc::new(move |payload: Value| {
            let request = match serde_json::from_value::<Req>(payload) {
                Ok(request) => request,
                Err(e) => {
                    let status =
                        Status::invalid_argument(format!("failed to decode request for {method_name}: {e}"));
                    return async move { Err(status) }.boxed();
                }
            };

            let response = handler(request);
            async move {
                let response = response.await?;
                serde_json::to_value(response)
                    .map_err(|e| Status::internal(format!("failed to encode response: {e}")))
            }
            .boxed()
        });

        info!(method = name, "Registering RPC method");

        self.methods.insert(
            name.to_string(),
            RegisteredMethod {
                info: MethodInfo {
                    name: name.to_string(),
                    service: service.to_string(),
                    method: method.to_string(),
                    registered_at: Utc::now(),
                },
                handler: erased,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered method names, sorted
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn method_info(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.get(name).map(|m| &m.info)
    }

    pub fn stats(&self) -> RegistryStats {
        let services: BTreeSet<&str> = self
            .methods
            .values()
            .map(|m| m.info.service.as_str())
            .collect();
        RegistryStats {
            total_methods: self.methods.len(),
            total_services: services.len(),
        }
    }

    /// Route a decoded payload to its handler
    pub async fn dispatch(&self, name: &str, payload: Value) -> Result<Value, Status> {
        let handler = match self.methods.get(name) {
            Some(registered) => Arc::clone(&registered.handler),
            None => {
                debug!(method = name, "No handler registered for method");
                return Err(Status::unimplemented(format!("unknown method {name}")));
            }
        };
        handler(payload).await
    }
}

fn parse_method_name(name: &str) -> RpcResult<(&str, &str)> {
    let invalid = || RpcError::InvalidMethodName(name.to_string());

    if name.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (service, method) = name.split_once('/').ok_or_else(invalid)?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return Err(invalid());
    }
    Ok((service, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Code;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct AddRequest {
        a: i64,
        b: i64,
    }

    fn registry() -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        registry
            .register("math.v1.Calculator/Add", |req: AddRequest| async move {
                Ok::<_, Status>(req.a + req.b)
            })
            .unwrap();
        registry
            .register("math.v1.Calculator/Fail", |_: Value| async move {
                Err::<Value, _>(Status::not_found("nothing here"))
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_method_names_are_validated() {
        let mut registry = ServiceRegistry::new();
        for bad in ["", "NoSlash", "/Method", "svc.Service/", "a/b/c", "svc.S/Me thod"] {
            let err = registry
                .register(bad, |v: Value| async move { Ok::<_, Status>(v) })
                .unwrap_err();
            assert!(matches!(err, RpcError::InvalidMethodName(_)), "{bad}");
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register("math.v1.Calculator/Add", |v: Value| async move {
                Ok::<_, Status>(v)
            })
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateMethod(ref name) if name == "math.v1.Calculator/Add"));
    }

    #[test]
    fn test_stats_and_metadata() {
        let registry = registry();
        assert_eq!(
            registry.stats(),
            RegistryStats {
                total_methods: 2,
                total_services: 1
            }
        );
        assert_eq!(
            registry.method_names(),
            vec!["math.v1.Calculator/Add", "math.v1.Calculator/Fail"]
        );
        let info = registry.method_info("math.v1.Calculator/Add").unwrap();
        assert_eq!(info.service, "math.v1.Calculator");
        assert_eq!(info.method, "Add");
        assert!(registry.contains("math.v1.Calculator/Fail"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_typed_handler() {
        let registry = registry();
        let result = registry
            .dispatch("math.v1.Calculator/Add", json!({ "a": 2, "b": 40 }))
            .await
            .unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let registry = registry();

        let status = registry
            .dispatch("math.v1.Calculator/Missing", json!({}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);

        let status = registry
            .dispatch("math.v1.Calculator/Add", json!({ "a": "two" }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = registry
            .dispatch("math.v1.Calculator/Fail", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(status, Status::not_found("nothing here"));
    }
}
