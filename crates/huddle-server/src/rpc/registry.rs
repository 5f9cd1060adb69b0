//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use huddle_core::ErrorKind;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::warn;

use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};
use crate::rpc::context::RpcContext;
use crate::rpc::errors::{self, RpcError};
use crate::rpc::types::{RpcRequest, RpcResponse};

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a method name.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Outer bound on a single handler. Session calls carry their own
    /// shorter deadline.
    const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Dispatch a request to the appropriate handler.
    pub async fn dispatch(&self, request: RpcRequest, ctx: &RpcContext) -> RpcResponse {
        let method = request.method.clone();
        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            counter!(
                RPC_ERRORS_TOTAL,
                "method" => method.clone(),
                "error_type" => "method_not_found"
            )
            .increment(1);
            return RpcResponse::error(
                request.id,
                errors::METHOD_NOT_FOUND,
                format!("Method '{method}' not found"),
            );
        };

        let start = std::time::Instant::now();
        let result =
            tokio::time::timeout(Self::HANDLER_TIMEOUT, handler.handle(request.params, ctx)).await;

        let response = match result {
            Ok(Ok(result)) => RpcResponse::success(request.id, result),
            Ok(Err(err)) => {
                counter!(
                    RPC_ERRORS_TOTAL,
                    "method" => method.clone(),
                    "error_type" => err.code()
                )
                .increment(1);
                RpcResponse {
                    id: request.id,
                    success: false,
                    result: None,
                    error: Some(err.to_error_body()),
                }
            }
            Err(_elapsed) => {
                counter!(
                    RPC_ERRORS_TOTAL,
                    "method" => method.clone(),
                    "error_type" => "timeout"
                )
                .increment(1);
                tracing::error!(method, "RPC handler timed out after {:?}", Self::HANDLER_TIMEOUT);
                RpcResponse::error(
                    request.id,
                    ErrorKind::Timeout.code(),
                    format!("Handler for '{method}' timed out"),
                )
            }
        };

        let duration = start.elapsed();
        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(duration.as_secs_f64());

        if duration.as_secs() >= 5 {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        response
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::test_helpers::make_test_context;
    use huddle_core::LobbyError;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(
            &self,
            params: Option<Value>,
            _ctx: &RpcContext,
        ) -> Result<Value, RpcError> {
            Ok(params.unwrap_or(json!(null)))
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(
            &self,
            _params: Option<Value>,
            _ctx: &RpcContext,
        ) -> Result<Value, RpcError> {
            Err(RpcError::Internal {
                message: "boom".into(),
            })
        }
    }

    struct ConflictHandler;

    #[async_trait]
    impl MethodHandler for ConflictHandler {
        async fn handle(
            &self,
            _params: Option<Value>,
            _ctx: &RpcContext,
        ) -> Result<Value, RpcError> {
            Err(LobbyError::Conflict {
                name: "Alice".into(),
            }
            .into())
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl MethodHandler for SlowHandler {
        async fn handle(
            &self,
            _params: Option<Value>,
            _ctx: &RpcContext,
        ) -> Result<Value, RpcError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        }
    }

    fn make_request(id: &str, method: &str, params: Option<Value>) -> RpcRequest {
        RpcRequest {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    #[tokio::test]
    async fn register_and_dispatch_success() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);

        let resp = reg.dispatch(make_request("r1", "echo", Some(json!({"x": 1}))), &ctx).await;
        assert!(resp.success);
        assert_eq!(resp.id, "r1");
        assert_eq!(resp.result.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn unknown_method() {
        let ctx = make_test_context();
        let reg = MethodRegistry::new();
        let resp = reg.dispatch(make_request("r2", "nope", None), &ctx).await;
        assert!(!resp.success);
        let err = resp.error.unwrap();
        assert_eq!(err.code, errors::METHOD_NOT_FOUND);
        assert!(err.message.contains("nope"));
    }

    #[tokio::test]
    async fn internal_errors_are_sanitized() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("fail", FailHandler);
        let resp = reg.dispatch(make_request("r3", "fail", None), &ctx).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, errors::INTERNAL_ERROR);
        assert_eq!(err.message, "Internal error");
    }

    #[tokio::test]
    async fn session_errors_keep_codes() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("conflict", ConflictHandler);
        let resp = reg.dispatch(make_request("r4", "conflict", None), &ctx).await;
        assert_eq!(resp.error.unwrap().code, "CONFLICT");
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_handler_times_out() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("slow", SlowHandler);
        let resp = reg.dispatch(make_request("r5", "slow", None), &ctx).await;
        assert_eq!(resp.error.unwrap().code, "TIMEOUT");
    }

    #[test]
    fn methods_sorted() {
        let mut reg = MethodRegistry::default();
        reg.register("b", EchoHandler);
        reg.register("a", EchoHandler);
        assert_eq!(reg.methods(), vec!["a", "b"]);
        assert!(reg.has_method("a"));
        assert!(!reg.has_method("c"));
    }
}
