//! Action handler trait and adapters.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp_core::RequestId;
use serde_json::Value;
use tracing::warn;

use crate::errors::HandlerError;
use crate::types::Params;

/// Result returned by handlers.
pub type HandlerResult = Result<Value, HandlerError>;

/// Per-call context passed to a handler alongside its parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// Request correlation ID.
    pub request_id: RequestId,
    /// Authenticated principal, if any.
    pub caller_id: Option<String>,
}

/// Business logic bound to one `(resource, action)` pair.
///
/// Parameters arrive already validated with defaults applied.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action.
    async fn handle(&self, params: Params, ctx: CallContext) -> HandlerResult;
}

/// Handler backed by an async closure. Built by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as an [`ActionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Params, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Params, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, params: Params, ctx: CallContext) -> HandlerResult {
        (self.f)(params, ctx).await
    }
}

/// Imposes a deadline on an inner handler.
///
/// An elapsed deadline becomes [`HandlerError::Internal`], which the
/// dispatcher reports as `SERVER_ERROR`. The inner future is dropped.
pub struct TimeoutHandler {
    inner: Arc<dyn ActionHandler>,
    timeout: Duration,
}

impl TimeoutHandler {
    /// Wrap `inner` with `timeout`.
    pub fn new(inner: Arc<dyn ActionHandler>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ActionHandler for TimeoutHandler {
    async fn handle(&self, params: Params, ctx: CallContext) -> HandlerResult {
        let request_id = ctx.request_id.clone();
        match tokio::time::timeout(self.timeout, self.inner.handle(params, ctx)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(%request_id, timeout = ?self.timeout, "handler deadline elapsed");
                Err(HandlerError::internal(format!(
                    "handler timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn ctx() -> CallContext {
        CallContext {
            request_id: RequestId::from("r1"),
            caller_id: Some("u1".into()),
        }
    }

    #[tokio::test]
    async fn handler_fn_receives_params_and_caller() {
        let h = handler_fn(|params, ctx: CallContext| async move {
            Ok(json!({"echo": params, "caller": ctx.caller_id}))
        });
        let mut p = Params::new();
        let _ = p.insert("userId".into(), json!("u1"));
        let out = h.handle(p, ctx()).await.unwrap();
        assert_eq!(out, json!({"echo": {"userId": "u1"}, "caller": "u1"}));
    }

    #[tokio::test]
    async fn handler_fn_propagates_errors() {
        let h = handler_fn(|_, _| async { Err(HandlerError::failed("nope")) });
        let err = h.handle(Params::new(), ctx()).await.unwrap_err();
        assert_matches!(err, HandlerError::Failed { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_handler_maps_elapsed_to_internal() {
        let slow: Arc<dyn ActionHandler> = Arc::new(handler_fn(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }));
        let h = TimeoutHandler::new(slow, Duration::from_secs(5));
        let err = h.handle(Params::new(), ctx()).await.unwrap_err();
        assert_matches!(err, HandlerError::Internal { message } if message.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_handler_passes_fast_results() {
        let fast: Arc<dyn ActionHandler> = Arc::new(handler_fn(|_, _| async { Ok(json!(1)) }));
        let h = TimeoutHandler::new(fast, Duration::from_secs(5));
        assert_eq!(h.handle(Params::new(), ctx()).await.unwrap(), json!(1));
    }
}
