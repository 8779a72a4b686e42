//! Request dispatch.
//!
//! [`Processor::process_request`] resolves the resource, then the action,
//! validates parameters, resolves the handler, and only then invokes it.
//! The first failing step decides the response. The processor holds no
//! per-request state and imposes no timeout or mutual exclusion.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use metrics::{counter, histogram};
use tracing::{debug, error, instrument, warn};

use crate::errors::{HandlerError, SANITIZED_INTERNAL_MESSAGE};
use crate::handler::CallContext;
use crate::metrics::{ERRORS_TOTAL, HANDLER_PANICS_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::registry::Registry;
use crate::types::{Request, Response, ResponseStatus};
use crate::validation::{apply_defaults, sanitize_error_message, validate};

/// Validates and routes requests to their bound handlers.
#[derive(Clone)]
pub struct Processor {
    registry: Arc<Registry>,
}

impl Processor {
    /// Create a processor over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry requests are resolved against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Dispatch one request and shape its response.
    #[instrument(
        skip_all,
        fields(
            request_id = %request.request_id,
            resource_id = %request.resource_id,
            action_id = %request.action_id,
        )
    )]
    pub async fn process_request(&self, request: Request) -> Response {
        let resource = request.resource_id.clone();
        let action = request.action_id.clone();
        counter!(REQUESTS_TOTAL, "resource" => resource.clone(), "action" => action.clone())
            .increment(1);

        let start = Instant::now();
        let response = self.dispatch(request).await;
        let elapsed = start.elapsed();

        histogram!(REQUEST_DURATION_SECONDS, "resource" => resource.clone(), "action" => action.clone())
            .record(elapsed.as_secs_f64());
        if !response.is_success() {
            counter!(
                ERRORS_TOTAL,
                "resource" => resource,
                "action" => action,
                "status" => response.status.as_str()
            )
            .increment(1);
        }
        debug!(status = %response.status, elapsed_ms = elapsed.as_millis(), "request processed");
        response
    }

    async fn dispatch(&self, mut request: Request) -> Response {
        let Some(resource) = self.registry.get(&request.resource_id) else {
            return Response::failure(
                &request,
                ResponseStatus::NotFound,
                format!("Resource not found: {}", request.resource_id),
            );
        };

        let Some(action) = resource.action(&request.action_id) else {
            return Response::failure(
                &request,
                ResponseStatus::NotFound,
                format!(
                    "Action not found: {}/{}",
                    request.resource_id, request.action_id
                ),
            );
        };

        let report = validate(action, &request.params);
        if !report.valid {
            return Response::failure(
                &request,
                ResponseStatus::BadRequest,
                format!("Invalid parameters: {}", report.message()),
            );
        }

        let Some(handler) = self.registry.handler(&request.resource_id, &request.action_id) else {
            error!("action is declared but no handler is registered");
            return Response::failure(
                &request,
                ResponseStatus::ServerError,
                format!(
                    "No handler registered for {}/{}",
                    request.resource_id, request.action_id
                ),
            );
        };

        apply_defaults(action, &mut request.params);
        let params = std::mem::take(&mut request.params);
        let ctx = CallContext {
            request_id: request.request_id.clone(),
            caller_id: request.caller_id.clone(),
        };

        match AssertUnwindSafe(handler.handle(params, ctx)).catch_unwind().await {
            Ok(Ok(result)) => Response::success(&request, result),
            Ok(Err(err)) => {
                log_handler_error(&err);
                Response::failure(&request, err.status(), sanitize_error_message(&err))
            }
            Err(panic) => {
                counter!(
                    HANDLER_PANICS_TOTAL,
                    "resource" => request.resource_id.clone(),
                    "action" => request.action_id.clone()
                )
                .increment(1);
                error!(reason = %panic_message(panic.as_ref()), "handler panicked");
                Response::failure(&request, ResponseStatus::ServerError, SANITIZED_INTERNAL_MESSAGE)
            }
        }
    }
}

fn log_handler_error(err: &HandlerError) {
    match err {
        HandlerError::Internal { .. } => error!(error = %err, "handler failed"),
        _ => warn!(kind = err.kind(), error = %err, "handler rejected request"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
