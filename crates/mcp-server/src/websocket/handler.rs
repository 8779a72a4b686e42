//! Inbound frame handling: the auth gate and request dispatch.

use std::sync::Arc;

use mcp_core::{EventBus, EventKind};
use mcp_rpc::errors::UNAUTHORIZED;
use mcp_rpc::{ClientFrame, Params, Processor, Request, ServerFrame};
use metrics::counter;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::connection::ConnectionState;
use crate::auth::AuthProvider;
use crate::metrics::WS_FRAME_ERRORS_TOTAL;

/// Turns inbound text frames into exactly one reply frame each.
pub struct FrameHandler {
    processor: Processor,
    auth: Option<Arc<dyn AuthProvider>>,
    events: Arc<EventBus>,
}

impl FrameHandler {
    /// Create a handler. With `auth` set, requests are refused until the
    /// connection authenticates.
    pub fn new(processor: Processor, auth: Option<Arc<dyn AuthProvider>>, events: Arc<EventBus>) -> Self {
        Self {
            processor,
            auth,
            events,
        }
    }

    /// Whether an auth provider is configured.
    pub fn auth_required(&self) -> bool {
        self.auth.is_some()
    }

    /// Handle one inbound text frame for the connection that owns `state`.
    #[instrument(skip_all, fields(conn_id = %state.id()))]
    pub async fn handle_text(&self, state: &mut ConnectionState, text: &str) -> ServerFrame {
        state.touch();
        match ClientFrame::parse(text) {
            Ok(ClientFrame::Auth { token }) => self.handle_auth(state, &token).await,
            Ok(ClientFrame::Request {
                request_id,
                resource_id,
                action_id,
                params,
            }) => {
                self.handle_request(state, request_id, resource_id, action_id, params.unwrap_or_default())
                    .await
            }
            Err(e) => {
                counter!(WS_FRAME_ERRORS_TOTAL, "code" => e.code).increment(1);
                warn!(code = e.code, error = %e.message, "rejected inbound frame");
                e.to_frame()
            }
        }
    }

    async fn handle_auth(&self, state: &mut ConnectionState, token: &str) -> ServerFrame {
        let Some(auth) = &self.auth else {
            return ServerFrame::auth_failure("Authentication is not enabled");
        };

        let outcome = auth.authenticate(token).await;
        if !outcome.success {
            info!(reason = %outcome.message, "authentication failed");
            let message = if outcome.message.is_empty() {
                "Authentication failed".to_owned()
            } else {
                outcome.message
            };
            return ServerFrame::auth_failure(message);
        }

        let first = state.authenticate(outcome.user_id.clone());
        info!(user_id = ?outcome.user_id, first, "client authenticated");
        let _ = self.events.dispatch(
            EventKind::ClientAuthenticated,
            json!({
                "connectionId": state.id(),
                "userId": outcome.user_id,
            }),
        );
        ServerFrame::auth_success(outcome.user_id)
    }

    async fn handle_request(
        &self,
        state: &ConnectionState,
        request_id: Option<String>,
        resource_id: String,
        action_id: String,
        params: Params,
    ) -> ServerFrame {
        if self.auth.is_some() && !state.is_authenticated() {
            counter!(WS_FRAME_ERRORS_TOTAL, "code" => UNAUTHORIZED).increment(1);
            debug!(%resource_id, %action_id, "request before authentication");
            return ServerFrame::error(UNAUTHORIZED, "Authentication required", request_id);
        }

        let mut request = Request::new(resource_id, action_id, params)
            .with_caller(state.caller_id().map(str::to_owned));
        if let Some(id) = request_id {
            request = request.with_request_id(id);
        }
        self.processor.process_request(request).await.to_frame()
    }
}
