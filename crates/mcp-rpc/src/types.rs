//! Request/response envelopes and the realtime wire frames.
//!
//! Client frames: `auth`, `request`. Server frames: `welcome`,
//! `auth_response`, `response`, `error`. Every frame is a JSON object
//! discriminated by its `type` field.

use std::fmt;

use chrono::{DateTime, Utc};
use mcp_core::{ConnectionId, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

use crate::errors::{INVALID_FORMAT, UNKNOWN_TYPE};

/// Action parameters: a JSON object keyed by parameter name.
pub type Params = Map<String, Value>;

/// Closed set of response outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// Handler returned a result.
    Success,
    /// Generic business failure.
    Error,
    /// Caller must authenticate first.
    AuthRequired,
    /// Caller is not allowed.
    PermissionDenied,
    /// Unknown resource or action.
    NotFound,
    /// Parameter validation failed.
    BadRequest,
    /// Missing handler, handler fault, or unexpected error.
    ServerError,
}

impl ResponseStatus {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::ServerError => "SERVER_ERROR",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call to one action, independent of transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Correlation ID, caller-supplied or generated.
    pub request_id: RequestId,
    /// Target resource.
    pub resource_id: String,
    /// Target action on that resource.
    pub action_id: String,
    /// Supplied parameters.
    pub params: Params,
    /// Authenticated principal, if any.
    pub caller_id: Option<String>,
    /// When the request was built.
    pub received_at: DateTime<Utc>,
}

impl Request {
    /// Build a request with a generated ID and no caller.
    pub fn new(resource_id: impl Into<String>, action_id: impl Into<String>, params: Params) -> Self {
        Self {
            request_id: RequestId::new(),
            resource_id: resource_id.into(),
            action_id: action_id.into(),
            params,
            caller_id: None,
            received_at: Utc::now(),
        }
    }

    /// Use a caller-supplied request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Attach the caller identity.
    #[must_use]
    pub fn with_caller(mut self, caller_id: Option<String>) -> Self {
        self.caller_id = caller_id;
        self
    }
}

/// The outcome of one request.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// Echoed request ID.
    pub request_id: RequestId,
    /// Echoed resource ID.
    pub resource_id: String,
    /// Echoed action ID.
    pub action_id: String,
    /// Outcome.
    pub status: ResponseStatus,
    /// Handler result. `Null` unless `status` is `Success`.
    pub result: Value,
    /// Human-readable outcome description.
    pub message: String,
    /// When the response was built.
    pub responded_at: DateTime<Utc>,
}

impl Response {
    /// Successful response carrying `result`.
    pub fn success(request: &Request, result: Value) -> Self {
        Self::build(request, ResponseStatus::Success, result, "Success".to_owned())
    }

    /// Non-success response. `result` is `Null`.
    pub fn failure(request: &Request, status: ResponseStatus, message: impl Into<String>) -> Self {
        Self::build(request, status, Value::Null, message.into())
    }

    fn build(request: &Request, status: ResponseStatus, result: Value, message: String) -> Self {
        Self {
            request_id: request.request_id.clone(),
            resource_id: request.resource_id.clone(),
            action_id: request.action_id.clone(),
            status,
            result,
            message,
            responded_at: Utc::now(),
        }
    }

    /// Whether the status is `Success`.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Wire frame for this response.
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::Response {
            request_id: self.request_id.to_string(),
            resource_id: self.resource_id.clone(),
            action_id: self.action_id.clone(),
            status: self.status,
            result: self.result.clone(),
            message: self.message.clone(),
            timestamp: self.responded_at.timestamp_millis(),
        }
    }

    /// Rebuild a response from its wire frame. `None` for other frame types.
    ///
    /// `responded_at` keeps millisecond precision.
    pub fn from_frame(frame: &ServerFrame) -> Option<Self> {
        let ServerFrame::Response {
            request_id,
            resource_id,
            action_id,
            status,
            result,
            message,
            timestamp,
        } = frame
        else {
            return None;
        };
        Some(Self {
            request_id: RequestId::from(request_id.as_str()),
            resource_id: resource_id.clone(),
            action_id: action_id.clone(),
            status: *status,
            result: result.clone(),
            message: message.clone(),
            responded_at: DateTime::from_timestamp_millis(*timestamp).unwrap_or_default(),
        })
    }
}

// ── Client frames ───────────────────────────────────────────────────

/// Frame sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Present a bearer token.
    Auth {
        /// Opaque token checked by the auth provider.
        token: String,
    },
    /// Invoke an action.
    #[serde(rename_all = "camelCase")]
    Request {
        /// Correlation ID; generated server-side when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Target resource.
        resource_id: String,
        /// Target action.
        action_id: String,
        /// Parameters object.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
    },
}

const CLIENT_FRAME_TYPES: [&str; 2] = ["auth", "request"];

impl ClientFrame {
    /// Decode one inbound text frame.
    ///
    /// Bad JSON, a non-object, or a missing/mistyped field is
    /// `invalid_format`; an unrecognized `type` is `unknown_type`.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FrameError::invalid_format(format!("Invalid JSON: {e}"), None))?;

        let Some(object) = value.as_object() else {
            return Err(FrameError::invalid_format("Frame must be a JSON object", None));
        };
        let request_id = object
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let Some(frame_type) = object.get("type").and_then(Value::as_str).map(str::to_owned) else {
            return Err(FrameError::invalid_format("Missing frame type", request_id));
        };
        if !CLIENT_FRAME_TYPES.contains(&frame_type.as_str()) {
            return Err(FrameError {
                code: UNKNOWN_TYPE,
                message: format!("Unknown message type: {frame_type}"),
                request_id,
            });
        }

        serde_json::from_value(value)
            .map_err(|e| FrameError::invalid_format(format!("Invalid {frame_type} frame: {e}"), request_id))
    }
}

/// A transport-level rejection of an inbound frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct FrameError {
    /// `invalid_format`, `unknown_type`, or `unauthorized`.
    pub code: &'static str,
    /// Description.
    pub message: String,
    /// Request ID from the offending frame, when one could be read.
    pub request_id: Option<String>,
}

impl FrameError {
    fn invalid_format(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            code: INVALID_FORMAT,
            message: message.into(),
            request_id,
        }
    }

    /// The `error` frame reporting this rejection.
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::error(self.code, self.message.clone(), self.request_id.clone())
    }
}

// ── Server frames ───────────────────────────────────────────────────

/// Error payload inside `auth_response` and `error` frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code (`error` frames only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Frame sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every connection.
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Assigned connection ID.
        client_id: String,
        /// RFC 3339 connect time.
        timestamp: String,
        /// Greeting text.
        message: String,
    },
    /// Reply to an `auth` frame.
    #[serde(rename_all = "camelCase")]
    AuthResponse {
        /// Whether the token was accepted.
        success: bool,
        /// Authenticated user on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        /// Failure reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// Reply to a dispatched `request` frame.
    #[serde(rename_all = "camelCase")]
    Response {
        /// Echoed or generated request ID.
        request_id: String,
        /// Resource ID.
        resource_id: String,
        /// Action ID.
        action_id: String,
        /// Outcome.
        status: ResponseStatus,
        /// Handler result, `null` unless `SUCCESS`.
        #[serde(default)]
        result: Value,
        /// Outcome description.
        message: String,
        /// Epoch milliseconds.
        timestamp: i64,
    },
    /// Transport-level rejection.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Code and message.
        error: ErrorBody,
        /// Request ID from the rejected frame, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerFrame {
    /// `welcome` frame stamped with the current time.
    pub fn welcome(client_id: &ConnectionId, message: impl Into<String>) -> Self {
        Self::Welcome {
            client_id: client_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            message: message.into(),
        }
    }

    /// Successful `auth_response`.
    pub fn auth_success(user_id: Option<String>) -> Self {
        Self::AuthResponse {
            success: true,
            user_id,
            error: None,
        }
    }

    /// Failed `auth_response`.
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::AuthResponse {
            success: false,
            user_id: None,
            error: Some(ErrorBody {
                message: message.into(),
                code: None,
            }),
        }
    }

    /// `error` frame.
    pub fn error(code: &str, message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Error {
            error: ErrorBody {
                message: message.into(),
                code: Some(code.to_owned()),
            },
            request_id,
        }
    }

    /// Serialize for the socket.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!(error = %e, "failed to serialize server frame");
            r#"{"type":"error","error":{"message":"Internal server error","code":"internal"}}"#
                .to_owned()
        })
    }
}
