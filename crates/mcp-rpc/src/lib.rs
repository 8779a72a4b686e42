//! # mcp-rpc
//!
//! The transport-independent core of the gateway: the [`Registry`] of
//! resources and their bound handlers, parameter [`validation`], the
//! request/response envelopes and wire frames, and the [`Processor`] that
//! dispatches a [`Request`] to its handler and shapes the [`Response`].

#![deny(unsafe_code)]

pub mod errors;
pub mod handler;
pub mod metrics;
pub mod processor;
pub mod registry;
pub mod types;
pub mod validation;

pub use errors::{HandlerError, RegistryError};
pub use handler::{ActionHandler, CallContext, FnHandler, HandlerResult, TimeoutHandler, handler_fn};
pub use processor::Processor;
pub use registry::Registry;
pub use types::{ClientFrame, ErrorBody, FrameError, Params, Request, Response, ResponseStatus, ServerFrame};
pub use validation::{ValidationReport, apply_defaults, sanitize_error_message, validate};
