//! Framed request/response channel with JSON value encoding (§6).

use async_trait::async_trait;
use meshdrive_crypto::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TransportError;

/// The outcome of a dispatched protocol method (§4.F, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The method was handled and `data` carries its result.
    Success,
    /// The method was recognized but failed; `data` carries a human message.
    Error,
    /// No handler is registered for the requested method/message type.
    UnknownMessageType,
}

/// The `{status, data}` response envelope every protocol method returns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    /// The outcome.
    pub status: ResponseStatus,
    /// The payload: the method's result on success, a message on error, and
    /// `Value::Null` for unknown message types. `undefined`/missing values
    /// are never serialized — this is always a concrete `Value`, coerced to
    /// `Null` if the handler produced nothing.
    pub data: Value,
}

impl Response {
    /// Build a success envelope.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self { status: ResponseStatus::Success, data }
    }

    /// Build an error envelope from a human-readable message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ResponseStatus::Error, data: Value::String(message.into()) }
    }

    /// Build the unknown-message-type envelope.
    #[must_use]
    pub fn unknown_message_type() -> Self {
        Self { status: ResponseStatus::UnknownMessageType, data: Value::Null }
    }
}

/// The peer-side protocol dispatcher: the entity a [`RequestChannel`] hands
/// an inbound `(from, method, payload)` triple to. `Node` implements this.
/// `from` is the calling peer, supplied by the connection the request
/// arrived on rather than the payload, since a dispatcher instance is shared
/// across every connection a node accepts.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handle one inbound protocol method call and produce its response
    /// envelope. Must never propagate an error across the wire: failures
    /// become `Response::error`.
    async fn dispatch(&self, from: PeerId, method: &str, payload: Value) -> Response;
}

/// A framed request/response channel to one connected peer.
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Send `method(payload)` to the far end and await its response.
    async fn request(&self, method: &str, payload: Value) -> Result<Response, TransportError>;
}
