//! Component G: custom message dispatch. A `MESSAGE` protocol frame carries
//! a user-defined `message_type` and JSON payload; handlers registered via
//! `listen`/`listen_once` receive the decoded payload plus the sending peer
//! (§4.F, §9 "listen/listen_once/unlisten").

use std::collections::HashMap;
use std::sync::Arc;

use meshdrive_crypto::PeerId;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::node::error::NodeError;

/// A registered message handler. Invoked with the sending peer and the
/// decoded JSON payload; its return value becomes the `data` of the
/// `MESSAGE` protocol method's success response (§4.F).
pub type MessageHandler = Arc<dyn Fn(PeerId, Value) -> Value + Send + Sync>;

/// The `listen`/`listen_once`/`unlisten` registry for one message type
/// namespace. A node owns exactly one of these.
///
/// `listen_once` handlers take precedence over `listen` handlers for a given
/// type: if both are registered, the once-handler fires and is removed
/// before the persistent handler is even considered (§9).
#[derive(Default)]
pub struct MessageRouter {
    persistent: RwLock<HashMap<String, MessageHandler>>,
    once: RwLock<HashMap<String, MessageHandler>>,
}

impl MessageRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent handler for `message_type`, replacing any
    /// previous persistent handler for that type.
    pub async fn listen(&self, message_type: impl Into<String>, handler: MessageHandler) {
        self.persistent.write().await.insert(message_type.into(), handler);
    }

    /// Register a handler for `message_type` that fires at most once, then
    /// removes itself before invocation.
    pub async fn listen_once(&self, message_type: impl Into<String>, handler: MessageHandler) {
        self.once.write().await.insert(message_type.into(), handler);
    }

    /// Remove any persistent handler registered for `message_type`. A
    /// pending once-handler is left untouched.
    pub async fn unlisten(&self, message_type: &str) {
        self.persistent.write().await.remove(message_type);
    }

    /// Dispatch an inbound `MESSAGE` frame: prefer a pending once-handler
    /// (removing it first), falling back to the persistent handler. The
    /// handler's return value becomes the response `data`.
    /// `NodeError::UnknownMessageType` if neither is registered; a handler
    /// that panics is caught at this boundary and reported as a
    /// `NodeError::ProtocolError` so it surfaces as an ERROR response and
    /// event rather than unwinding the dispatch task (§7 "thrown exceptions
    /// return ERROR and emit an ERROR event").
    pub async fn dispatch(&self, peer: PeerId, message_type: &str, payload: Value) -> Result<Value, NodeError> {
        let once_handler = self.once.write().await.remove(message_type);
        if let Some(handler) = once_handler {
            return Self::invoke(handler, peer, payload);
        }

        let handler = {
            let persistent = self.persistent.read().await;
            persistent.get(message_type).cloned()
        };
        match handler {
            Some(handler) => Self::invoke(handler, peer, payload),
            None => Err(NodeError::UnknownMessageType(message_type.to_string().into())),
        }
    }

    fn invoke(handler: MessageHandler, peer: PeerId, payload: Value) -> Result<Value, NodeError> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(peer, payload)))
            .map_err(|_| NodeError::ProtocolError("message handler panicked".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn peer() -> PeerId {
        PeerId::from_bytes([7u8; 32])
    }

    #[tokio::test]
    async fn dispatch_without_handler_is_unknown_message_type() {
        let router = MessageRouter::new();
        let err = router.dispatch(peer(), "greeting", Value::Null).await.unwrap_err();
        assert!(matches!(err, NodeError::UnknownMessageType(_)));
    }

    #[tokio::test]
    async fn persistent_handler_fires_repeatedly() {
        let router = MessageRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        router.listen("ping", Arc::new(move |_peer, _payload| { calls2.fetch_add(1, Ordering::SeqCst); Value::Null })).await;

        router.dispatch(peer(), "ping", Value::Null).await.unwrap();
        router.dispatch(peer(), "ping", Value::Null).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handler_return_value_becomes_dispatch_result() {
        let router = MessageRouter::new();
        router
            .listen("echo", Arc::new(|_peer, payload| serde_json::json!({"ok": true, "echo": payload})))
            .await;

        let result = router.dispatch(peer(), "echo", serde_json::json!({"n": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true, "echo": {"n": 1}}));
    }

    #[tokio::test]
    async fn once_handler_fires_exactly_once_then_falls_back_to_unknown() {
        let router = MessageRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        router.listen_once("handshake", Arc::new(move |_peer, _payload| { calls2.fetch_add(1, Ordering::SeqCst); Value::Null })).await;

        router.dispatch(peer(), "handshake", Value::Null).await.unwrap();
        let err = router.dispatch(peer(), "handshake", Value::Null).await.unwrap_err();
        assert!(matches!(err, NodeError::UnknownMessageType(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_handler_takes_precedence_over_persistent() {
        let router = MessageRouter::new();
        let which = Arc::new(AtomicUsize::new(0));
        let w1 = which.clone();
        let w2 = which.clone();
        router.listen("chat", Arc::new(move |_peer, _payload| { w1.store(1, Ordering::SeqCst); Value::Null })).await;
        router.listen_once("chat", Arc::new(move |_peer, _payload| { w2.store(2, Ordering::SeqCst); Value::Null })).await;

        router.dispatch(peer(), "chat", Value::Null).await.unwrap();
        assert_eq!(which.load(Ordering::SeqCst), 2);

        router.dispatch(peer(), "chat", Value::Null).await.unwrap();
        assert_eq!(which.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unlisten_removes_persistent_handler() {
        let router = MessageRouter::new();
        router.listen("ping", Arc::new(|_peer, _payload| Value::Null)).await;
        router.unlisten("ping").await;
        let err = router.dispatch(peer(), "ping", Value::Null).await.unwrap_err();
        assert!(matches!(err, NodeError::UnknownMessageType(_)));
    }
}
