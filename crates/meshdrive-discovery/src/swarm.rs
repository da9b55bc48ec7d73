//! The `Swarm` trait and its in-memory reference implementation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshdrive_crypto::PeerId;
use meshdrive_transport::Dispatcher;
use tokio::sync::{broadcast, Mutex};

use crate::DiscoveryError;

/// A connection lifecycle event delivered to every swarm member of a topic.
#[derive(Clone)]
pub enum SwarmEvent {
    /// A new peer connection came up. `dispatcher` lets the receiver build a
    /// request/response channel to it.
    Connected {
        /// The remote peer's id.
        peer: PeerId,
        /// The remote peer's protocol dispatcher.
        dispatcher: Arc<dyn Dispatcher>,
    },
    /// A previously-connected peer went away.
    Disconnected {
        /// The remote peer's id.
        peer: PeerId,
    },
}

/// Join a secret-topic discovery network and learn about peer connections.
/// Knowing the 32-byte topic is sufficient to join (§3 "Network key").
#[async_trait]
pub trait Swarm: Send + Sync {
    /// This node's own peer id, as advertised to the topic.
    fn peer_id(&self) -> PeerId;

    /// Join (or create) the topic. Idempotent per distinct topic.
    async fn join(&self, topic: [u8; 32]) -> Result<(), DiscoveryError>;

    /// Leave a previously joined topic.
    async fn leave(&self, topic: [u8; 32]) -> Result<(), DiscoveryError>;

    /// Flush pending discovery announcements so the connection callback is
    /// primed for any peer already on the topic.
    async fn flushed(&self) -> Result<(), DiscoveryError>;

    /// Subscribe to connection lifecycle events across every joined topic.
    fn events(&self) -> broadcast::Receiver<SwarmEvent>;
}

struct Member {
    peer: PeerId,
    dispatcher: Arc<dyn Dispatcher>,
    events_tx: broadcast::Sender<SwarmEvent>,
}

/// A shared rendezvous point standing in for the DHT: every [`LocalSwarm`]
/// that joins the same topic on the same `Rendezvous` discovers every other
/// member already there, and is discovered in turn.
#[derive(Default)]
pub struct Rendezvous {
    topics: DashMap<[u8; 32], Vec<Member>>,
}

impl Rendezvous {
    /// Create a fresh, empty rendezvous point.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// In-memory [`Swarm`] implementation.
pub struct LocalSwarm {
    rendezvous: Arc<Rendezvous>,
    peer_id: PeerId,
    dispatcher: Arc<dyn Dispatcher>,
    events_tx: broadcast::Sender<SwarmEvent>,
    joined: Mutex<HashSet<[u8; 32]>>,
}

impl LocalSwarm {
    /// Create a swarm member identified by `peer_id`, handing its own
    /// `dispatcher` to every peer it connects to.
    #[must_use]
    pub fn new(rendezvous: Arc<Rendezvous>, peer_id: PeerId, dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self { rendezvous, peer_id, dispatcher, events_tx, joined: Mutex::new(HashSet::new()) })
    }
}

#[async_trait]
impl Swarm for LocalSwarm {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn join(&self, topic: [u8; 32]) -> Result<(), DiscoveryError> {
        let mut joined = self.joined.lock().await;
        if !joined.insert(topic) {
            return Err(DiscoveryError::AlreadyJoined);
        }

        let mut members = self.rendezvous.topics.entry(topic).or_default();
        for other in members.iter() {
            let _ = other.events_tx.send(SwarmEvent::Connected {
                peer: self.peer_id,
                dispatcher: self.dispatcher.clone(),
            });
            let _ = self.events_tx.send(SwarmEvent::Connected {
                peer: other.peer,
                dispatcher: other.dispatcher.clone(),
            });
        }
        members.push(Member {
            peer: self.peer_id,
            dispatcher: self.dispatcher.clone(),
            events_tx: self.events_tx.clone(),
        });
        Ok(())
    }

    async fn leave(&self, topic: [u8; 32]) -> Result<(), DiscoveryError> {
        let mut joined = self.joined.lock().await;
        if !joined.remove(&topic) {
            return Err(DiscoveryError::NotJoined);
        }

        if let Some(mut members) = self.rendezvous.topics.get_mut(&topic) {
            members.retain(|m| m.peer != self.peer_id);
            for other in members.iter() {
                let _ = other.events_tx.send(SwarmEvent::Disconnected { peer: self.peer_id });
            }
        }
        Ok(())
    }

    async fn flushed(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdrive_transport::Response;
    use serde_json::Value;

    struct NullDispatcher;

    #[async_trait]
    impl Dispatcher for NullDispatcher {
        async fn dispatch(&self, _from: PeerId, _method: &str, _payload: Value) -> Response {
            Response::unknown_message_type()
        }
    }

    #[tokio::test]
    async fn two_joiners_see_each_other() {
        let rendezvous = Rendezvous::new();
        let topic = [0u8; 32];

        let a_id = PeerId::from_bytes([1u8; 32]);
        let a = LocalSwarm::new(rendezvous.clone(), a_id, Arc::new(NullDispatcher));
        let mut a_events = a.events();
        a.join(topic).await.unwrap();

        let b_id = PeerId::from_bytes([2u8; 32]);
        let b = LocalSwarm::new(rendezvous, b_id, Arc::new(NullDispatcher));
        let mut b_events = b.events();
        b.join(topic).await.unwrap();

        let a_saw = a_events.recv().await.unwrap();
        match a_saw {
            SwarmEvent::Connected { peer, .. } => assert_eq!(peer, b_id),
            _ => panic!("expected Connected"),
        }

        let b_saw = b_events.recv().await.unwrap();
        match b_saw {
            SwarmEvent::Connected { peer, .. } => assert_eq!(peer, a_id),
            _ => panic!("expected Connected"),
        }
    }

    #[tokio::test]
    async fn leave_notifies_remaining_members() {
        let rendezvous = Rendezvous::new();
        let topic = [1u8; 32];

        let a = LocalSwarm::new(rendezvous.clone(), PeerId::from_bytes([1u8; 32]), Arc::new(NullDispatcher));
        a.join(topic).await.unwrap();
        let b_id = PeerId::from_bytes([2u8; 32]);
        let b = LocalSwarm::new(rendezvous, b_id, Arc::new(NullDispatcher));
        let mut b_events = b.events();
        b.join(topic).await.unwrap();
        let _ = b_events.recv().await.unwrap();

        a.leave(topic).await.unwrap();
        let event = b_events.recv().await.unwrap();
        match event {
            SwarmEvent::Disconnected { peer } => assert_eq!(peer, PeerId::from_bytes([1u8; 32])),
            _ => panic!("expected Disconnected"),
        }
    }
}
