//! # meshdrive-discovery
//!
//! The "Swarm" external collaborator (§6): joining a secret-topic discovery
//! network and being notified of peer connections/disconnections. A real
//! deployment backs this with a DHT-based swarm; [`LocalSwarm`] is the
//! in-memory reference implementation used by tests and the CLI's loopback
//! mode.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod swarm;

pub use error::DiscoveryError;
pub use swarm::{LocalSwarm, Rendezvous, Swarm, SwarmEvent};
