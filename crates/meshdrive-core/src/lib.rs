//! # meshdrive-core
//!
//! The hard core of the peer-to-peer file-synchronization node: the local
//! file indexer (component D), the index manager that diffs peer logs and
//! drives transfers (component E), the node that owns the swarm and
//! dispatches the wire protocol (component F), and the event bus / message
//! dispatch (component G).
//!
//! Everything that touches the network or the disk beyond the watch
//! directory is an external collaborator reached through the traits in
//! `meshdrive-transport` and `meshdrive-discovery`; this crate is the
//! orchestration that ties them together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod events;
pub mod index_manager;
pub mod lfi;
pub mod messages;
pub mod node;
pub mod transfer_table;

pub use events::{Event, EventBus};
pub use index_manager::{FileTransferClient, IndexManager, NetworkFiles, NonLocalFile, TransferRef};
pub use lfi::LocalFileIndex;
pub use messages::{MessageHandler, MessageRouter};
pub use node::config::{IndexConfig, LogLevel, LoggingConfig, NodeConfig, TransferConfig};
pub use node::error::NodeError;
pub use node::node::{Node, PeerInfo};
pub use node::save_data::SaveData;
pub use transfer_table::{Direction, TransferTable};
