//! Shared graph store
//!
//! Records travel between devices through an eventually-consistent graph
//! store: a tree of nodes, each a map of keys to JSON values, replicated by
//! the peers and relays a client is connected to. The sync layer treats the
//! store as opaque and talks to it through two traits:
//!
//! - [`GraphConnector`] creates a client for a list of peer endpoints
//! - [`GraphClient`] writes (`put`), subscribes (`on`), reads once (`once`),
//!   reports peer `hi`/`bye` events, and is torn down with `off`
//!
//! Implementations:
//!
//! - [`memory::MemoryGraph`]: in-process hub, every client sees every other
//! - [`client::WsConnector`]: websocket client for [`relay::RelayServer`]

pub mod client;
pub mod memory;
pub mod message;
pub mod relay;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use client::WsConnector;
pub use memory::{MemoryConnector, MemoryGraph};
pub use relay::RelayServer;

/// Contents of a graph node: key → value
pub type NodeData = Map<String, Value>;

/// Payload of a peer lifecycle event
///
/// Transports fill whichever identifying fields they know about; see
/// [`crate::sync::PeerId::from_descriptor`] for how an identity is derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// Peer id announced by the peer itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Websocket endpoint the peer was reached through
    #[serde(default, rename = "wsp", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Transport-level connection label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire: Option<String>,
    /// Anything else the transport attached
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PeerDescriptor {
    /// Descriptor carrying only a peer id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Descriptor carrying only an endpoint url
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Peer lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A peer became reachable
    Hi(PeerDescriptor),
    /// A peer went away
    Bye(PeerDescriptor),
}

/// Errors raised by graph transports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The graph library cannot be used in this process
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    /// Connecting to an endpoint failed
    #[error("Failed to connect to '{url}': {message}")]
    Connect { url: String, message: String },

    /// The client was already torn down
    #[error("Graph client is closed")]
    Closed,

    /// A frame could not be encoded
    #[error("Failed to encode frame: {0}")]
    Encode(String),

    /// A frame could not be decoded
    #[error("Failed to decode frame: {0}")]
    Decode(String),
}

/// A live connection to the shared graph
pub trait GraphClient: Send {
    /// Write `value` under `key` in `node` (last writer wins)
    fn put(&self, node: &str, key: &str, value: Value) -> Result<(), GraphError>;

    /// Subscribe to a node; every change delivers the node's current contents
    fn on(&self, node: &str) -> mpsc::UnboundedReceiver<NodeData>;

    /// Read a node once; the sender is dropped if the node has no data
    fn once(&self, node: &str) -> oneshot::Receiver<NodeData>;

    /// Take the peer event stream (only the first call returns it)
    fn take_peer_events(&mut self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    /// Tear the client down; later writes fail with [`GraphError::Closed`]
    fn off(&mut self);
}

/// Factory for graph clients
pub trait GraphConnector: Send + Sync {
    /// Create a client that talks to `peers`
    fn connect(&self, peers: &[String]) -> Result<Box<dyn GraphClient>, GraphError>;
}

impl<C: GraphConnector + ?Sized> GraphConnector for Box<C> {
    fn connect(&self, peers: &[String]) -> Result<Box<dyn GraphClient>, GraphError> {
        (**self).connect(peers)
    }
}
