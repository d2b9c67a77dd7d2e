//! In-process graph hub
//!
//! Every client connected to the same [`MemoryGraph`] shares one node tree
//! and sees every other client as a peer. Used by tests and by the CLI's
//! loopback mode, where the whole network lives in one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{GraphClient, GraphConnector, GraphError, NodeData, PeerDescriptor, PeerEvent};

/// Shared in-process graph
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Debug, Default)]
struct Hub {
    nodes: HashMap<String, NodeData>,
    subscriptions: Vec<Subscription>,
    clients: HashMap<u64, ClientEntry>,
    next_client: u64,
    writes: Vec<(String, String)>,
    connect_calls: Vec<Vec<String>>,
    unavailable: bool,
}

#[derive(Debug)]
struct Subscription {
    client: u64,
    node: String,
    tx: mpsc::UnboundedSender<NodeData>,
}

#[derive(Debug)]
struct ClientEntry {
    peer_id: String,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl Hub {
    fn notify(&mut self, node: &str) {
        let Some(data) = self.nodes.get(node).cloned() else {
            return;
        };
        self.subscriptions
            .retain(|sub| sub.node != node || sub.tx.send(data.clone()).is_ok());
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector handing out clients of this graph
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            graph: self.clone(),
        }
    }

    /// Simulate the graph library failing to load
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Write a value without going through a client (remote data already present)
    pub fn seed(&self, node: &str, key: &str, value: Value) {
        let mut hub = self.lock();
        hub.nodes
            .entry(node.to_string())
            .or_default()
            .insert(key.to_string(), value);
        hub.notify(node);
    }

    /// Current contents of a node
    pub fn node(&self, node: &str) -> Option<NodeData> {
        self.lock().nodes.get(node).cloned()
    }

    /// Every `(node, key)` written through a client, in order
    pub fn writes(&self) -> Vec<(String, String)> {
        self.lock().writes.clone()
    }

    /// Peer lists passed to each `connect` call, in order
    pub fn connect_calls(&self) -> Vec<Vec<String>> {
        self.lock().connect_calls.clone()
    }

    /// Number of live clients
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// [`GraphConnector`] for a [`MemoryGraph`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    graph: MemoryGraph,
}

impl GraphConnector for MemoryConnector {
    fn connect(&self, peers: &[String]) -> Result<Box<dyn GraphClient>, GraphError> {
        let mut hub = self.graph.lock();
        if hub.unavailable {
            return Err(GraphError::Unavailable(
                "in-memory graph disabled".to_string(),
            ));
        }
        hub.connect_calls.push(peers.to_vec());

        let client_id = hub.next_client;
        hub.next_client += 1;
        let peer_id = format!("mem-{}", client_id);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        for entry in hub.clients.values() {
            let _ = entry
                .events
                .send(PeerEvent::Hi(PeerDescriptor::with_id(&peer_id)));
            let _ = events_tx.send(PeerEvent::Hi(PeerDescriptor::with_id(&entry.peer_id)));
        }
        hub.clients.insert(
            client_id,
            ClientEntry {
                peer_id: peer_id.clone(),
                events: events_tx,
            },
        );
        debug!("Memory graph client {} connected", peer_id);

        Ok(Box::new(MemoryClient {
            graph: self.graph.clone(),
            client_id,
            peer_id,
            events: Some(events_rx),
            closed: false,
        }))
    }
}

struct MemoryClient {
    graph: MemoryGraph,
    client_id: u64,
    peer_id: String,
    events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    closed: bool,
}

impl GraphClient for MemoryClient {
    fn put(&self, node: &str, key: &str, value: Value) -> Result<(), GraphError> {
        if self.closed {
            return Err(GraphError::Closed);
        }
        let mut hub = self.graph.lock();
        hub.nodes
            .entry(node.to_string())
            .or_default()
            .insert(key.to_string(), value);
        hub.writes.push((node.to_string(), key.to_string()));
        hub.notify(node);
        Ok(())
    }

    fn on(&self, node: &str) -> mpsc::UnboundedReceiver<NodeData> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.closed {
            return rx;
        }
        let mut hub = self.graph.lock();
        if let Some(data) = hub.nodes.get(node) {
            let _ = tx.send(data.clone());
        }
        hub.subscriptions.push(Subscription {
            client: self.client_id,
            node: node.to_string(),
            tx,
        });
        rx
    }

    fn once(&self, node: &str) -> oneshot::Receiver<NodeData> {
        let (tx, rx) = oneshot::channel();
        if !self.closed {
            if let Some(data) = self.graph.lock().nodes.get(node) {
                let _ = tx.send(data.clone());
            }
        }
        rx
    }

    fn take_peer_events(&mut self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events.take()
    }

    fn off(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut hub = self.graph.lock();
        hub.clients.remove(&self.client_id);
        let client_id = self.client_id;
        hub.subscriptions.retain(|sub| sub.client != client_id);
        for entry in hub.clients.values() {
            let _ = entry
                .events
                .send(PeerEvent::Bye(PeerDescriptor::with_id(&self.peer_id)));
        }
        debug!("Memory graph client {} disconnected", self.peer_id);
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clients_see_each_other() {
        let graph = MemoryGraph::new();
        let connector = graph.connector();

        let mut a = connector.connect(&[]).unwrap();
        let mut b = connector.connect(&[]).unwrap();
        let mut a_events = a.take_peer_events().unwrap();
        let mut b_events = b.take_peer_events().unwrap();

        assert_eq!(
            a_events.try_recv().unwrap(),
            PeerEvent::Hi(PeerDescriptor::with_id("mem-1"))
        );
        assert_eq!(
            b_events.try_recv().unwrap(),
            PeerEvent::Hi(PeerDescriptor::with_id("mem-0"))
        );

        b.off();
        assert_eq!(
            a_events.try_recv().unwrap(),
            PeerEvent::Bye(PeerDescriptor::with_id("mem-1"))
        );
        assert_eq!(graph.client_count(), 1);
    }

    #[test]
    fn test_put_reaches_subscribers() {
        let graph = MemoryGraph::new();
        let connector = graph.connector();
        let a = connector.connect(&[]).unwrap();
        let b = connector.connect(&[]).unwrap();

        let mut sub = b.on("n");
        a.put("n", "k", json!({"timestamp": 1})).unwrap();

        let data = sub.try_recv().unwrap();
        assert_eq!(data["k"], json!({"timestamp": 1}));
        assert_eq!(graph.writes(), vec![("n".to_string(), "k".to_string())]);
    }

    #[test]
    fn test_once_on_empty_node_closes() {
        let graph = MemoryGraph::new();
        let client = graph.connector().connect(&[]).unwrap();

        let mut rx = client.once("missing");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unavailable() {
        let graph = MemoryGraph::new();
        graph.set_available(false);

        let result = graph.connector().connect(&["wss://relay".to_string()]);
        assert!(matches!(result, Err(GraphError::Unavailable(_))));
        assert!(graph.connect_calls().is_empty());
    }

    #[test]
    fn test_put_after_off_fails() {
        let graph = MemoryGraph::new();
        let mut client = graph.connector().connect(&[]).unwrap();
        client.off();

        assert_eq!(client.put("n", "k", json!(1)), Err(GraphError::Closed));
    }
}
