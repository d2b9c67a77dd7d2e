//! Websocket graph client
//!
//! Connects to one or more relays (see [`super::relay`]). Each relay gets its
//! own background task; the client keeps a local copy of every node it has
//! seen so subscriptions and one-shot reads can answer from it.
//!
//! Every open relay connection counts as a peer (`hi` with the relay url),
//! and so does every peer a relay announces (`hi` with the peer id). There is
//! no reconnection: a dropped relay stays dropped until the owner connects
//! again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::{ClientMessage, RelayMessage};
use super::{GraphClient, GraphConnector, GraphError, NodeData, PeerDescriptor, PeerEvent};

/// Request id used for subscription refreshes (no one-shot waiting on it)
const REFRESH_REQUEST: u64 = 0;

/// [`GraphConnector`] for websocket relays
#[derive(Debug, Clone)]
pub struct WsConnector {
    peer_id: String,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    /// Create a connector with a random peer id
    pub fn new() -> Self {
        let peer_id = format!("reelsync-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        Self { peer_id }
    }

    /// Create a connector announcing a fixed peer id
    pub fn with_peer_id(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
        }
    }

    /// Peer id announced to relays
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

impl GraphConnector for WsConnector {
    fn connect(&self, peers: &[String]) -> Result<Box<dyn GraphClient>, GraphError> {
        let handle = Handle::try_current()
            .map_err(|_| GraphError::Unavailable("no async runtime is running".to_string()))?;

        let shared = Arc::new(Mutex::new(Shared {
            live_relays: peers.iter().collect::<HashSet<_>>().len(),
            ..Shared::default()
        }));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut seen = HashSet::new();
        let mut relays = Vec::new();
        for url in peers.iter().filter(|url| seen.insert(url.as_str())) {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(relay_task(
                url.clone(),
                self.peer_id.clone(),
                rx,
                shared.clone(),
                events_tx.clone(),
            ));
            relays.push(tx);
        }
        info!("Graph client started with {} relay(s)", relays.len());

        Ok(Box::new(WsClient {
            relays,
            shared,
            events: Some(events_rx),
            closed: false,
        }))
    }
}

/// State shared between the client handle and its relay tasks
#[derive(Debug, Default)]
struct Shared {
    cache: HashMap<String, NodeData>,
    subscriptions: HashMap<String, Vec<mpsc::UnboundedSender<NodeData>>>,
    pending: HashMap<u64, oneshot::Sender<NodeData>>,
    next_request: u64,
    live_relays: usize,
}

impl Shared {
    /// Merge entries into the cached node and notify its subscribers
    fn merge(&mut self, node: &str, entries: NodeData) {
        let cached = self.cache.entry(node.to_string()).or_default();
        cached.extend(entries);
        let data = cached.clone();

        if let Some(subs) = self.subscriptions.get_mut(node) {
            subs.retain(|tx| tx.send(data.clone()).is_ok());
        }
    }

    /// A relay task ended; once none are left nobody can answer a pending read
    fn relay_exited(&mut self) {
        self.live_relays = self.live_relays.saturating_sub(1);
        if self.live_relays == 0 && !self.pending.is_empty() {
            debug!("No relay left, dropping {} pending read(s)", self.pending.len());
            self.pending.clear();
        }
    }

    fn answer(&mut self, request_id: u64, node: &str) {
        if let Some(tx) = self.pending.remove(&request_id) {
            let data = self.cache.get(node).cloned().unwrap_or_default();
            let _ = tx.send(data);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct WsClient {
    relays: Vec<mpsc::UnboundedSender<ClientMessage>>,
    shared: Arc<Mutex<Shared>>,
    events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    closed: bool,
}

impl WsClient {
    /// Send to every live relay; returns how many accepted the message
    fn broadcast(&self, message: &ClientMessage) -> usize {
        self.relays
            .iter()
            .filter(|tx| tx.send(message.clone()).is_ok())
            .count()
    }
}

impl GraphClient for WsClient {
    fn put(&self, node: &str, key: &str, value: Value) -> Result<(), GraphError> {
        if self.closed {
            return Err(GraphError::Closed);
        }

        let mut entry = NodeData::new();
        entry.insert(key.to_string(), value.clone());
        lock(&self.shared).merge(node, entry);

        self.broadcast(&ClientMessage::Put {
            node: node.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn on(&self, node: &str) -> mpsc::UnboundedReceiver<NodeData> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.closed {
            return rx;
        }

        {
            let mut shared = lock(&self.shared);
            if let Some(data) = shared.cache.get(node) {
                let _ = tx.send(data.clone());
            }
            shared
                .subscriptions
                .entry(node.to_string())
                .or_default()
                .push(tx);
        }

        self.broadcast(&ClientMessage::Get {
            request_id: REFRESH_REQUEST,
            node: node.to_string(),
        });
        rx
    }

    fn once(&self, node: &str) -> oneshot::Receiver<NodeData> {
        let (tx, rx) = oneshot::channel();
        if self.closed {
            return rx;
        }

        let request_id = {
            let mut shared = lock(&self.shared);
            shared.next_request += 1;
            let request_id = shared.next_request;
            shared.pending.insert(request_id, tx);
            request_id
        };

        let sent = self.broadcast(&ClientMessage::Get {
            request_id,
            node: node.to_string(),
        });

        if sent == 0 {
            // No relay to ask: answer from the local copy, or not at all
            let mut shared = lock(&self.shared);
            if shared.cache.contains_key(node) {
                shared.answer(request_id, node);
            } else {
                shared.pending.remove(&request_id);
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
        // Dropping the senders ends every relay task
        self.relays.clear();

        let mut shared = lock(&self.shared);
        shared.subscriptions.clear();
        shared.pending.clear();
        debug!("Graph client closed");
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.off();
    }
}

/// Connection to a single relay
async fn relay_task(
    url: String,
    peer_id: String,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    run_relay(&url, &peer_id, outbound, &shared, &events).await;
    lock(&shared).relay_exited();
}

async fn run_relay(
    url: &str,
    peer_id: &str,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    shared: &Mutex<Shared>,
    events: &mpsc::UnboundedSender<PeerEvent>,
) {
    debug!("Connecting to relay {}", url);
    let ws_stream = match connect_async(url).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            warn!("Relay connection to {} failed: {}", url, e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let hello = match ClientMessage::hello(peer_id).encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Could not encode handshake: {}", e);
            return;
        }
    };
    if let Err(e) = write.send(Message::Binary(hello)).await {
        warn!("Relay handshake with {} failed: {}", url, e);
        return;
    }

    info!("Connected to relay {}", url);
    let _ = events.send(PeerEvent::Hi(PeerDescriptor::with_url(url)));

    // Peers this relay announced, so they can be retired when it goes away
    let mut announced: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    write.close().await.ok();
                    break;
                };
                match message.encode() {
                    Ok(bytes) => {
                        if let Err(e) = write.send(Message::Binary(bytes)).await {
                            warn!("Relay {} write failed: {}", url, e);
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping unencodable frame: {}", e),
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => match RelayMessage::decode(&data) {
                        Ok(message) => {
                            handle_relay_message(message, shared, events, &mut announced);
                        }
                        Err(e) => debug!("Ignoring frame from {}: {}", url, e),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Relay {} connection error: {}", url, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    for peer in announced {
        let _ = events.send(PeerEvent::Bye(PeerDescriptor::with_id(peer)));
    }
    let _ = events.send(PeerEvent::Bye(PeerDescriptor::with_url(url)));
    info!("Disconnected from relay {}", url);
}

fn handle_relay_message(
    message: RelayMessage,
    shared: &Mutex<Shared>,
    events: &mpsc::UnboundedSender<PeerEvent>,
    announced: &mut HashSet<String>,
) {
    match message {
        RelayMessage::PeerJoined { peer_id } => {
            debug!("Relay announced peer {}", peer_id);
            announced.insert(peer_id.clone());
            let _ = events.send(PeerEvent::Hi(PeerDescriptor::with_id(peer_id)));
        }
        RelayMessage::PeerLeft { peer_id } => {
            debug!("Relay retired peer {}", peer_id);
            announced.remove(&peer_id);
            let _ = events.send(PeerEvent::Bye(PeerDescriptor::with_id(peer_id)));
        }
        RelayMessage::Put { node, key, value } => {
            let mut entry = NodeData::new();
            entry.insert(key, value);
            lock(shared).merge(&node, entry);
        }
        RelayMessage::Snapshot {
            request_id,
            node,
            data,
        } => {
            let mut shared = lock(shared);
            shared.merge(&node, data);
            shared.answer(request_id, &node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_without_runtime_is_unavailable() {
        let connector = WsConnector::with_peer_id("test-peer");
        let result = connector.connect(&["ws://127.0.0.1:1".to_string()]);

        assert!(matches!(result, Err(GraphError::Unavailable(_))));
    }

    #[test]
    fn test_peer_id_prefix() {
        assert!(WsConnector::new().peer_id().starts_with("reelsync-"));
    }

    #[tokio::test]
    async fn test_no_relays_answers_from_local_copy() {
        let connector = WsConnector::with_peer_id("solo");
        let client = connector.connect(&[]).unwrap();

        let missing = client.once("n");
        assert!(missing.await.is_err());

        client.put("n", "a", json!({"timestamp": 1})).unwrap();
        let data = client.once("n").await.unwrap();
        assert_eq!(data["a"], json!({"timestamp": 1}));
    }

    #[tokio::test]
    async fn test_subscription_sees_local_puts() {
        let client = WsConnector::with_peer_id("solo").connect(&[]).unwrap();
        let mut sub = client.on("n");

        client.put("n", "a", json!(1)).unwrap();
        let data = sub.recv().await.unwrap();
        assert_eq!(data["a"], 1);
    }

    #[test]
    fn test_shared_merge_and_answer() {
        let mut shared = Shared::default();
        let (tx, mut rx) = oneshot::channel();
        shared.pending.insert(3, tx);

        let mut data = NodeData::new();
        data.insert("a".to_string(), json!(1));
        shared.merge("n", data);
        shared.answer(3, "n");

        assert_eq!(rx.try_recv().unwrap()["a"], 1);
        assert!(shared.pending.is_empty());
    }

    #[test]
    fn test_last_relay_exit_drops_pending_reads() {
        let mut shared = Shared {
            live_relays: 2,
            ..Shared::default()
        };
        let (tx, mut rx) = oneshot::channel::<NodeData>();
        shared.pending.insert(1, tx);

        shared.relay_exited();
        assert_eq!(shared.pending.len(), 1);

        shared.relay_exited();
        assert!(shared.pending.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_against_unreachable_relay_resolves() {
        let client = WsConnector::with_peer_id("lonely")
            .connect(&["ws://127.0.0.1:1".to_string()])
            .unwrap();

        let answer = tokio::time::timeout(std::time::Duration::from_secs(5), client.once("n")).await;
        assert!(matches!(answer, Ok(Err(_))));
    }
}
