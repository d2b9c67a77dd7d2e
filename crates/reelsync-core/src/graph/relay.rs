//! Relay server
//!
//! A rendezvous point for shop-floor devices. The relay keeps the latest
//! value of every key it has seen, forwards each write to all other
//! connections, answers reads from its copy, and announces peers as they
//! join and leave. It performs no merging beyond last-writer-wins per key.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::{ClientMessage, RelayMessage};
use super::NodeData;

/// Websocket relay for the shared graph
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<Mutex<RelayState>>,
}

#[derive(Debug, Default)]
struct RelayState {
    nodes: HashMap<String, NodeData>,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
}

#[derive(Debug)]
struct Connection {
    peer_id: Option<String>,
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl RelayState {
    fn send_to_others(&self, from: u64, message: &RelayMessage) {
        for (id, connection) in &self.connections {
            if *id != from {
                let _ = connection.tx.send(message.clone());
            }
        }
    }
}

fn lock(state: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RelayServer {
    /// Bind the relay to an address
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(RelayState::default())),
        })
    }

    /// Address the relay is listening on
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> io::Result<()> {
        info!("Relay listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, addr) = self.listener.accept().await?;
            tokio::spawn(handle_connection(stream, addr, self.state.clone()));
        }
    }

    /// Run the relay in a background task
    pub fn spawn(self) -> JoinHandle<io::Result<()>> {
        tokio::spawn(self.run())
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<Mutex<RelayState>>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!("Websocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection_id = {
        let mut state = lock(&state);
        let id = state.next_connection;
        state.next_connection += 1;
        state
            .connections
            .insert(id, Connection { peer_id: None, tx });
        id
    };
    debug!("Relay connection {} from {}", connection_id, addr);

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                match message.encode() {
                    Ok(bytes) => {
                        if write.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping unencodable frame: {}", e),
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => match ClientMessage::decode(&data) {
                        Ok(message) => handle_client_message(connection_id, message, &state),
                        Err(e) => debug!("Ignoring frame from {}: {}", addr, e),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Connection {} error: {}", addr, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let mut state = lock(&state);
    let removed = state.connections.remove(&connection_id);
    if let Some(Connection {
        peer_id: Some(peer_id),
        ..
    }) = removed
    {
        info!("Peer {} left", peer_id);
        state.send_to_others(connection_id, &RelayMessage::PeerLeft { peer_id });
    }
}

fn handle_client_message(connection_id: u64, message: ClientMessage, state: &Mutex<RelayState>) {
    let mut state = lock(state);
    match message {
        ClientMessage::Hello { peer_id } => {
            info!("Peer {} joined", peer_id);

            let others: Vec<String> = state
                .connections
                .iter()
                .filter(|(id, _)| **id != connection_id)
                .filter_map(|(_, c)| c.peer_id.clone())
                .collect();

            if let Some(connection) = state.connections.get_mut(&connection_id) {
                connection.peer_id = Some(peer_id.clone());
                for other in others {
                    let _ = connection
                        .tx
                        .send(RelayMessage::PeerJoined { peer_id: other });
                }
            }
            state.send_to_others(connection_id, &RelayMessage::PeerJoined { peer_id });
        }
        ClientMessage::Put { node, key, value } => {
            state
                .nodes
                .entry(node.clone())
                .or_default()
                .insert(key.clone(), value.clone());
            state.send_to_others(connection_id, &RelayMessage::Put { node, key, value });
        }
        ClientMessage::Get { request_id, node } => {
            let data = state.nodes.get(&node).cloned().unwrap_or_default();
            if let Some(connection) = state.connections.get(&connection_id) {
                let _ = connection.tx.send(RelayMessage::Snapshot {
                    request_id,
                    node,
                    data,
                });
            }
        }
    }
}
