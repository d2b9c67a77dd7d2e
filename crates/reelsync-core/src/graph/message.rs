//! Relay protocol message types
//!
//! Frames exchanged between graph clients and a relay, CBOR-encoded and
//! sent as binary websocket messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{GraphError, NodeData};

/// Peer ID announced to the relay
pub type PeerId = String;

/// Messages sent to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Handshake; the relay announces the peer to everyone else
    #[serde(rename = "hello")]
    Hello {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// Write a value into a node
    #[serde(rename = "put")]
    Put {
        node: String,
        key: String,
        value: Value,
    },

    /// Ask for the current contents of a node
    #[serde(rename = "get")]
    Get {
        #[serde(rename = "requestId")]
        request_id: u64,
        node: String,
    },
}

/// Messages received from the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// Another peer completed its handshake
    #[serde(rename = "peer-joined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// A peer disconnected
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// A value written by another peer
    #[serde(rename = "put")]
    Put {
        node: String,
        key: String,
        value: Value,
    },

    /// Answer to a `get`
    #[serde(rename = "snapshot")]
    Snapshot {
        #[serde(rename = "requestId")]
        request_id: u64,
        node: String,
        data: NodeData,
    },
}

impl ClientMessage {
    /// Create a handshake message
    pub fn hello(peer_id: &str) -> Self {
        ClientMessage::Hello {
            peer_id: peer_id.to_string(),
        }
    }

    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, GraphError> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, GraphError> {
        ciborium::from_reader(bytes).map_err(|e| GraphError::Decode(e.to_string()))
    }
}

impl RelayMessage {
    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, GraphError> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, GraphError> {
        ciborium::from_reader(bytes).map_err(|e| GraphError::Decode(e.to_string()))
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, GraphError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes).map_err(|e| GraphError::Encode(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hello_encoding() {
        let bytes = ClientMessage::hello("peer-123").encode().unwrap();
        assert!(!bytes.is_empty());

        let decoded = ClientMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, ClientMessage::hello("peer-123"));
    }

    #[test]
    fn test_put_carries_record() {
        let msg = ClientMessage::Put {
            node: "reelsync-cuttingRecords".to_string(),
            key: "a".to_string(),
            value: json!({"id": "a", "timestamp": 1_700_000_000_000_i64, "cutLength": 12.5}),
        };
        let decoded = ClientMessage::decode(&msg.encode().unwrap()).unwrap();

        match decoded {
            ClientMessage::Put { key, value, .. } => {
                assert_eq!(key, "a");
                assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
                assert_eq!(value["cutLength"], 12.5);
            }
            other => panic!("Expected Put message, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_decoding() {
        let mut data = NodeData::new();
        data.insert("a".to_string(), json!({"timestamp": 1}));
        let msg = RelayMessage::Snapshot {
            request_id: 7,
            node: "n".to_string(),
            data,
        };

        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result = RelayMessage::decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(GraphError::Decode(_))));
    }
}
