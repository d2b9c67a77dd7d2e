//! Peer registry
//!
//! Tracks which peers are currently reachable. Transports describe peers
//! loosely (see [`PeerDescriptor`]), so every descriptor is normalized to a
//! [`PeerId`] first.
//!
//! Identity fallback order: `id`, then `url`, then `wire`, then the
//! canonical JSON of the whole descriptor. The last one is a known gap: a
//! peer that reconnects with slightly different metadata gets a new
//! structural id, and the count can drift until the client is torn down.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::graph::PeerDescriptor;

/// Which descriptor field a [`PeerId`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerIdSource {
    Id,
    Url,
    Wire,
    Structural,
}

/// Normalized peer identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeerId {
    value: String,
    source: PeerIdSource,
}

impl PeerId {
    /// Derive an identity from a transport descriptor
    pub fn from_descriptor(descriptor: &PeerDescriptor) -> Self {
        let candidates = [
            (descriptor.id.as_deref(), PeerIdSource::Id),
            (descriptor.url.as_deref(), PeerIdSource::Url),
            (descriptor.wire.as_deref(), PeerIdSource::Wire),
        ];
        for (value, source) in candidates {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                return Self {
                    value: value.to_string(),
                    source,
                };
            }
        }

        // serde_json maps are ordered, so equal descriptors give equal keys
        let value = serde_json::to_string(descriptor).unwrap_or_else(|_| format!("{:?}", descriptor));
        Self {
            value,
            source: PeerIdSource::Structural,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> PeerIdSource {
        self.source
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Set of reachable peers, keyed by identity string
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<String, PeerId>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer; returns `false` if it was already known
    pub fn join(&mut self, peer: PeerId) -> bool {
        if self.peers.contains_key(peer.as_str()) {
            return false;
        }
        self.peers.insert(peer.value.clone(), peer);
        true
    }

    /// Forget a peer; returns `false` if it was not known
    pub fn leave(&mut self, peer: &PeerId) -> bool {
        self.peers.remove(peer.as_str()).is_some()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer.as_str())
    }

    /// Known peers in identity order
    pub fn iter(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> PeerDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_fallback_order() {
        let full = descriptor(json!({"id": "p1", "wsp": "wss://r/gun", "wire": "w1"}));
        let id = PeerId::from_descriptor(&full);
        assert_eq!(id.as_str(), "p1");
        assert_eq!(id.source(), PeerIdSource::Id);

        let url = PeerId::from_descriptor(&descriptor(json!({"wsp": "wss://r/gun", "wire": "w1"})));
        assert_eq!(url.as_str(), "wss://r/gun");
        assert_eq!(url.source(), PeerIdSource::Url);

        let wire = PeerId::from_descriptor(&descriptor(json!({"id": "", "wire": "w1"})));
        assert_eq!(wire.as_str(), "w1");
        assert_eq!(wire.source(), PeerIdSource::Wire);
    }

    #[test]
    fn test_structural_fallback_is_stable_for_equal_descriptors() {
        let a = PeerId::from_descriptor(&descriptor(json!({"met": 1, "lane": "x"})));
        let b = PeerId::from_descriptor(&descriptor(json!({"lane": "x", "met": 1})));

        assert_eq!(a.source(), PeerIdSource::Structural);
        assert_eq!(a, b);
    }

    #[test]
    fn test_structural_fallback_drifts_when_metadata_changes() {
        let before = PeerId::from_descriptor(&descriptor(json!({"met": 1})));
        let after = PeerId::from_descriptor(&descriptor(json!({"met": 2})));

        assert_ne!(before, after);
    }

    #[test]
    fn test_join_and_leave_are_idempotent() {
        let mut registry = PeerRegistry::new();
        let peer = PeerId::from_descriptor(&PeerDescriptor::with_id("p1"));

        assert!(registry.join(peer.clone()));
        assert!(!registry.join(peer.clone()));
        assert_eq!(registry.count(), 1);

        assert!(registry.leave(&peer));
        assert!(!registry.leave(&peer));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut registry = PeerRegistry::new();
        registry.join(PeerId::from_descriptor(&PeerDescriptor::with_id("a")));
        registry.join(PeerId::from_descriptor(&PeerDescriptor::with_url("ws://b")));

        let ids: Vec<_> = registry.iter().map(|p| p.as_str()).collect();
        assert_eq!(ids, vec!["a", "ws://b"]);

        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
