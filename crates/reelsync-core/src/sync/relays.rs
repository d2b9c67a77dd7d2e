//! Relay configuration
//!
//! The relay list is the user-editable set of rendezvous endpoints a graph
//! client dials. It is stored as a JSON array of URLs in the preference
//! file; a missing or malformed entry means "no relays".

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::graph::{GraphConnector, GraphError, PeerEvent};
use crate::storage::{Preferences, StorageResult};

use super::peers::{PeerId, PeerRegistry};
use super::RELAY_SERVERS_KEY;

/// Schemes a relay endpoint may use
const RELAY_SCHEMES: &[&str] = &["ws", "wss", "http", "https"];

/// Reasons a relay URL is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayUrlError {
    #[error("Relay URL is empty")]
    Empty,

    #[error("Relay URL '{0}' has no scheme (expected ws://, wss://, http:// or https://)")]
    MissingScheme(String),

    #[error("Unsupported relay scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Relay URL '{0}' has no host")]
    MissingHost(String),
}

/// Check that a relay URL is usable; returns it trimmed
pub fn validate_relay_url(url: &str) -> Result<String, RelayUrlError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(RelayUrlError::Empty);
    }

    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| RelayUrlError::MissingScheme(url.to_string()))?;
    if !RELAY_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
        return Err(RelayUrlError::UnsupportedScheme(scheme.to_string()));
    }

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = if host_port.starts_with('[') {
        // [ipv6]:port
        host_port.split(']').next().unwrap_or_default().trim_start_matches('[')
    } else {
        host_port.split(':').next().unwrap_or_default()
    };
    if host.is_empty() {
        return Err(RelayUrlError::MissingHost(url.to_string()));
    }

    Ok(url.to_string())
}

/// Persisted list of relay endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayConfig {
    servers: Vec<String>,
}

impl RelayConfig {
    pub fn new(servers: Vec<String>) -> Self {
        Self { servers }
    }

    /// Read the relay list from preferences
    pub fn load(prefs: &Preferences) -> Self {
        let servers = prefs
            .get_json::<Vec<String>>(RELAY_SERVERS_KEY)
            .unwrap_or_default();
        Self { servers }
    }

    /// Write the relay list to preferences
    pub fn save(&self, prefs: &mut Preferences) -> StorageResult<()> {
        prefs.set_json(RELAY_SERVERS_KEY, &self.servers)
    }

    /// Add a relay; returns `false` if it was already listed
    pub fn add(&mut self, url: &str) -> Result<bool, RelayUrlError> {
        let url = validate_relay_url(url)?;
        if self.servers.contains(&url) {
            return Ok(false);
        }
        self.servers.push(url);
        Ok(true)
    }

    /// Remove a relay; returns whether it was listed
    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.servers.len();
        self.servers.retain(|s| s != url.trim());
        self.servers.len() != before
    }

    pub fn clear(&mut self) {
        self.servers.clear();
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Endpoints to dial: relays first, then the already-known peers
    pub fn dial_list(&self, known_peers: &[String]) -> Vec<String> {
        self.servers
            .iter()
            .chain(known_peers.iter())
            .cloned()
            .collect()
    }
}

/// Outcome of a relay probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub connected: bool,
    pub peers: usize,
}

/// Check whether a relay answers
///
/// Opens a throwaway client for `url` and waits for the first peer to show
/// up. Events already queued at that moment are counted too. The client is
/// torn down before returning.
pub async fn probe_relay(
    connector: &dyn GraphConnector,
    url: &str,
    timeout: Duration,
) -> Result<ProbeResult, GraphError> {
    let mut client = connector.connect(&[url.to_string()])?;
    let Some(mut events) = client.take_peer_events() else {
        client.off();
        return Ok(ProbeResult {
            connected: false,
            peers: 0,
        });
    };

    info!("Probing relay {} (timeout {:?})", url, timeout);
    let deadline = Instant::now() + timeout;
    let mut registry = PeerRegistry::new();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => apply(&mut registry, event),
                    None => break,
                }
                if !registry.is_empty() {
                    while let Ok(event) = events.try_recv() {
                        apply(&mut registry, event);
                    }
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Relay probe of {} timed out", url);
                break;
            }
        }
    }
    client.off();

    let result = ProbeResult {
        connected: !registry.is_empty(),
        peers: registry.count(),
    };
    debug!("Relay probe of {}: {:?}", url, result);
    Ok(result)
}

fn apply(registry: &mut PeerRegistry, event: PeerEvent) {
    match event {
        PeerEvent::Hi(descriptor) => {
            registry.join(PeerId::from_descriptor(&descriptor));
        }
        PeerEvent::Bye(descriptor) => {
            registry.leave(&PeerId::from_descriptor(&descriptor));
        }
    }
}
