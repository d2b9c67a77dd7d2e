//! Sync session
//!
//! One [`SyncSession`] per running application. It owns the sync mode state
//! machine, the graph client lifecycle, the peer registry and the status
//! notifier. The host builds it with its collaborators and drives it
//! explicitly: `start()` on launch, mode transitions on user action,
//! `poll_peer_events()` / `next_peer_event()` to feed peer events in, and
//! `shutdown()` on exit.
//!
//! Every transition persists the new mode and then publishes exactly one
//! status snapshot. Connect failures never escape: they are logged, kept in
//! [`SyncSession::last_connect_error`], and the session simply shows no
//! peers until the user tries again.

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::graph::{GraphClient, GraphConnector, GraphError, PeerDescriptor, PeerEvent};
use crate::storage::Preferences;

use super::error::{SyncError, SyncGate};
use super::mode::SyncMode;
use super::peers::{PeerId, PeerRegistry};
use super::relays::{validate_relay_url, RelayConfig};
use super::status::{StatusNotifier, StatusSnapshot, SubscriptionId};
use super::{SYNC_ENABLED_KEY, SYNC_MODE_KEY};

/// Static session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// The only collection exchanged with peers
    pub syncable_collection: String,
    /// Graph node name prefix
    pub node_prefix: String,
    /// Endpoints dialed after the configured relays
    pub known_peers: Vec<String>,
    /// Enabled flag for a device that never chose
    pub sync_enabled_default: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            syncable_collection: "cuttingRecords".to_string(),
            node_prefix: "reelsync-".to_string(),
            known_peers: Vec::new(),
            sync_enabled_default: true,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            syncable_collection: config.syncable_collection.clone(),
            node_prefix: config.node_prefix.clone(),
            known_peers: config.known_peers.clone(),
            sync_enabled_default: config.sync_enabled_default,
        }
    }
}

/// Summary of the session for troubleshooting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub enabled: bool,
    pub connected: bool,
    pub peers: usize,
    pub mode: SyncMode,
    pub relays: Vec<String>,
    pub last_connect_error: Option<String>,
    pub advice: String,
}

/// The sync layer of one application session
pub struct SyncSession {
    prefs: Preferences,
    connector: Box<dyn GraphConnector>,
    options: SessionOptions,
    mode: SyncMode,
    enabled: bool,
    relays: RelayConfig,
    client: Option<Box<dyn GraphClient>>,
    peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    peers: PeerRegistry,
    notifier: StatusNotifier,
    last_connect_error: Option<GraphError>,
}

impl SyncSession {
    /// Create a session, reading persisted mode, enabled flag and relays
    ///
    /// Nothing is connected until [`start`](Self::start) or a transition.
    pub fn new(
        prefs: Preferences,
        connector: impl GraphConnector + 'static,
        options: SessionOptions,
    ) -> Self {
        let mode = SyncMode::from_persisted(prefs.get(SYNC_MODE_KEY));
        let enabled = match prefs.get(SYNC_ENABLED_KEY) {
            Some("true") => true,
            Some("false") => false,
            Some(other) => {
                warn!("Ignoring malformed sync enabled flag '{}'", other);
                options.sync_enabled_default
            }
            None => options.sync_enabled_default,
        };
        let relays = RelayConfig::load(&prefs);
        let notifier = StatusNotifier::new(StatusSnapshot::compute(0, mode, enabled));

        Self {
            prefs,
            connector: Box::new(connector),
            options,
            mode,
            enabled,
            relays,
            client: None,
            peer_events: None,
            peers: PeerRegistry::new(),
            notifier,
            last_connect_error: None,
        }
    }

    /// Restore the persisted mode's connection and publish the initial status
    pub fn start(&mut self) {
        info!("Starting sync session in {} mode", self.mode);
        if self.mode.wants_connection() {
            self.connect();
        }
        self.notify();
    }

    /// Tear the graph client down without touching persisted state
    pub fn shutdown(&mut self) {
        info!("Shutting down sync session");
        self.disconnect();
        self.notify();
    }

    // ==================== Mode transitions ====================

    pub fn set_offline(&mut self) {
        self.set_mode(SyncMode::Offline);
        self.disconnect();
        self.notify();
    }

    pub fn set_connected_no_sync(&mut self) {
        self.set_mode(SyncMode::ConnectedNoSync);
        self.connect();
        self.notify();
    }

    pub fn set_full_sync(&mut self) {
        self.set_mode(SyncMode::FullSync);
        self.connect();
        self.notify();
    }

    /// Apply any mode
    pub fn transition(&mut self, mode: SyncMode) {
        match mode {
            SyncMode::Offline => self.set_offline(),
            SyncMode::ConnectedNoSync => self.set_connected_no_sync(),
            SyncMode::FullSync => self.set_full_sync(),
        }
    }

    pub fn enable(&mut self) {
        self.set_enabled(true);
    }

    pub fn disable(&mut self) {
        self.set_enabled(false);
    }

    fn set_mode(&mut self, mode: SyncMode) {
        info!("Sync mode: {} -> {}", self.mode, mode);
        self.mode = mode;
        if let Err(e) = self.prefs.set(SYNC_MODE_KEY, mode.as_str()) {
            warn!("Failed to persist sync mode: {}", e);
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        info!("Sync {}", if enabled { "enabled" } else { "disabled" });
        self.enabled = enabled;
        if let Err(e) = self.prefs.set(SYNC_ENABLED_KEY, enabled.to_string()) {
            warn!("Failed to persist sync enabled flag: {}", e);
        }
        self.notify();
    }

    // ==================== Connection lifecycle ====================

    /// Create the graph client unless one with peers is already live
    ///
    /// A client without peers (failed dial, every relay dropped) is torn
    /// down and dialed again, so re-invoking a transition retries.
    fn connect(&mut self) {
        if self.client.is_some() {
            self.drain_peer_events(false);
            if self.is_connected() {
                debug!("Reusing live graph client");
                return;
            }
            info!("Graph client has no peers, dialing again");
            self.disconnect();
        }

        let peers = self.relays.dial_list(&self.options.known_peers);
        match self.connector.connect(&peers) {
            Ok(mut client) => {
                info!("Graph client connected ({} endpoint(s))", peers.len());
                self.peer_events = client.take_peer_events();
                self.client = Some(client);
                self.last_connect_error = None;
                // Peers already around announce themselves right away; the
                // caller's single publish covers them
                self.drain_peer_events(false);
            }
            Err(e) => {
                warn!("Could not connect to the graph store: {}", e);
                self.last_connect_error = Some(e);
            }
        }
    }

    /// Drop the graph client and forget every peer
    fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.off();
            info!("Graph client disconnected");
        }
        self.peer_events = None;
        self.peers.clear();
    }

    /// Replace the relay list; a live client is rebuilt against it
    pub fn set_relays(&mut self, servers: Vec<String>) -> Result<(), SyncError> {
        let servers = servers
            .iter()
            .map(|url| validate_relay_url(url))
            .collect::<Result<Vec<_>, _>>()?;

        self.relays = RelayConfig::new(servers);
        if let Err(e) = self.relays.save(&mut self.prefs) {
            warn!("Failed to persist relay list: {}", e);
        }

        if self.client.is_some() {
            info!("Relay list changed, reconnecting");
            self.disconnect();
            self.connect();
        }
        self.notify();
        Ok(())
    }

    // ==================== Peer events ====================

    pub fn on_peer_join(&mut self, descriptor: &PeerDescriptor) {
        if self.record_join(descriptor) {
            self.notify();
        }
    }

    pub fn on_peer_leave(&mut self, descriptor: &PeerDescriptor) {
        if self.record_leave(descriptor) {
            self.notify();
        }
    }

    fn record_join(&mut self, descriptor: &PeerDescriptor) -> bool {
        let peer = PeerId::from_descriptor(descriptor);
        debug!("Peer hi: {} ({:?})", peer, peer.source());
        self.peers.join(peer)
    }

    fn record_leave(&mut self, descriptor: &PeerDescriptor) -> bool {
        let peer = PeerId::from_descriptor(descriptor);
        debug!("Peer bye: {} ({:?})", peer, peer.source());
        self.peers.leave(&peer)
    }

    /// Apply one event to the registry; returns whether it changed
    fn record_peer_event(&mut self, event: &PeerEvent) -> bool {
        match event {
            PeerEvent::Hi(descriptor) => self.record_join(descriptor),
            PeerEvent::Bye(descriptor) => self.record_leave(descriptor),
        }
    }

    /// Apply queued events; publishes per effective change when `publish`
    fn drain_peer_events(&mut self, publish: bool) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.peer_events.as_mut().map(|rx| rx.try_recv()) {
                Some(Ok(event)) => event,
                Some(Err(mpsc::error::TryRecvError::Disconnected)) => {
                    self.peer_events = None;
                    break;
                }
                Some(Err(mpsc::error::TryRecvError::Empty)) | None => break,
            };
            if self.record_peer_event(&event) && publish {
                self.notify();
            }
            handled += 1;
        }
        handled
    }

    /// Apply every peer event already queued; returns how many were handled
    pub fn poll_peer_events(&mut self) -> usize {
        self.drain_peer_events(true)
    }

    /// Wait for the next peer event and apply it
    ///
    /// Returns `None` when there is no live client or its event stream ended.
    pub async fn next_peer_event(&mut self) -> Option<PeerEvent> {
        let event = self.peer_events.as_mut()?.recv().await;
        match event {
            Some(event) => {
                if self.record_peer_event(&event) {
                    self.notify();
                }
                Some(event)
            }
            None => {
                self.peer_events = None;
                None
            }
        }
    }

    // ==================== Status ====================

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_connected(&self) -> bool {
        !self.peers.is_empty()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.count()
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn relays(&self) -> &RelayConfig {
        &self.relays
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Whether a graph client currently exists
    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Error from the most recent failed connect, cleared on success
    pub fn last_connect_error(&self) -> Option<&GraphError> {
        self.last_connect_error.as_ref()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::compute(self.peers.count(), self.mode, self.enabled)
    }

    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&StatusSnapshot) + Send + 'static,
    ) -> SubscriptionId {
        self.notifier.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.notifier.watch()
    }

    fn notify(&mut self) {
        let snapshot = self.status();
        self.notifier.publish(snapshot);
    }

    pub fn health(&self) -> HealthReport {
        let connected = self.is_connected();
        let advice = if self.mode == SyncMode::Offline {
            "Sync is offline; switch to connected or full mode to reach peers".to_string()
        } else if let Some(e) = &self.last_connect_error {
            format!("Connecting failed ({}); check the relay list and try again", e)
        } else if !connected && self.relays.is_empty() && self.options.known_peers.is_empty() {
            "No relays configured; add one with a ws:// or wss:// URL".to_string()
        } else if !connected {
            "No peers reachable yet; check that a relay is running".to_string()
        } else if self.mode == SyncMode::ConnectedNoSync {
            "Connected; switch to full mode to exchange records".to_string()
        } else if !self.enabled {
            "Connected in full mode, but sync is disabled".to_string()
        } else {
            "Healthy".to_string()
        };

        HealthReport {
            enabled: self.enabled,
            connected,
            peers: self.peers.count(),
            mode: self.mode,
            relays: self.relays.servers().to_vec(),
            last_connect_error: self.last_connect_error.as_ref().map(|e| e.to_string()),
            advice,
        }
    }

    // ==================== Gateway support ====================

    /// Check every push/pull gate, in order
    pub fn check_gate(&self, store_name: &str) -> Result<(), SyncGate> {
        if store_name != self.options.syncable_collection {
            return Err(SyncGate::WrongCollection {
                store: store_name.to_string(),
                expected: self.options.syncable_collection.clone(),
            });
        }
        if self.mode != SyncMode::FullSync {
            return Err(SyncGate::NotFullSync(self.mode));
        }
        if !self.enabled {
            return Err(SyncGate::Disabled);
        }
        if self.client.is_none() || !self.is_connected() {
            return Err(SyncGate::NotConnected);
        }
        Ok(())
    }

    /// Graph node holding a collection
    pub fn node_name(&self, store_name: &str) -> String {
        format!("{}{}", self.options.node_prefix, store_name)
    }

    /// Live client, after the gate passed
    pub(super) fn gated_client(&self, store_name: &str) -> Result<&dyn GraphClient, SyncError> {
        self.check_gate(store_name)?;
        self.client
            .as_deref()
            .ok_or(SyncError::Refused(SyncGate::NotConnected))
    }

    pub(super) fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub(super) fn prefs_mut(&mut self) -> &mut Preferences {
        &mut self.prefs
    }

    /// Connector this session dials through
    pub fn connector(&self) -> &dyn GraphConnector {
        self.connector.as_ref()
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("mode", &self.mode)
            .field("enabled", &self.enabled)
            .field("peers", &self.peers.count())
            .field("relays", &self.relays)
            .field("has_client", &self.client.is_some())
            .finish()
    }
}
