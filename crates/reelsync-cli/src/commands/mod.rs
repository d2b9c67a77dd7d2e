//! Command handlers

pub mod config;
pub mod exchange;
pub mod mode;
pub mod record;
pub mod relay;
pub mod status;
pub mod watch;

use std::time::Duration;

use anyhow::anyhow;

use reelsync_core::sync::SyncGate;
use reelsync_core::{
    Config, FileCollections, GraphConnector, MemoryGraph, Preferences, SessionOptions,
    StorageError, SyncSession, WsConnector,
};

/// What every session-backed command needs
pub struct SessionContext {
    pub config: Config,
    loopback: bool,
}

impl SessionContext {
    pub fn new(config: Config, loopback: bool) -> Self {
        Self { config, loopback }
    }

    /// Graph connector for this invocation
    pub fn connector(&self) -> Box<dyn GraphConnector> {
        if self.loopback {
            Box::new(MemoryGraph::new().connector())
        } else {
            Box::new(WsConnector::new())
        }
    }

    /// Open a session over the persisted preferences (not started)
    pub fn open_session(&self) -> SyncSession {
        SyncSession::new(
            Preferences::open(self.config.preferences_path()),
            self.connector(),
            SessionOptions::from(&self.config),
        )
    }

    /// Local record collections
    pub fn collections(&self) -> FileCollections {
        FileCollections::open(self.config.collections_dir())
    }

    /// Give a freshly started session time to meet its peers
    ///
    /// Returns whether any peer is reachable. Does not wait when there is no
    /// client or nothing to dial.
    pub async fn wait_for_peers(&self, session: &mut SyncSession) -> bool {
        if session.is_connected() {
            return true;
        }
        let nothing_to_dial =
            session.relays().is_empty() && session.options().known_peers.is_empty();
        if !session.has_client() || nothing_to_dial {
            return false;
        }

        let _ = tokio::time::timeout(self.config.probe_timeout(), async {
            while session.next_peer_event().await.is_some() {
                if session.is_connected() {
                    break;
                }
            }
        })
        .await;

        // A relay usually introduces the peers it knows right after the
        // handshake; give those a moment to arrive
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.poll_peer_events();
        session.is_connected()
    }
}

/// What the user can do about a refused exchange
pub fn refusal_hint(gate: &SyncGate) -> &'static str {
    match gate {
        SyncGate::WrongCollection { .. } => "Only the syncable collection can be exchanged.",
        SyncGate::NotFullSync(_) => "Switch to full sync with: reelsync mode full",
        SyncGate::Disabled => "Enable sync with: reelsync enable",
        SyncGate::NotConnected => {
            "No peer reachable. Check the relays with: reelsync relay test <url>"
        }
    }
}

/// Storage failure with its recovery suggestion, when it has one
pub fn storage_failure(error: StorageError, action: &str) -> anyhow::Error {
    match error.recovery_suggestion() {
        Some(suggestion) => anyhow!("{}: {}\n  {}", action, error, suggestion),
        None => anyhow::Error::new(error).context(action.to_string()),
    }
}
