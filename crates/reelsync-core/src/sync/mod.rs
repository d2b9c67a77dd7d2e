//! Peer-to-peer sync layer
//!
//! Sits between the local record store and the shared graph:
//!
//! - [`SyncSession`]: mode state machine and graph client lifecycle
//! - [`PeerRegistry`]: which peers are reachable right now
//! - [`StatusNotifier`]: status snapshots for the UI
//! - gateway: gated push/pull of the syncable collection
//! - [`RelayConfig`]: persisted relay endpoints
//!
//! ## Usage
//!
//! ```ignore
//! let mut session = SyncSession::new(prefs, WsConnector::new(), SessionOptions::from(&config));
//! session.start();
//! session.set_full_sync();
//! session.push("cuttingRecords", &records)?;
//! ```

mod error;
mod gateway;
mod mode;
mod peers;
mod relays;
mod session;
mod status;

pub use error::{SyncError, SyncGate};
pub use mode::{ParseModeError, SyncMode};
pub use peers::{PeerId, PeerIdSource, PeerRegistry};
pub use relays::{probe_relay, validate_relay_url, ProbeResult, RelayConfig, RelayUrlError};
pub use session::{HealthReport, SessionOptions, SyncSession};
pub use status::{StatusNotifier, StatusSnapshot, SubscriptionId};

/// Preference key of the sync mode (`offline`, `connected` or `full`)
pub const SYNC_MODE_KEY: &str = "reelsync-sync-mode";

/// Preference key of the enabled flag (`true` or `false`)
pub const SYNC_ENABLED_KEY: &str = "reelsync-sync-enabled";

/// Preference key of the relay list (JSON array of URLs)
pub const RELAY_SERVERS_KEY: &str = "reelsync-relay-servers";

/// Preference key of the last successful incremental push (ms since epoch)
pub const LAST_PUSH_KEY: &str = "reelsync-last-push";
