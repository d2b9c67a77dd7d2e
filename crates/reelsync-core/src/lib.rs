//! reelsync Core Library
//!
//! This crate provides the peer-to-peer sync layer for reelsync, which lets
//! shop-floor devices exchange cutting records over a shared graph store
//! whenever they can reach each other.
//!
//! # Architecture
//!
//! - **Graph store**: eventually-consistent node tree shared by peers, reached
//!   through the `GraphConnector`/`GraphClient` traits
//! - **Sync session**: one per application; owns the mode state machine, the
//!   peer registry and status publishing, and gates record exchange
//!
//! The local record store stays authoritative; the graph only carries copies.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let prefs = Preferences::open(config.preferences_path());
//! let mut session = SyncSession::new(prefs, WsConnector::new(), SessionOptions::from(&config));
//!
//! session.start();
//! session.set_full_sync();
//! session.push("cuttingRecords", &records)?;
//! let pulled = session.pull("cuttingRecords", |_| {}, config.pull_timeout()).await?;
//! ```
//!
//! # Modules
//!
//! - `sync`: session, peer registry, status notifier, gateway, relay config
//! - `graph`: graph store traits plus in-memory and websocket transports
//! - `models`: the record shape exchanged between devices
//! - `storage`: preferences and local record collections
//! - `config`: Application configuration

pub mod config;
pub mod graph;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use graph::{
    GraphClient, GraphConnector, GraphError, MemoryGraph, PeerDescriptor, PeerEvent, RelayServer,
    WsConnector,
};
pub use models::{MergeReport, SyncRecord};
pub use storage::{FileCollections, KeyValueStore, MemoryCollections, Preferences, StorageError};
pub use sync::{
    HealthReport, SessionOptions, StatusSnapshot, SyncError, SyncGate, SyncMode, SyncSession,
};
