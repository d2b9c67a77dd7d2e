//! Storage layer
//!
//! Local persistence used by the sync layer.
//!
//! ## Architecture
//!
//! - **Preferences**: string-keyed session state (mode, enabled flag, relays)
//! - **Collections**: the local record store behind a generic async
//!   key-value contract
//!
//! Both write through atomic temp-file renames.

pub mod collections;
pub mod error;
pub mod persistence;

pub use collections::{
    key_path, record_key, FileCollections, KeyValueStore, MemoryCollections, SETTINGS_COLLECTION,
};
pub use error::{StorageError, StorageResult};
pub use persistence::Preferences;
