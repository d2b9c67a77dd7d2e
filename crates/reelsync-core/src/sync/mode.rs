//! Sync modes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How far a device participates in the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// No graph client, no peers
    #[default]
    #[serde(rename = "offline")]
    Offline,
    /// Connected to peers, but records are never exchanged
    #[serde(rename = "connected")]
    ConnectedNoSync,
    /// Connected and exchanging records
    #[serde(rename = "full")]
    FullSync,
}

impl SyncMode {
    /// Persisted form
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Offline => "offline",
            SyncMode::ConnectedNoSync => "connected",
            SyncMode::FullSync => "full",
        }
    }

    /// Read a persisted mode; anything unrecognized is `Offline`
    pub fn from_persisted(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    /// Whether this mode wants a graph client
    pub fn wants_connection(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized mode name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown sync mode '{0}' (expected offline, connected or full)")]
pub struct ParseModeError(pub String);

impl FromStr for SyncMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "offline" => Ok(SyncMode::Offline),
            "connected" => Ok(SyncMode::ConnectedNoSync),
            "full" => Ok(SyncMode::FullSync),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}
