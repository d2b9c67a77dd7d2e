//! Sync error types

use thiserror::Error;

use crate::graph::GraphError;
use crate::storage::StorageError;

use super::mode::SyncMode;
use super::relays::RelayUrlError;

/// Why a push or pull was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncGate {
    /// Only one collection is ever exchanged
    #[error("Collection '{store}' is not synced (only '{expected}' is)")]
    WrongCollection { store: String, expected: String },

    /// Records move only in full-sync mode
    #[error("Sync mode is '{0}', records are only exchanged in 'full' mode")]
    NotFullSync(SyncMode),

    #[error("Sync is disabled")]
    Disabled,

    /// Full-sync mode, but no graph client or no peers
    #[error("Not connected to any peer")]
    NotConnected,
}

/// Errors returned by sync session operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync refused: {0}")]
    Refused(SyncGate),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    RelayUrl(#[from] RelayUrlError),
}

impl SyncError {
    /// The gate that refused the operation, if that is what happened
    pub fn gate(&self) -> Option<&SyncGate> {
        match self {
            SyncError::Refused(gate) => Some(gate),
            _ => None,
        }
    }
}

impl From<SyncGate> for SyncError {
    fn from(gate: SyncGate) -> Self {
        SyncError::Refused(gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_names_the_gate() {
        let err = SyncError::from(SyncGate::NotFullSync(SyncMode::ConnectedNoSync));
        assert_eq!(
            err.to_string(),
            "Sync refused: Sync mode is 'connected', records are only exchanged in 'full' mode"
        );
        assert_eq!(err.gate(), Some(&SyncGate::NotFullSync(SyncMode::ConnectedNoSync)));
    }

    #[test]
    fn test_graph_errors_pass_through() {
        let err = SyncError::from(GraphError::Closed);
        assert_eq!(err.to_string(), "Graph client is closed");
        assert!(err.gate().is_none());
    }
}
