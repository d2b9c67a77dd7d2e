//! Status publishing
//!
//! The session publishes a [`StatusSnapshot`] after every state change.
//! Subscribers are plain callbacks, called synchronously in subscription
//! order; async observers can follow the latest snapshot through a
//! `watch` channel instead.

use serde::Serialize;
use tokio::sync::watch;

use super::mode::SyncMode;

/// Sync status as shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_connected: bool,
    pub peer_count: usize,
    pub is_syncing: bool,
    pub is_enabled: bool,
    pub sync_mode: SyncMode,
}

impl StatusSnapshot {
    /// Derive a snapshot from the session state
    ///
    /// `is_syncing` only looks at peers and mode; a disabled full-sync
    /// session still reports syncing while peers are around.
    pub fn compute(peer_count: usize, sync_mode: SyncMode, is_enabled: bool) -> Self {
        Self {
            is_connected: peer_count > 0,
            peer_count,
            is_syncing: peer_count > 0 && sync_mode == SyncMode::FullSync,
            is_enabled,
            sync_mode,
        }
    }
}

/// Handle returned by [`StatusNotifier::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&StatusSnapshot) + Send>;

/// Publish/subscribe hub for status snapshots
pub struct StatusNotifier {
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_id: u64,
    latest: watch::Sender<StatusSnapshot>,
}

impl StatusNotifier {
    pub fn new(initial: StatusSnapshot) -> Self {
        let (latest, _) = watch::channel(initial);
        Self {
            subscribers: Vec::new(),
            next_id: 0,
            latest,
        }
    }

    /// Register a callback for every future snapshot
    pub fn subscribe(&mut self, callback: impl FnMut(&StatusSnapshot) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback; returns whether it was registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    /// Deliver a snapshot to every subscriber, in subscription order
    pub fn publish(&mut self, snapshot: StatusSnapshot) {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&snapshot);
        }
        self.latest.send_replace(snapshot);
    }

    /// Receiver that always holds the latest snapshot
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.latest.subscribe()
    }

    /// Last published snapshot
    pub fn latest(&self) -> StatusSnapshot {
        *self.latest.borrow()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for StatusNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusNotifier")
            .field("subscribers", &self.subscribers.len())
            .field("latest", &self.latest())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_compute() {
        let idle = StatusSnapshot::compute(0, SyncMode::FullSync, true);
        assert!(!idle.is_connected);
        assert!(!idle.is_syncing);

        let syncing = StatusSnapshot::compute(2, SyncMode::FullSync, false);
        assert!(syncing.is_connected);
        assert!(syncing.is_syncing);
        assert!(!syncing.is_enabled);

        let connected = StatusSnapshot::compute(1, SyncMode::ConnectedNoSync, true);
        assert!(connected.is_connected);
        assert!(!connected.is_syncing);
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = StatusNotifier::new(StatusSnapshot::default());

        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            notifier.subscribe(move |snapshot| {
                calls.lock().unwrap().push((name, snapshot.peer_count));
            });
        }

        notifier.publish(StatusSnapshot::compute(3, SyncMode::FullSync, true));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("first", 3), ("second", 3), ("third", 3)]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let count = Arc::new(Mutex::new(0));
        let mut notifier = StatusNotifier::new(StatusSnapshot::default());

        let counter = count.clone();
        let id = notifier.subscribe(move |_| *counter.lock().unwrap() += 1);
        notifier.publish(StatusSnapshot::default());

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.publish(StatusSnapshot::default());

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn test_watch_follows_latest() {
        let mut notifier = StatusNotifier::new(StatusSnapshot::default());
        let rx = notifier.watch();

        let snapshot = StatusSnapshot::compute(1, SyncMode::ConnectedNoSync, true);
        notifier.publish(snapshot);

        assert_eq!(*rx.borrow(), snapshot);
        assert_eq!(notifier.latest(), snapshot);
    }

    #[test]
    fn test_snapshot_json_keys() {
        let json = serde_json::to_value(StatusSnapshot::compute(1, SyncMode::FullSync, true)).unwrap();
        assert_eq!(json["isConnected"], true);
        assert_eq!(json["peerCount"], 1);
        assert_eq!(json["syncMode"], "full");
    }
}
