//! Record exchange
//!
//! Push and pull move records of the syncable collection through the
//! graph node `<prefix><collection>`, one key per record id. Both are gated
//! by [`SyncSession::check_gate`]. Pull is best effort: it collects what
//! arrives within its window and never fails just because nobody answered.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{dedup_by_id, records_from_node, MergeReport, SyncRecord};
use crate::storage::{KeyValueStore, StorageError};

use super::error::SyncError;
use super::session::SyncSession;
use super::LAST_PUSH_KEY;

impl SyncSession {
    /// Write records to the shared graph
    ///
    /// Records with an empty id are skipped. Returns how many were written.
    pub fn push(&self, store_name: &str, records: &[SyncRecord]) -> Result<usize, SyncError> {
        let client = self.gated_client(store_name)?;
        let node = self.node_name(store_name);

        let mut written = 0;
        for record in records.iter().filter(|r| !r.id.is_empty()) {
            client.put(&node, &record.id, record.to_value())?;
            written += 1;
        }
        info!("Pushed {} record(s) to {}", written, node);
        Ok(written)
    }

    /// Collect records from peers for up to `timeout`
    ///
    /// Subscribes to the node and asks for its current contents at the same
    /// time. `on_partial` sees the collection as soon as the one-shot read
    /// answers. Records from the one-shot read come first; a repeated id keeps
    /// its first occurrence.
    pub async fn pull(
        &self,
        store_name: &str,
        on_partial: impl FnOnce(&[SyncRecord]),
        timeout: Duration,
    ) -> Result<Vec<SyncRecord>, SyncError> {
        let client = self.gated_client(store_name)?;
        let node = self.node_name(store_name);
        debug!("Pulling {} for up to {:?}", node, timeout);

        let deadline = Instant::now() + timeout;
        let mut subscription = client.on(&node);
        let mut once = client.once(&node);
        let mut on_partial = Some(on_partial);

        let mut from_once: Vec<SyncRecord> = Vec::new();
        let mut from_subscription: Vec<SyncRecord> = Vec::new();
        let mut subscription_open = true;
        let mut once_pending = true;

        loop {
            if !subscription_open && !once_pending {
                break;
            }

            tokio::select! {
                data = subscription.recv(), if subscription_open => match data {
                    Some(data) => {
                        from_subscription.extend(records_from_node(&data));
                        from_subscription = dedup_by_id(from_subscription);
                    }
                    None => subscription_open = false,
                },

                answer = &mut once, if once_pending => {
                    once_pending = false;
                    if let Ok(data) = answer {
                        from_once = dedup_by_id(records_from_node(&data));
                        if let Some(callback) = on_partial.take() {
                            callback(&merge_collected(&from_once, &from_subscription));
                        }
                    }
                }

                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let collected = merge_collected(&from_once, &from_subscription);
        info!("Pulled {} record(s) from {}", collected.len(), node);
        Ok(collected)
    }

    /// Push local records created since the last successful push
    ///
    /// Reads the syncable collection from `store`, pushes records whose
    /// timestamp is newer than the remembered push time and, if anything was
    /// pushed, remembers `now_ms`. Returns the number pushed.
    pub async fn push_new_records<S: KeyValueStore>(
        &mut self,
        store: &S,
        now_ms: i64,
    ) -> Result<usize, SyncError> {
        let collection = self.options().syncable_collection.clone();
        self.check_gate(&collection)?;

        let last_push = self
            .prefs()
            .get(LAST_PUSH_KEY)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);

        let fresh: Vec<SyncRecord> = store
            .get_all(&collection)
            .await?
            .iter()
            .filter_map(|value| SyncRecord::from_value(value, None))
            .filter(|record| record.timestamp > last_push)
            .collect();

        if fresh.is_empty() {
            debug!("No records newer than {}", last_push);
            return Ok(0);
        }

        let pushed = self.push(&collection, &fresh)?;
        if let Err(e) = self.prefs_mut().set(LAST_PUSH_KEY, now_ms.to_string()) {
            warn!("Failed to remember push time: {}", e);
        }
        Ok(pushed)
    }

    /// Merge pulled records into a local collection
    ///
    /// Unknown records are inserted with `createdAt`/`updatedAt` filled in.
    /// Known records are replaced only when the remote copy is strictly
    /// newer (by `updatedAt`, else `timestamp`), keeping the local
    /// `createdAt`.
    pub async fn merge_remote<S: KeyValueStore>(
        &self,
        store: &S,
        collection: &str,
        records: &[SyncRecord],
    ) -> Result<MergeReport, SyncError> {
        let mut report = MergeReport::default();

        for remote in records {
            let local = store.get(collection, &remote.id).await?;
            let mut value = remote.to_value();

            match local {
                None => {
                    let object = as_object_mut(&mut value, collection)?;
                    object
                        .entry("createdAt")
                        .or_insert_with(|| Value::from(remote.timestamp));
                    object
                        .entry("updatedAt")
                        .or_insert_with(|| Value::from(remote.timestamp));
                    store.put(collection, value).await?;
                    report.merged += 1;
                }
                Some(local) => {
                    let local_updated = SyncRecord::from_value(&local, Some(&remote.id))
                        .map(|r| r.updated_at())
                        .unwrap_or(0);

                    if remote.updated_at() <= local_updated {
                        report.skipped += 1;
                        continue;
                    }

                    let created_at = local
                        .get("createdAt")
                        .cloned()
                        .or_else(|| remote.fields.get("createdAt").cloned())
                        .unwrap_or_else(|| Value::from(remote.timestamp));
                    let object = as_object_mut(&mut value, collection)?;
                    object.insert("createdAt".to_string(), created_at);
                    object
                        .entry("updatedAt")
                        .or_insert_with(|| Value::from(remote.updated_at()));
                    store.put(collection, value).await?;
                    report.merged += 1;
                }
            }
        }

        info!(
            "Merged {} record(s) into {}, skipped {}",
            report.merged, collection, report.skipped
        );
        Ok(report)
    }
}

/// One-shot results first, then subscription results, first id wins
fn merge_collected(from_once: &[SyncRecord], from_subscription: &[SyncRecord]) -> Vec<SyncRecord> {
    dedup_by_id(
        from_once
            .iter()
            .chain(from_subscription.iter())
            .cloned()
            .collect(),
    )
}

fn as_object_mut<'a>(
    value: &'a mut Value,
    collection: &str,
) -> Result<&'a mut serde_json::Map<String, Value>, StorageError> {
    value.as_object_mut().ok_or_else(|| StorageError::MissingKey {
        collection: collection.to_string(),
        key_path: "id".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphClient, GraphConnector, MemoryGraph, PeerDescriptor};
    use crate::storage::{MemoryCollections, Preferences};
    use crate::sync::{SessionOptions, SyncGate, SyncMode};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const NODE: &str = "reelsync-cuttingRecords";
    const STORE: &str = "cuttingRecords";

    fn session(graph: &MemoryGraph) -> SyncSession {
        SyncSession::new(
            Preferences::in_memory(),
            graph.connector(),
            SessionOptions::default(),
        )
    }

    /// Full-sync session with one other client of the graph as its peer
    fn connected(graph: &MemoryGraph) -> (SyncSession, Box<dyn GraphClient>) {
        let other = graph.connector().connect(&[]).unwrap();
        let mut session = session(graph);
        session.set_full_sync();
        assert!(session.is_connected());
        (session, other)
    }

    fn record_a() -> Vec<SyncRecord> {
        vec![SyncRecord::new("a", 1)]
    }

    #[test]
    fn test_offline_push_is_refused_without_write() {
        let graph = MemoryGraph::new();
        let session = session(&graph);

        let result = session.push(STORE, &record_a());
        assert!(matches!(
            result,
            Err(SyncError::Refused(SyncGate::NotFullSync(SyncMode::Offline)))
        ));
        assert!(graph.writes().is_empty());
    }

    #[test]
    fn test_full_sync_push_writes_key() {
        let graph = MemoryGraph::new();
        let (session, _other) = connected(&graph);

        assert_eq!(session.push(STORE, &record_a()).unwrap(), 1);
        assert_eq!(graph.writes(), vec![(NODE.to_string(), "a".to_string())]);
        assert_eq!(graph.node(NODE).unwrap()["a"], json!({"id": "a", "timestamp": 1}));
    }

    #[test]
    fn test_push_refused_for_every_failing_gate_combination() {
        for wrong_store in [false, true] {
            for mode in [SyncMode::Offline, SyncMode::ConnectedNoSync, SyncMode::FullSync] {
                for enabled in [false, true] {
                    let passes = !wrong_store && mode == SyncMode::FullSync && enabled;
                    if passes {
                        continue;
                    }

                    let graph = MemoryGraph::new();
                    let _other = graph.connector().connect(&[]).unwrap();
                    let mut session = session(&graph);
                    session.transition(mode);
                    if !enabled {
                        session.disable();
                    }
                    let store = if wrong_store { "reelLabels" } else { STORE };

                    let result = session.push(store, &record_a());
                    assert!(
                        matches!(result, Err(SyncError::Refused(_))),
                        "store={} mode={} enabled={}",
                        store,
                        mode,
                        enabled
                    );
                    assert!(graph.writes().is_empty());
                }
            }
        }
    }

    #[test]
    fn test_push_refused_without_peers() {
        let graph = MemoryGraph::new();
        let mut session = session(&graph);
        session.set_full_sync();

        assert!(matches!(
            session.push(STORE, &record_a()),
            Err(SyncError::Refused(SyncGate::NotConnected))
        ));
        assert!(graph.writes().is_empty());
    }

    #[test]
    fn test_push_skips_empty_ids() {
        let graph = MemoryGraph::new();
        let (session, _other) = connected(&graph);

        let records = vec![SyncRecord::new("", 1), SyncRecord::new("b", 2)];
        assert_eq!(session.push(STORE, &records).unwrap(), 1);
        assert_eq!(graph.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_pull_with_no_data_resolves_empty_within_timeout() {
        let graph = MemoryGraph::new();
        let (session, _other) = connected(&graph);

        let started = std::time::Instant::now();
        let records = session
            .pull(STORE, |_| panic!("nothing should answer"), Duration::from_millis(100))
            .await
            .unwrap();

        assert!(records.is_empty());
        assert!(started.elapsed() < Duration::from_millis(100) + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_pull_collects_and_deduplicates() {
        let graph = MemoryGraph::new();
        graph.seed(NODE, "_", json!({"#": NODE}));
        graph.seed(NODE, "a", json!({"id": "a", "timestamp": 1, "cutLength": 10}));
        graph.seed(NODE, "b", json!({"timestamp": 2}));
        graph.seed(NODE, "junk", json!({"id": "junk"}));
        let (session, other) = connected(&graph);

        let partial = Arc::new(Mutex::new(None));
        let sink = partial.clone();
        let pull = session.pull(
            STORE,
            move |records: &[SyncRecord]| *sink.lock().unwrap() = Some(records.len()),
            Duration::from_millis(150),
        );

        // Changes while the pull is running reach it through the subscription
        let writer = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other
                .put(NODE, "a", json!({"id": "a", "timestamp": 1, "cutLength": 99}))
                .unwrap();
            other.put(NODE, "c", json!({"id": "c", "timestamp": 3})).unwrap();
        };

        let (records, ()) = tokio::join!(pull, writer);
        let records = records.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        // One-shot copy of `a` wins over the later subscription copy
        assert_eq!(records[0].fields["cutLength"], 10);
        assert_eq!(*partial.lock().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_pull_is_gated() {
        let graph = MemoryGraph::new();
        let (mut session, _other) = connected(&graph);
        session.set_connected_no_sync();

        let result = session.pull(STORE, |_| {}, Duration::from_millis(10)).await;
        assert!(matches!(
            result,
            Err(SyncError::Refused(SyncGate::NotFullSync(SyncMode::ConnectedNoSync)))
        ));
    }

    #[tokio::test]
    async fn test_push_new_records_is_incremental() {
        let graph = MemoryGraph::new();
        let (mut session, _other) = connected(&graph);
        let store = MemoryCollections::new();
        store.add(STORE, json!({"id": "old", "timestamp": 100})).await.unwrap();
        store.add(STORE, json!({"id": "new", "timestamp": 300})).await.unwrap();

        session.prefs_mut().set(LAST_PUSH_KEY, "200").unwrap();
        assert_eq!(session.push_new_records(&store, 400).await.unwrap(), 1);
        assert_eq!(graph.writes(), vec![(NODE.to_string(), "new".to_string())]);
        assert_eq!(session.prefs().get(LAST_PUSH_KEY), Some("400"));

        // Nothing newer than 400 now
        assert_eq!(session.push_new_records(&store, 500).await.unwrap(), 0);
        assert_eq!(graph.writes().len(), 1);
        assert_eq!(session.prefs().get(LAST_PUSH_KEY), Some("400"));
    }

    #[tokio::test]
    async fn test_push_new_records_is_gated() {
        let graph = MemoryGraph::new();
        let mut session = session(&graph);
        let store = MemoryCollections::new();
        store.add(STORE, json!({"id": "a", "timestamp": 1})).await.unwrap();

        let result = session.push_new_records(&store, 10).await;
        assert!(matches!(result, Err(SyncError::Refused(_))));
        assert!(session.prefs().get(LAST_PUSH_KEY).is_none());
    }

    #[tokio::test]
    async fn test_merge_remote() {
        let graph = MemoryGraph::new();
        let session = session(&graph);
        let store = MemoryCollections::new();
        store
            .add(STORE, json!({"id": "same", "timestamp": 5, "createdAt": 5, "updatedAt": 50}))
            .await
            .unwrap();
        store
            .add(STORE, json!({"id": "stale", "timestamp": 5, "createdAt": 1, "updatedAt": 10}))
            .await
            .unwrap();

        let remote = vec![
            SyncRecord::new("fresh", 7).with_field("wireId", "W-7"),
            SyncRecord::new("same", 5).with_field("updatedAt", 50),
            SyncRecord::new("stale", 5).with_field("updatedAt", 20).with_field("cutLength", 3),
        ];
        let report = session.merge_remote(&store, STORE, &remote).await.unwrap();
        assert_eq!(report, MergeReport { merged: 2, skipped: 1 });

        let fresh = store.get(STORE, "fresh").await.unwrap().unwrap();
        assert_eq!(fresh["createdAt"], 7);
        assert_eq!(fresh["updatedAt"], 7);
        assert_eq!(fresh["wireId"], "W-7");

        let stale = store.get(STORE, "stale").await.unwrap().unwrap();
        assert_eq!(stale["createdAt"], 1);
        assert_eq!(stale["updatedAt"], 20);
        assert_eq!(stale["cutLength"], 3);
    }

    #[tokio::test]
    async fn test_pull_then_merge_between_two_sessions() {
        let graph = MemoryGraph::new();
        let mut sender = session(&graph);
        let mut receiver = session(&graph);
        sender.set_full_sync();
        receiver.set_full_sync();
        sender.poll_peer_events();
        receiver.poll_peer_events();

        sender
            .push(STORE, &[SyncRecord::new("r1", 10).with_field("cutterName", "Dana")])
            .unwrap();

        let pulled = receiver
            .pull(STORE, |_| {}, Duration::from_millis(50))
            .await
            .unwrap();
        let store = MemoryCollections::new();
        let report = receiver.merge_remote(&store, STORE, &pulled).await.unwrap();

        assert_eq!(report.merged, 1);
        assert_eq!(store.get_all(STORE).await.unwrap().len(), 1);
        assert!(receiver.peers().contains(&crate::sync::PeerId::from_descriptor(
            &PeerDescriptor::with_id("mem-0")
        )));
    }
}
