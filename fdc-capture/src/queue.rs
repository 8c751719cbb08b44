//! Durable offline submission queue
//!
//! Entries are stored oldest first as one JSON array under
//! [`OFFLINE_QUEUE_KEY`]. Payloads are sanitized against the shared allowlist
//! before they are stored, so nothing the server would drop ever sits on the
//! device. Every change is one [`LocalStore::update`], so queues opened by
//! different sessions or processes on the same store never lose each
//! other's writes.

use crate::error::StoreError;
use crate::store::{LocalStore, OFFLINE_QUEUE_KEY};
use chrono::{DateTime, Utc};
use fdc_common::schema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// A queued, sanitized payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: Uuid,
    pub payload: Map<String, Value>,
    /// When the entry was queued on this device
    pub saved_at: DateTime<Utc>,
}

pub struct OfflineQueue {
    store: Arc<dyn LocalStore>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Queue `payload`
    ///
    /// Returns false when the entry could not be persisted (quota exceeded,
    /// unreadable queue, backend failure). The caller must surface that;
    /// nothing is retried here.
    pub async fn save(&self, payload: Map<String, Value>) -> bool {
        let entry = PendingSubmission {
            id: Uuid::new_v4(),
            payload: schema::sanitize_map(payload),
            saved_at: fdc_common::time::now(),
        };
        let id = entry.id;
        let mut pending = 0;

        // An unreadable queue fails decode and is never overwritten
        let result = self
            .store
            .update(OFFLINE_QUEUE_KEY, &mut |raw| {
                let mut entries = decode(raw)?;
                entries.push(entry.clone());
                pending = entries.len();
                encode(&entries).map(Some)
            })
            .await;

        match result {
            Ok(()) => {
                info!(%id, pending, "Queued submission offline");
                true
            }
            Err(e) => {
                error!(%id, "Failed to queue submission: {}", e);
                false
            }
        }
    }

    /// Number of pending entries
    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries().await?.len())
    }

    /// Snapshot of all pending entries, oldest first
    pub async fn entries(&self) -> Result<Vec<PendingSubmission>, StoreError> {
        decode(self.store.get(OFFLINE_QUEUE_KEY).await?)
    }

    /// Remove one entry; false if it was not queued
    pub async fn remove(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut removed = false;
        let mut pending = 0;

        self.store
            .update(OFFLINE_QUEUE_KEY, &mut |raw| {
                let mut entries = decode(raw)?;
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                removed = entries.len() != before;
                pending = entries.len();

                if entries.is_empty() {
                    Ok(None)
                } else {
                    encode(&entries).map(Some)
                }
            })
            .await?;

        if removed {
            debug!(%id, pending, "Removed queued submission");
        }
        Ok(removed)
    }
}

fn decode(raw: Option<String>) -> Result<Vec<PendingSubmission>, StoreError> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key: OFFLINE_QUEUE_KEY.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn encode(entries: &[PendingSubmission]) -> Result<String, StoreError> {
    serde_json::to_string(entries).map_err(|e| StoreError::Corrupt {
        key: OFFLINE_QUEUE_KEY.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use serde_json::json;

    fn payload(campaign: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("campana_id".into(), json!(campaign));
        map.insert("simpatia".into(), json!(3));
        map
    }

    #[tokio::test]
    async fn test_save_sanitizes_and_preserves_order() {
        let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));

        let mut spoofed = payload("camp-1");
        spoofed.insert("encuestador_id".into(), json!("someone-else"));
        assert!(queue.save(spoofed).await);
        assert!(queue.save(payload("camp-2")).await);

        let entries = queue.entries().await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 2);
        assert_eq!(entries[0].payload["campana_id"], "camp-1");
        assert_eq!(entries[1].payload["campana_id"], "camp-2");
        assert!(!entries[0].payload.contains_key("encuestador_id"));
        assert!(entries[0].saved_at <= entries[1].saved_at);
    }

    #[tokio::test]
    async fn test_save_returns_false_when_full() {
        let queue = OfflineQueue::new(Arc::new(MemoryStore::with_quota(64)));

        let mut big = payload("camp-1");
        big.insert("comentarios".into(), json!("x".repeat(200)));
        assert!(!queue.save(big).await);
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_queue_is_not_overwritten() {
        let store = Arc::new(MemoryStore::new());
        store.set(OFFLINE_QUEUE_KEY, "[{oops").await.unwrap();
        let queue = OfflineQueue::new(store.clone());

        assert!(!queue.save(payload("camp-1")).await);
        assert_eq!(
            store.get(OFFLINE_QUEUE_KEY).await.unwrap().as_deref(),
            Some("[{oops")
        );
        assert!(matches!(
            queue.count().await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_survives_reopen() {
        let pool = fdc_common::db::open_memory_database().await.unwrap();
        let store = Arc::new(SqliteStore::new(pool.clone(), None).await.unwrap());
        let queue = OfflineQueue::new(store);

        assert!(queue.save(payload("camp-1")).await);
        assert!(queue.save(payload("camp-2")).await);
        let first = queue.entries().await.unwrap()[0].id;
        assert!(queue.remove(first).await.unwrap());
        assert!(!queue.remove(first).await.unwrap());

        let reopened = OfflineQueue::new(Arc::new(SqliteStore::new(pool, None).await.unwrap()));
        let entries = reopened.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["campana_id"], "camp-2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_queues_on_one_database_keep_every_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fdc-capture.db");
        let open = |path: std::path::PathBuf| async move {
            let pool = fdc_common::db::open_database(&path).await.unwrap();
            Arc::new(OfflineQueue::new(Arc::new(
                SqliteStore::new(pool, None).await.unwrap(),
            )))
        };
        let writer = open(path.clone()).await;
        let drainer = open(path).await;

        for _ in 0..50 {
            assert!(writer.save(payload("camp-old")).await);
        }
        let old_ids: Vec<Uuid> = drainer
            .entries()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(old_ids.len(), 50);

        let saving = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let mut saved = 0;
                for _ in 0..50 {
                    if writer.save(payload("camp-new")).await {
                        saved += 1;
                    }
                }
                saved
            })
        };
        let removing = {
            let drainer = Arc::clone(&drainer);
            let old_ids = old_ids.clone();
            tokio::spawn(async move {
                for id in old_ids {
                    assert!(drainer.remove(id).await.unwrap());
                }
            })
        };

        assert_eq!(saving.await.unwrap(), 50);
        removing.await.unwrap();

        let remaining = writer.entries().await.unwrap();
        assert_eq!(remaining.len(), 50);
        assert!(remaining
            .iter()
            .all(|entry| entry.payload["campana_id"] == "camp-new"));
        assert!(remaining.iter().all(|entry| !old_ids.contains(&entry.id)));
    }
}
