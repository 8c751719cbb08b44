//! Offline queue drain
//!
//! A drain reads the whole queue and sends entries one at a time, oldest
//! first, each as a one-item batch. An entry is removed from durable storage
//! as soon as the server confirms its insert, so a crash mid-drain neither
//! loses nor resends what was already synced. Failed entries stay queued
//! until the next trigger; there is no retry loop inside a drain.
//!
//! Drains are triggered by `NetworkOnline` and by the background-sync tag on
//! the [`EventBus`]. An in-flight flag turns overlapping triggers into no-ops.

use crate::error::StoreError;
use crate::queue::OfflineQueue;
use crate::transport::IngestTransport;
use fdc_common::events::{EventBus, FdcEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why one queued entry was not synced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncItemError {
    pub id: Uuid,
    pub reason: String,
}

/// Result of one completed drain
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub synced: usize,
    pub failed: usize,
    pub errors: Vec<SyncItemError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainStatus {
    Completed(SyncOutcome),
    /// Another drain was running; this trigger was coalesced into it
    AlreadyRunning,
}

pub struct SyncEngine {
    queue: Arc<OfflineQueue>,
    transport: Arc<dyn IngestTransport>,
    events: EventBus,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the drain exits
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(
        queue: Arc<OfflineQueue>,
        transport: Arc<dyn IngestTransport>,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            transport,
            events,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Send every queued entry once
    pub async fn drain(&self) -> Result<DrainStatus, StoreError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in flight; ignoring trigger");
            return Ok(DrainStatus::AlreadyRunning);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let entries = self.queue.entries().await?;
        if entries.is_empty() {
            debug!("Offline queue empty; nothing to drain");
        }

        let mut outcome = SyncOutcome::default();
        for entry in entries {
            let reason = match self.transport.send(vec![entry.payload.clone()]).await {
                Ok(response) if response.sincronizadas >= 1 => {
                    match self.queue.remove(entry.id).await {
                        Ok(_) => {
                            outcome.synced += 1;
                            continue;
                        }
                        Err(e) => {
                            // Inserted remotely; a retry may duplicate it server side
                            error!(id = %entry.id, "Synced submission could not be dequeued: {}", e);
                            format!("inserted but not removed from the queue: {}", e)
                        }
                    }
                }
                Ok(response) => response
                    .errors
                    .and_then(|errors| errors.into_iter().next())
                    .map(|item| item.error)
                    .unwrap_or_else(|| "server did not insert the item".to_string()),
                Err(e) => e.to_string(),
            };

            warn!(id = %entry.id, "Queued submission not synced: {}", reason);
            outcome.failed += 1;
            outcome.errors.push(SyncItemError {
                id: entry.id,
                reason,
            });
        }

        let pending = self.queue.count().await?;
        info!(
            synced = outcome.synced,
            failed = outcome.failed,
            pending,
            "Drain completed"
        );
        self.events.emit_lossy(FdcEvent::SyncCompleted {
            synced: outcome.synced,
            failed: outcome.failed,
            pending,
            timestamp: fdc_common::time::now(),
        });

        Ok(DrainStatus::Completed(outcome))
    }

    /// Drain on every reconnect or background-sync event until torn down
    pub fn subscribe(self: &Arc<Self>) -> SyncSubscription {
        let mut rx = self.events.subscribe();
        let engine = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.requests_drain() => {
                        debug!(?event, "Drain requested");
                        engine.spawn_drain();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // A skipped event may have been a reconnect
                        warn!(skipped, "Sync listener lagged; draining");
                        engine.spawn_drain();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Sync listener stopped");
        });

        info!("Sync engine subscribed to connectivity events");
        SyncSubscription {
            handle: Some(handle),
        }
    }

    fn spawn_drain(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.drain().await {
                warn!("Drain failed: {}", e);
            }
        });
    }
}

/// Live event subscription of a [`SyncEngine`]
pub struct SyncSubscription {
    handle: Option<JoinHandle<()>>,
}

impl SyncSubscription {
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop listening; an in-flight drain runs to completion
    pub fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Sync engine unsubscribed");
        }
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::store::{LocalStore, MemoryStore};
    use async_trait::async_trait;
    use fdc_common::api::{IngestResponse, ItemError};
    use fdc_common::events::BACKGROUND_SYNC_TAG;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Accepts every item except campaign "bad" (rejected) and "down" (network)
    #[derive(Default)]
    struct ScriptedTransport {
        calls: AtomicUsize,
        sent: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl IngestTransport for ScriptedTransport {
        async fn send(
            &self,
            payloads: Vec<Map<String, Value>>,
        ) -> Result<IngestResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            assert_eq!(payloads.len(), 1, "drain sends one item per batch");
            let campaign = payloads[0]["campana_id"].as_str().unwrap_or("").to_string();
            self.sent.lock().unwrap().push(campaign.clone());
            match campaign.as_str() {
                "down" => Err(TransportError::Network("connection refused".into())),
                "bad" => Ok(IngestResponse {
                    success: true,
                    sincronizadas: 0,
                    errores_validacion: 1,
                    errors: Some(vec![ItemError {
                        index: 0,
                        error: "simpatia must be between 0 and 5, got 9".into(),
                    }]),
                }),
                _ => Ok(IngestResponse::new(1, Vec::new())),
            }
        }
    }

    fn payload(campaign: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("campana_id".into(), json!(campaign));
        map
    }

    async fn setup(
        campaigns: &[&str],
        transport: ScriptedTransport,
    ) -> (Arc<SyncEngine>, Arc<OfflineQueue>, Arc<ScriptedTransport>, EventBus) {
        let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryStore::new())));
        for campaign in campaigns {
            assert!(queue.save(payload(campaign)).await);
        }
        let transport = Arc::new(transport);
        let events = EventBus::new(16);
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            transport.clone(),
            events.clone(),
        ));
        (engine, queue, transport, events)
    }

    fn completed(status: DrainStatus) -> SyncOutcome {
        match status {
            DrainStatus::Completed(outcome) => outcome,
            DrainStatus::AlreadyRunning => panic!("drain did not run"),
        }
    }

    #[tokio::test]
    async fn test_drain_removes_only_confirmed_items() {
        let (engine, queue, transport, events) =
            setup(&["a", "bad", "b", "down"], ScriptedTransport::default()).await;
        let mut rx = events.subscribe();

        let outcome = completed(engine.drain().await.unwrap());
        assert_eq!(outcome.synced, 2);
        assert_eq!(outcome.failed, 2);
        assert!(outcome.errors[0].reason.contains("simpatia"));
        assert!(outcome.errors[1].reason.contains("connection refused"));

        // Oldest first
        assert_eq!(*transport.sent.lock().unwrap(), vec!["a", "bad", "b", "down"]);

        let remaining: Vec<String> = queue
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.payload["campana_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(remaining, vec!["bad", "down"]);

        match rx.recv().await.unwrap() {
            FdcEvent::SyncCompleted {
                synced,
                failed,
                pending,
                ..
            } => assert_eq!((synced, failed, pending), (2, 2, 2)),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queue_never_grows_across_drains() {
        let (engine, queue, _, _) = setup(&["a", "bad"], ScriptedTransport::default()).await;
        let before = queue.count().await.unwrap();
        completed(engine.drain().await.unwrap());
        let after_first = queue.count().await.unwrap();
        completed(engine.drain().await.unwrap());
        let after_second = queue.count().await.unwrap();
        assert!(after_first <= before);
        assert_eq!(after_second, after_first);
    }

    #[tokio::test]
    async fn test_overlapping_drain_is_noop() {
        let transport = ScriptedTransport {
            delay: Some(Duration::from_millis(50)),
            ..ScriptedTransport::default()
        };
        let (engine, queue, transport, _) = setup(&["a"], transport).await;

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.is_draining());
        assert_eq!(engine.drain().await.unwrap(), DrainStatus::AlreadyRunning);

        assert_eq!(completed(first.await.unwrap().unwrap()).synced, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count().await.unwrap(), 0);
        assert!(!engine.is_draining());
    }

    #[tokio::test]
    async fn test_events_trigger_drain_until_teardown() {
        let (engine, queue, transport, events) = setup(&["a"], ScriptedTransport::default()).await;
        let mut subscription = engine.subscribe();
        assert!(subscription.is_active());

        // Unrelated tag does nothing
        events.emit_lossy(FdcEvent::background_sync("other-feature"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        events.emit_lossy(FdcEvent::background_sync(BACKGROUND_SYNC_TAG));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.count().await.unwrap(), 0);

        subscription.teardown();
        assert!(!subscription.is_active());
        assert!(queue.save(payload("b")).await);
        events.emit_lossy(FdcEvent::network_online());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    /// Store whose writes start failing once frozen
    #[derive(Default)]
    struct FreezableStore {
        inner: MemoryStore,
        frozen: AtomicBool,
    }

    #[async_trait]
    impl LocalStore for FreezableStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }

        async fn update(
            &self,
            key: &str,
            apply: &mut (dyn FnMut(Option<String>) -> Result<Option<String>, StoreError> + Send),
        ) -> Result<(), StoreError> {
            if self.frozen.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk I/O error".into()));
            }
            self.inner.update(key, apply).await
        }
    }

    #[tokio::test]
    async fn test_dequeue_failure_is_reported_and_drain_continues() {
        let store = Arc::new(FreezableStore::default());
        let queue = Arc::new(OfflineQueue::new(store.clone()));
        assert!(queue.save(payload("a")).await);
        assert!(queue.save(payload("b")).await);
        store.frozen.store(true, Ordering::SeqCst);

        let transport = Arc::new(ScriptedTransport::default());
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let engine = SyncEngine::new(Arc::clone(&queue), transport.clone(), events);

        let outcome = completed(engine.drain().await.unwrap());
        assert_eq!(*transport.sent.lock().unwrap(), vec!["a", "b"]);
        assert_eq!((outcome.synced, outcome.failed), (0, 2));
        assert!(outcome.errors[0].reason.contains("not removed from the queue"));

        match rx.recv().await.unwrap() {
            FdcEvent::SyncCompleted {
                failed, pending, ..
            } => assert_eq!((failed, pending), (2, 2)),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
