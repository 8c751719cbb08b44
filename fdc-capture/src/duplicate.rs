//! Per-operator duplicate submission heuristic
//!
//! Keeps a bounded, durable log of submission timestamps per operator. A burst
//! of submissions inside the window is suspicious (the same household entered
//! twice, or fabricated responses), so the session asks for confirmation
//! before accepting another one. The heuristic is advisory: it never drops a
//! submission on its own.

use crate::config::DuplicateConfig;
use crate::error::StoreError;
use crate::store::{duplicate_log_key, LocalStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DuplicateHeuristic {
    store: Arc<dyn LocalStore>,
    key: String,
    window: Duration,
    threshold: usize,
    capacity: usize,
}

impl DuplicateHeuristic {
    pub fn new(store: Arc<dyn LocalStore>, operator_id: &str, config: &DuplicateConfig) -> Self {
        Self {
            store,
            key: duplicate_log_key(operator_id),
            window: config.window(),
            threshold: config.threshold.max(1),
            capacity: config.log_capacity.max(1),
        }
    }

    /// Submissions recorded inside the window ending now
    pub async fn check_recent(&self) -> Result<usize, StoreError> {
        self.check_recent_at(fdc_common::time::now()).await
    }

    /// Submissions recorded inside the window ending at `now`
    pub async fn check_recent_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let log = self.load().await?;
        Ok(log
            .iter()
            .filter(|at| fdc_common::time::within(**at, now, self.window))
            .count())
    }

    /// Whether one more submission on top of `recent` reaches the threshold
    pub fn exceeds(&self, recent: usize) -> bool {
        recent + 1 >= self.threshold
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub async fn record_submission(&self) -> Result<(), StoreError> {
        self.record_submission_at(fdc_common::time::now()).await
    }

    /// Append `at`, dropping the oldest entries beyond the log capacity
    pub async fn record_submission_at(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut entries = 0;
        self.store
            .update(&self.key, &mut |raw| {
                let mut log = self.decode(raw);
                log.push(at);
                log.sort();
                if log.len() > self.capacity {
                    let excess = log.len() - self.capacity;
                    log.drain(..excess);
                }
                entries = log.len();

                serde_json::to_string(&log)
                    .map(Some)
                    .map_err(|e| StoreError::Corrupt {
                        key: self.key.clone(),
                        reason: e.to_string(),
                    })
            })
            .await?;
        debug!(entries, "Recorded submission in duplicate log");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<DateTime<Utc>>, StoreError> {
        Ok(self.decode(self.store.get(&self.key).await?))
    }

    fn decode(&self, raw: Option<String>) -> Vec<DateTime<Utc>> {
        let Some(raw) = raw else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(log) => log,
            Err(e) => {
                // Advisory data only; a broken log restarts empty
                warn!(key = %self.key, "Discarding unreadable duplicate log: {}", e);
                Vec::new()
            }
        }
    }
}
