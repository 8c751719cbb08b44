//! Periodic draft snapshots and crash recovery
//!
//! While a response is being captured, [`Autosaver`] snapshots the wizard
//! view every interval. On the next mount the session asks
//! [`AutosaveStore::recoverable_at`] whether a snapshot is worth offering:
//! it must be younger than the maximum age and contain at least one
//! identifying field. Stale snapshots are cleared when found.
//!
//! The snapshot lifecycle is independent of the offline queue: a submission
//! clears the snapshot whether it was sent or queued.

use crate::draft::SurveyDraft;
use crate::error::StoreError;
use crate::schedule::{ScheduledTask, TaskState};
use crate::store::{LocalStore, AUTOSAVE_KEY};
use crate::wizard::{WizardStep, WizardView};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Saved wizard state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutosaveSnapshot {
    pub form: SurveyDraft,
    pub step: WizardStep,
    pub saved_at: DateTime<Utc>,
}

impl AutosaveSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        fdc_common::time::age(self.saved_at, now)
    }
}

/// Reads and writes the single autosave slot
pub struct AutosaveStore {
    store: Arc<dyn LocalStore>,
    max_age: Duration,
}

impl AutosaveStore {
    pub fn new(store: Arc<dyn LocalStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    /// Snapshot `view` if it is worth saving
    ///
    /// Returns false without writing when the wizard is on the terminal step
    /// or no identifying field is set.
    pub async fn save_at(&self, view: &WizardView, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if view.step.is_terminal() || !view.draft.has_identifying_field() {
            return Ok(false);
        }

        let snapshot = AutosaveSnapshot {
            form: view.draft.clone(),
            step: view.step,
            saved_at: now,
        };
        let encoded = serde_json::to_string(&snapshot).map_err(|e| StoreError::Corrupt {
            key: AUTOSAVE_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(AUTOSAVE_KEY, &encoded).await?;
        debug!(step = ?view.step, "Autosaved draft");
        Ok(true)
    }

    pub async fn save(&self, view: &WizardView) -> Result<bool, StoreError> {
        self.save_at(view, fdc_common::time::now()).await
    }

    /// Current snapshot, whatever its age
    pub async fn load(&self) -> Result<Option<AutosaveSnapshot>, StoreError> {
        let Some(raw) = self.store.get(AUTOSAVE_KEY).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: AUTOSAVE_KEY.to_string(),
                reason: e.to_string(),
            })
    }

    /// Snapshot to offer for recovery at `now`, if any
    ///
    /// Unreadable, stale or empty snapshots are cleared and never offered.
    pub async fn recoverable_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<AutosaveSnapshot>, StoreError> {
        let snapshot = match self.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!("Clearing unreadable autosave snapshot: {}", reason);
                self.clear().await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // A snapshot stamped far ahead of this clock is treated as stale
        if !fdc_common::time::within(snapshot.saved_at, now, self.max_age) {
            info!(
                age_minutes = snapshot.age(now).num_minutes(),
                "Clearing stale autosave snapshot"
            );
            self.clear().await?;
            return Ok(None);
        }
        if !snapshot.form.has_identifying_field() || snapshot.step.is_terminal() {
            self.clear().await?;
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    pub async fn recoverable(&self) -> Result<Option<AutosaveSnapshot>, StoreError> {
        self.recoverable_at(fdc_common::time::now()).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(AUTOSAVE_KEY).await
    }
}

/// Background ticker that snapshots the wizard view
pub struct Autosaver {
    task: ScheduledTask,
}

impl Autosaver {
    /// Start saving `views` every `interval`
    pub fn start(
        store: Arc<AutosaveStore>,
        views: watch::Receiver<WizardView>,
        interval: StdDuration,
    ) -> Self {
        let mut task = ScheduledTask::new("autosave");
        task.schedule_repeating(interval, move || {
            let store = Arc::clone(&store);
            let view = views.borrow().clone();
            async move {
                if let Err(e) = store.save(&view).await {
                    warn!("Autosave failed: {}", e);
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "Autosave started");
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        self.task.state() != TaskState::Idle
    }

    pub fn stop(&mut self) {
        if self.task.cancel() {
            debug!("Autosave stopped");
        }
    }

    /// Stop and wait until no snapshot write is in flight
    pub async fn shutdown(&mut self) {
        if self.task.shutdown().await {
            debug!("Autosave shut down");
        }
    }
}
