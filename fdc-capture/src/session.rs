//! Capture session
//!
//! [`SessionContext`] is the operator/organization/campaign handle created at
//! sign-in and ended at sign-out; components receive it explicitly.
//! [`CaptureSession`] owns one response from first field entry to
//! submission: the wizard, geolocation, autosave, duplicate heuristic, the
//! direct-send path and the offline queue fallback. It also holds the sync
//! engine's event subscription for the session lifetime.
//!
//! Every submit attempt resolves to exactly one of: inserted remotely,
//! queued locally, or an explicit error.

use crate::autosave::{AutosaveSnapshot, AutosaveStore, Autosaver};
use crate::config::CaptureConfig;
use crate::connectivity::ConnectivityTracker;
use crate::draft::SurveyDraft;
use crate::duplicate::DuplicateHeuristic;
use crate::error::{CaptureError, Result};
use crate::geolocation::{GeoAcquirer, GeoPolicy, GeoState, GeoStatus, PositionSource};
use crate::queue::OfflineQueue;
use crate::store::LocalStore;
use crate::sync::{SyncEngine, SyncSubscription};
use crate::transport::IngestTransport;
use crate::validator::{FieldValidator, ValidationResult};
use crate::wizard::{Wizard, WizardStep};
use chrono::{DateTime, Utc};
use fdc_common::events::{EventBus, FdcEvent};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ========================================
// Session context
// ========================================

/// Who is capturing, for whom, and where
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    operator_id: String,
    organization_id: String,
    municipality: String,
    campaign_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl SessionContext {
    /// Start a session (sign-in)
    pub fn begin(
        operator_id: impl Into<String>,
        organization_id: impl Into<String>,
        municipality: impl Into<String>,
        campaign_id: impl Into<String>,
    ) -> Self {
        Self {
            operator_id: operator_id.into(),
            organization_id: organization_id.into(),
            municipality: municipality.into(),
            campaign_id: campaign_id.into(),
            started_at: fdc_common::time::now(),
            ended_at: None,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::begin(
            config.operator_id.clone(),
            config.organization_id.clone(),
            config.municipality.clone(),
            config.campaign_id.clone(),
        )
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn municipality(&self) -> &str {
        &self.municipality
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// End the session (sign-out)
    pub fn end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(fdc_common::time::now());
            info!(operator = %self.operator_id, "Session ended");
        }
    }
}

// ========================================
// Capture session
// ========================================

/// Result of a submit attempt that did not error
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Inserted remotely on the direct-send path
    Sent,
    /// Stored in the offline queue; `pending` is the queue size after the save
    Queued { pending: usize },
    /// Duplicate threshold reached; resubmit with confirmation
    NeedsConfirmation { recent: usize },
    /// Full-form validation failed; nothing was sent or stored
    Invalid(ValidationResult),
}

/// Operator answer to the recovery prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Continue,
    Discard,
}

/// Queue and heuristic counters for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub pending: usize,
    pub autosave_saved_at: Option<DateTime<Utc>>,
    pub recent_submissions: usize,
}

/// Device-side collaborators of a session
pub struct SessionServices {
    pub store: Arc<dyn LocalStore>,
    pub transport: Arc<dyn IngestTransport>,
    pub position: Arc<dyn PositionSource>,
    pub events: EventBus,
}

pub struct CaptureSession {
    context: SessionContext,
    wizard: Wizard,
    validator: FieldValidator,
    geo: Arc<GeoAcquirer>,
    queue: Arc<OfflineQueue>,
    transport: Arc<dyn IngestTransport>,
    duplicates: DuplicateHeuristic,
    autosave: Arc<AutosaveStore>,
    autosave_interval: Duration,
    autosaver: Option<Autosaver>,
    connectivity: ConnectivityTracker,
    sync: Arc<SyncEngine>,
    sync_subscription: Option<SyncSubscription>,
    pending_recovery: Option<AutosaveSnapshot>,
    events: EventBus,
}

impl CaptureSession {
    pub fn new(context: SessionContext, config: &CaptureConfig, services: SessionServices) -> Self {
        let SessionServices {
            store,
            transport,
            position,
            events,
        } = services;

        let queue = Arc::new(OfflineQueue::new(Arc::clone(&store)));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&transport),
            events.clone(),
        ));

        Self {
            wizard: Wizard::new(SurveyDraft::new(fdc_common::time::now())),
            validator: FieldValidator::new(config.geolocation.warn_accuracy_m),
            geo: Arc::new(GeoAcquirer::new(
                position,
                GeoPolicy::from(&config.geolocation),
            )),
            duplicates: DuplicateHeuristic::new(
                Arc::clone(&store),
                context.operator_id(),
                &config.duplicates,
            ),
            autosave: Arc::new(AutosaveStore::new(store, config.autosave.max_age())),
            autosave_interval: config.autosave.interval(),
            autosaver: None,
            connectivity: ConnectivityTracker::start(&events),
            queue,
            transport,
            sync,
            sync_subscription: None,
            pending_recovery: None,
            events,
            context,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn wizard(&self) -> &Wizard {
        &self.wizard
    }

    pub fn step(&self) -> WizardStep {
        self.wizard.step()
    }

    pub fn draft(&self) -> SurveyDraft {
        self.wizard.draft()
    }

    pub fn sync_engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.sync)
    }

    pub fn geolocation(&self) -> &GeoAcquirer {
        &self.geo
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Attach to the device: subscribe the sync engine, look for a
    /// recoverable snapshot and start autosaving
    ///
    /// Returns the snapshot the operator must be asked about, if any.
    pub async fn mount(&mut self) -> Result<Option<AutosaveSnapshot>> {
        self.ensure_active()?;

        if self.sync_subscription.is_none() {
            self.sync_subscription = Some(self.sync.subscribe());
        }

        self.pending_recovery = self.autosave.recoverable().await?;
        if let Some(snapshot) = &self.pending_recovery {
            info!(
                step = ?snapshot.step,
                saved_at = %snapshot.saved_at,
                "Recoverable draft found"
            );
        }

        self.start_autosave();
        Ok(self.pending_recovery.clone())
    }

    pub fn pending_recovery(&self) -> Option<&AutosaveSnapshot> {
        self.pending_recovery.as_ref()
    }

    /// Apply the operator's answer to the recovery prompt
    pub async fn resolve_recovery(&mut self, decision: RecoveryDecision) -> Result<()> {
        let snapshot = self.pending_recovery.take().ok_or_else(|| {
            CaptureError::InvalidState("no draft recovery is pending".to_string())
        })?;

        match decision {
            RecoveryDecision::Continue => {
                self.wizard.restore(snapshot.form, snapshot.step)?;
                info!(step = ?snapshot.step, "Restored autosaved draft");
            }
            RecoveryDecision::Discard => {
                self.autosave.clear().await?;
                info!("Discarded autosaved draft");
            }
        }
        Ok(())
    }

    /// Mutate the draft
    pub fn update<F: FnOnce(&mut SurveyDraft)>(&self, edit: F) -> Result<()> {
        self.ensure_active()?;
        self.wizard.update(edit)
    }

    /// Load a complete draft and jump to `step`
    pub fn resume_at(&self, draft: SurveyDraft, step: WizardStep) -> Result<()> {
        self.ensure_active()?;
        self.wizard.restore(draft, step)
    }

    /// Acquire a position and store it in the draft on success
    pub async fn capture_location(&self) -> Result<GeoState> {
        self.ensure_active()?;
        let state = self.geo.capture().await;
        if let (GeoStatus::Success, Some(coords)) = (state.status, state.coords) {
            if !self.wizard.step().is_terminal() {
                self.wizard.update(|draft| draft.ubicacion = Some(coords))?;
            }
        }
        Ok(state)
    }

    /// Validate the current step
    pub fn validate_current(&self) -> ValidationResult {
        let draft = self.wizard.draft();
        let (status, accuracy) = self.geo_inputs(&draft);
        self.validator
            .validate(self.wizard.step(), &draft, status, accuracy)
    }

    /// Validate the current step and advance if it passes
    pub fn next(&self) -> Result<(WizardStep, ValidationResult)> {
        self.ensure_active()?;
        let result = self.validate_current();
        let step = self.wizard.next(&result)?;
        Ok((step, result))
    }

    pub fn back(&self) -> Result<WizardStep> {
        self.wizard.back()
    }

    /// Submit the response from the last step
    ///
    /// `confirm_duplicates` acknowledges the duplicate warning returned by a
    /// previous attempt.
    pub async fn submit(&mut self, confirm_duplicates: bool) -> Result<SubmitOutcome> {
        self.ensure_active()?;
        if !self.wizard.step().is_last_form_step() {
            return Err(CaptureError::InvalidState(format!(
                "submit is only allowed on the last step (current: {:?})",
                self.wizard.step()
            )));
        }

        let now = fdc_common::time::now();
        let draft = self.wizard.draft();
        let payload = draft.to_payload(&self.context, now);

        let (status, accuracy) = self.geo_inputs(&draft);
        let validation = self
            .validator
            .validate_all(&draft, &payload, status, accuracy);
        if !validation.can_advance() {
            debug!(
                errors = validation.blocking_errors.len(),
                "Submit blocked by validation"
            );
            return Ok(SubmitOutcome::Invalid(validation));
        }

        let recent = self.duplicates.check_recent_at(now).await.unwrap_or_else(|e| {
            warn!("Duplicate log unavailable, skipping check: {}", e);
            0
        });
        if self.duplicates.exceeds(recent) && !confirm_duplicates {
            info!(
                recent,
                threshold = self.duplicates.threshold(),
                "Duplicate threshold reached; confirmation required"
            );
            return Ok(SubmitOutcome::NeedsConfirmation { recent });
        }

        let outcome = if self.send_direct(&payload).await {
            SubmitOutcome::Sent
        } else {
            if !self.queue.save(payload).await {
                // Autosave is kept so the response can still be recovered
                error!("Response could not be stored offline");
                return Err(CaptureError::Capacity(
                    "device storage is full; the response was kept as a draft".to_string(),
                ));
            }
            SubmitOutcome::Queued {
                pending: self.queue.count().await?,
            }
        };

        self.finish_submission(now, &outcome).await;
        Ok(outcome)
    }

    /// Begin a new blank response after a submission
    pub fn start_new_response(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.wizard
            .reset(SurveyDraft::new(fdc_common::time::now()));
        self.start_autosave();
        Ok(())
    }

    /// Pending count, autosave timestamp and recent submissions
    pub async fn status(&self) -> Result<SessionStatus> {
        let autosave_saved_at = match self.autosave.load().await {
            Ok(snapshot) => snapshot.map(|s| s.saved_at),
            Err(e) => {
                warn!("Autosave snapshot unreadable: {}", e);
                None
            }
        };
        Ok(SessionStatus {
            pending: self.queue.count().await?,
            autosave_saved_at,
            recent_submissions: self.duplicates.check_recent().await?,
        })
    }

    /// Detach from the device: cancel timers, unsubscribe, end the context
    pub fn teardown(&mut self) {
        self.geo.teardown();
        if let Some(mut autosaver) = self.autosaver.take() {
            autosaver.stop();
        }
        if let Some(mut subscription) = self.sync_subscription.take() {
            subscription.teardown();
        }
        self.context.end();
    }

    /// One direct insert attempt; false on any failure
    async fn send_direct(&self, payload: &Map<String, Value>) -> bool {
        if !self.connectivity.is_online() {
            debug!("Offline; skipping direct send");
            return false;
        }
        match self.transport.send(vec![payload.clone()]).await {
            Ok(response) if response.sincronizadas >= 1 => true,
            Ok(response) => {
                warn!(
                    errors = response.errores_validacion,
                    "Direct send not inserted; queueing"
                );
                false
            }
            Err(e) => {
                warn!("Direct send failed; queueing: {}", e);
                false
            }
        }
    }

    async fn finish_submission(&mut self, now: DateTime<Utc>, outcome: &SubmitOutcome) {
        if let Err(e) = self.duplicates.record_submission_at(now).await {
            warn!("Failed to record submission in duplicate log: {}", e);
        }
        // Wait out an in-flight snapshot so it cannot land after the clear
        if let Some(mut autosaver) = self.autosaver.take() {
            autosaver.shutdown().await;
        }
        if let Err(e) = self.autosave.clear().await {
            error!("Failed to clear autosave after submission: {}", e);
        }
        self.pending_recovery = None;
        self.wizard.mark_submitted();

        match outcome {
            SubmitOutcome::Sent => {
                info!("Response sent");
                self.events.emit_lossy(FdcEvent::SubmissionSent { timestamp: now });
            }
            SubmitOutcome::Queued { pending } => {
                info!(pending, "Response saved offline");
                self.events.emit_lossy(FdcEvent::SubmissionQueued {
                    pending: *pending,
                    timestamp: now,
                });
            }
            SubmitOutcome::NeedsConfirmation { .. } | SubmitOutcome::Invalid(_) => {}
        }
    }

    fn start_autosave(&mut self) {
        if let Some(mut previous) = self.autosaver.take() {
            previous.stop();
        }
        self.autosaver = Some(Autosaver::start(
            Arc::clone(&self.autosave),
            self.wizard.subscribe(),
            self.autosave_interval,
        ));
    }

    /// Geolocation inputs for validation
    ///
    /// A position already stored in the draft (captured earlier or restored)
    /// counts as a successful fix.
    fn geo_inputs(&self, draft: &SurveyDraft) -> (GeoStatus, Option<f64>) {
        match &draft.ubicacion {
            Some(coords) => (GeoStatus::Success, Some(coords.accuracy_m)),
            None => match self.geo.state().status {
                // A fix that never reached the draft does not count
                GeoStatus::Success => (GeoStatus::Idle, None),
                status => (status, None),
            },
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.context.is_active() {
            Ok(())
        } else {
            Err(CaptureError::InvalidState("session has ended".to_string()))
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
