//! Geolocation acquisition with bounded retries
//!
//! [`GeoAcquirer`] wraps a [`PositionSource`] (the platform positioning API)
//! and publishes a [`GeoState`] on a watch channel. Each attempt is bounded by
//! a timeout; failed attempts are retried a fixed number of times after a
//! fixed delay before the state settles to `Error`.
//!
//! The retry delay runs on a [`ScheduledTask`]. [`GeoAcquirer::teardown`]
//! cancels it and blocks every later state write, so a capture that outlives
//! its screen cannot overwrite anything.

use crate::config::GeolocationConfig;
use crate::schedule::{ScheduledTask, TaskState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// A position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of the 68% confidence circle, meters
    pub accuracy_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Published acquisition state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoState {
    pub status: GeoStatus,
    pub coords: Option<Coords>,
    pub error: Option<String>,
    /// Attempts made in the current capture
    pub attempts: u32,
}

impl GeoState {
    pub fn idle() -> Self {
        Self {
            status: GeoStatus::Idle,
            coords: None,
            error: None,
            attempts: 0,
        }
    }

    /// Accuracy of the current fix, if any
    pub fn accuracy(&self) -> Option<f64> {
        self.coords.map(|c| c.accuracy_m)
    }
}

/// Positioning failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    /// User or OS refused location access; retrying cannot help
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    Unavailable(String),

    #[error("Position request timed out after {0:?}")]
    Timeout(Duration),
}

/// Platform positioning API
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self) -> Result<Coords, GeoError>;
}

/// Source that always reports the same fix
///
/// Used by the CLI, where the position comes from flags or the draft file.
#[derive(Debug, Clone)]
pub struct FixedPosition(pub Option<Coords>);

#[async_trait]
impl PositionSource for FixedPosition {
    async fn current_position(&self) -> Result<Coords, GeoError> {
        self.0
            .ok_or_else(|| GeoError::Unavailable("no fixed position configured".to_string()))
    }
}

/// Retry policy for one capture
#[derive(Debug, Clone)]
pub struct GeoPolicy {
    /// Additional attempts after the first
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for GeoPolicy {
    fn default() -> Self {
        GeoPolicy::from(&GeolocationConfig::default())
    }
}

impl From<&GeolocationConfig> for GeoPolicy {
    fn from(config: &GeolocationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }
}

/// Bounded-retry wrapper over a [`PositionSource`]
pub struct GeoAcquirer {
    source: Arc<dyn PositionSource>,
    policy: GeoPolicy,
    state_tx: watch::Sender<GeoState>,
    retry: Mutex<ScheduledTask>,
    torn_down: AtomicBool,
}

impl GeoAcquirer {
    pub fn new(source: Arc<dyn PositionSource>, policy: GeoPolicy) -> Self {
        let (state_tx, _) = watch::channel(GeoState::idle());
        Self {
            source,
            policy,
            state_tx,
            retry: Mutex::new(ScheduledTask::new("geolocation-retry")),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> GeoState {
        self.state_tx.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<GeoState> {
        self.state_tx.subscribe()
    }

    /// State of the pending retry timer
    pub fn retry_state(&self) -> TaskState {
        self.retry
            .lock()
            .map(|task| task.state())
            .unwrap_or(TaskState::Idle)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Acquire a position, retrying per policy
    ///
    /// Resolves to the settled state (`Success` or `Error`). After
    /// [`teardown`](Self::teardown) it resolves immediately with whatever was
    /// published last.
    pub async fn capture(&self) -> GeoState {
        if self.is_torn_down() {
            return self.state();
        }

        let total_attempts = self.policy.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            if attempt > 1 && !self.wait_for_retry().await {
                debug!("Geolocation retry cancelled");
                return self.state();
            }
            if self.is_torn_down() {
                return self.state();
            }

            self.publish(GeoState {
                status: GeoStatus::Loading,
                coords: None,
                error: None,
                attempts: attempt,
            });

            let result =
                match tokio::time::timeout(self.policy.attempt_timeout, self.source.current_position())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(GeoError::Timeout(self.policy.attempt_timeout)),
                };

            match result {
                Ok(coords) => {
                    info!(
                        attempt,
                        accuracy_m = coords.accuracy_m,
                        "Geolocation acquired"
                    );
                    self.publish(GeoState {
                        status: GeoStatus::Success,
                        coords: Some(coords),
                        error: None,
                        attempts: attempt,
                    });
                    return self.state();
                }
                Err(GeoError::PermissionDenied) => {
                    warn!("Geolocation permission denied; not retrying");
                    last_error = GeoError::PermissionDenied.to_string();
                    self.settle_error(attempt, last_error);
                    return self.state();
                }
                Err(e) => {
                    warn!(attempt, total_attempts, "Geolocation attempt failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        self.settle_error(total_attempts, last_error);
        self.state()
    }

    /// Cancel any pending retry and block further state writes
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        if let Ok(mut retry) = self.retry.lock() {
            if retry.cancel() {
                debug!("Cancelled pending geolocation retry on teardown");
            }
        }
    }

    /// Sleep on the retry timer; false when the timer was cancelled
    async fn wait_for_retry(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if !self.arm_retry(tx) {
            return false;
        }
        // Sender is dropped unfired when the task is aborted
        rx.await.is_ok()
    }

    fn arm_retry(&self, tx: oneshot::Sender<()>) -> bool {
        let Ok(mut retry) = self.retry.lock() else {
            return false;
        };
        retry.schedule(self.policy.retry_delay, async move {
            let _ = tx.send(());
        });
        true
    }

    fn settle_error(&self, attempts: u32, error: String) {
        self.publish(GeoState {
            status: GeoStatus::Error,
            coords: None,
            error: Some(error),
            attempts,
        });
    }

    fn publish(&self, state: GeoState) {
        if self.is_torn_down() {
            return;
        }
        self.state_tx.send_replace(state);
    }
}

impl Drop for GeoAcquirer {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Fails `failures` times, then returns a fix
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        error: GeoError,
    }

    impl FlakySource {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error: GeoError::Unavailable("no signal".to_string()),
            }
        }
    }

    #[async_trait]
    impl PositionSource for FlakySource {
        async fn current_position(&self) -> Result<Coords, GeoError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(Coords {
                    latitude: 19.43,
                    longitude: -99.13,
                    accuracy_m: 25.0,
                })
            }
        }
    }

    struct HangingSource;

    #[async_trait]
    impl PositionSource for HangingSource {
        async fn current_position(&self) -> Result<Coords, GeoError> {
            std::future::pending().await
        }
    }

    fn fast_policy() -> GeoPolicy {
        GeoPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let source = Arc::new(FlakySource::new(2));
        let acquirer = GeoAcquirer::new(source.clone(), fast_policy());

        let state = acquirer.capture().await;
        assert_eq!(state.status, GeoStatus::Success);
        assert_eq!(state.attempts, 3);
        assert_eq!(state.accuracy(), Some(25.0));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_settles_to_error_after_two_retries() {
        let source = Arc::new(FlakySource::new(10));
        let acquirer = GeoAcquirer::new(source.clone(), fast_policy());

        let state = acquirer.capture().await;
        assert_eq!(state.status, GeoStatus::Error);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(state.error.unwrap().contains("no signal"));
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let acquirer = GeoAcquirer::new(Arc::new(HangingSource), fast_policy());

        let state = acquirer.capture().await;
        assert_eq!(state.status, GeoStatus::Error);
        assert_eq!(state.attempts, 3);
        assert!(state.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let source = Arc::new(FlakySource {
            failures: 10,
            calls: AtomicU32::new(0),
            error: GeoError::PermissionDenied,
        });
        let acquirer = GeoAcquirer::new(source.clone(), fast_policy());

        let state = acquirer.capture().await;
        assert_eq!(state.status, GeoStatus::Error);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_cancels_pending_retry() {
        let source = Arc::new(FlakySource::new(10));
        let policy = GeoPolicy {
            retry_delay: Duration::from_millis(200),
            ..fast_policy()
        };
        let acquirer = Arc::new(GeoAcquirer::new(source.clone(), policy));

        let capturing = Arc::clone(&acquirer);
        let capture = tokio::spawn(async move { capturing.capture().await });

        // First attempt fails immediately; the retry timer is now pending
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(acquirer.retry_state(), TaskState::Scheduled);

        acquirer.teardown();
        let state = capture.await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(acquirer.retry_state(), TaskState::Idle);
        // Last published state is the in-flight attempt; no late error write
        assert_eq!(state.status, GeoStatus::Loading);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(acquirer.state().status, GeoStatus::Loading);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fixed_position_without_fix_fails() {
        let acquirer = GeoAcquirer::new(Arc::new(FixedPosition(None)), fast_policy());
        assert_eq!(acquirer.capture().await.status, GeoStatus::Error);
    }
}
