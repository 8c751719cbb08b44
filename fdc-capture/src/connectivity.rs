//! Network connectivity state
//!
//! [`ConnectivityTracker`] follows `NetworkOnline`/`NetworkOffline` events so
//! the session can skip a doomed direct send. [`ReachabilityMonitor`] is the
//! event source for hosts without a native connectivity signal (the CLI): it
//! probes the endpoint periodically and emits an event on every transition.

use crate::schedule::ScheduledTask;
use crate::transport::HttpTransport;
use async_trait::async_trait;
use fdc_common::events::{EventBus, FdcEvent};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tracks the last reported connectivity state
pub struct ConnectivityTracker {
    online: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ConnectivityTracker {
    /// Start listening; assumes online until told otherwise
    pub fn start(events: &EventBus) -> Self {
        let online = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&online);
        let mut rx = events.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(FdcEvent::NetworkOnline { .. }) => flag.store(true, Ordering::SeqCst),
                    Ok(FdcEvent::NetworkOffline { .. }) => flag.store(false, Ordering::SeqCst),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { online, handle }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectivityTracker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Something that can tell whether the endpoint is reachable
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn probe(&self) -> bool;
}

#[async_trait]
impl Reachability for HttpTransport {
    async fn probe(&self) -> bool {
        self.is_reachable().await
    }
}

const UNKNOWN: u8 = 0;
const ONLINE: u8 = 1;
const OFFLINE: u8 = 2;

/// Periodic endpoint probe that emits connectivity transitions
pub struct ReachabilityMonitor {
    task: ScheduledTask,
}

impl ReachabilityMonitor {
    pub fn start(probe: Arc<dyn Reachability>, events: EventBus, period: Duration) -> Self {
        let last = Arc::new(AtomicU8::new(UNKNOWN));
        let mut task = ScheduledTask::new("reachability");

        task.schedule_repeating(period, move || {
            let probe = Arc::clone(&probe);
            let events = events.clone();
            let last = Arc::clone(&last);
            async move {
                let now = if probe.probe().await { ONLINE } else { OFFLINE };
                let previous = last.swap(now, Ordering::SeqCst);
                if previous == now {
                    return;
                }
                if now == ONLINE {
                    info!("Endpoint reachable");
                    events.emit_lossy(FdcEvent::network_online());
                } else {
                    info!("Endpoint unreachable");
                    events.emit_lossy(FdcEvent::network_offline());
                }
            }
        });

        debug!(period_secs = period.as_secs(), "Reachability monitor started");
        Self { task }
    }

    pub fn stop(&mut self) {
        self.task.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Toggle(AtomicBool);

    #[async_trait]
    impl Reachability for Toggle {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_tracker_follows_events() {
        let events = EventBus::new(8);
        let tracker = ConnectivityTracker::start(&events);
        assert!(tracker.is_online());

        events.emit_lossy(FdcEvent::network_offline());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!tracker.is_online());

        events.emit_lossy(FdcEvent::network_online());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tracker.is_online());
    }

    #[tokio::test]
    async fn test_monitor_emits_only_transitions() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let toggle = Arc::new(Toggle(AtomicBool::new(false)));
        let mut monitor =
            ReachabilityMonitor::start(toggle.clone(), events.clone(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(45)).await;
        toggle.0.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(45)).await;
        monitor.stop();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(matches!(event, FdcEvent::NetworkOnline { .. }));
        }
        assert_eq!(seen, vec![false, true]);
    }
}
