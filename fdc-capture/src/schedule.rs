//! Cancellable scheduled tasks
//!
//! A [`ScheduledTask`] owns at most one pending timer. Its state is tagged
//! (`Idle`, `Scheduled`, `Firing`) so owners can inspect it, and it is
//! cancelled explicitly on teardown or implicitly on drop. Rescheduling
//! cancels the previous timer first; a cancelled timer never runs its body.
//!
//! [`ScheduledTask::cancel`] aborts immediately, possibly in the middle of a
//! run. [`ScheduledTask::shutdown`] lets a run in progress finish and returns
//! only once the task has exited.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

/// Observable state of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Scheduled,
    Firing,
}

impl TaskState {
    fn as_u8(self) -> u8 {
        match self {
            TaskState::Idle => 0,
            TaskState::Scheduled => 1,
            TaskState::Firing => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TaskState::Scheduled,
            2 => TaskState::Firing,
            _ => TaskState::Idle,
        }
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: TaskState) -> Arc<Self> {
        Arc::new(Self(AtomicU8::new(state.as_u8())))
    }

    fn set(&self, state: TaskState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Handle to one pending (or repeating) timer
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    // Fresh per schedule() call so a superseded timer cannot overwrite the
    // state of its replacement.
    state: Arc<SharedState>,
    handle: Option<JoinHandle<()>>,
    stop: Option<oneshot::Sender<()>>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: SharedState::new(TaskState::Idle),
            handle: None,
            stop: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Run `task` once after `delay`, replacing any pending timer
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let state = SharedState::new(TaskState::Scheduled);
        self.state = Arc::clone(&state);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);
        let name = self.name;

        trace!(task = name, delay_ms = delay.as_millis() as u64, "Scheduling task");
        self.handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop_rx => {
                    state.set(TaskState::Idle);
                    return;
                }
            }
            state.set(TaskState::Firing);
            task.await;
            state.set(TaskState::Idle);
        }));
    }

    /// Run `make()` every `period` (first run after one period) until cancelled
    pub fn schedule_repeating<F, M>(&mut self, period: Duration, mut make: M)
    where
        M: FnMut() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let state = SharedState::new(TaskState::Scheduled);
        self.state = Arc::clone(&state);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; the first run is one period out
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = &mut stop_rx => break,
                }
                // A started run always completes; stop is checked between runs
                state.set(TaskState::Firing);
                make().await;
                state.set(TaskState::Scheduled);
            }
            state.set(TaskState::Idle);
        }));
    }

    /// Cancel the pending timer
    ///
    /// Returns true if a timer was still scheduled or firing.
    pub fn cancel(&mut self) -> bool {
        let was_active = self.state() != TaskState::Idle;
        self.stop = None;
        if let Some(handle) = self.handle.take() {
            handle.abort();
            if was_active {
                trace!(task = self.name, "Cancelled task");
            }
        }
        self.state.set(TaskState::Idle);
        was_active
    }

    /// Stop the timer and wait for the task to exit
    ///
    /// A run already in progress finishes first; no run starts afterwards.
    /// Returns true if a timer was still scheduled or firing.
    pub async fn shutdown(&mut self) -> bool {
        let was_active = self.state() != TaskState::Idle;
        if let Some(stop) = self.stop.take() {
            // Err means the task already exited
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = self.name, "Task ended abnormally: {}", e);
            }
            if was_active {
                trace!(task = self.name, "Shut down task");
            }
        }
        self.state.set(TaskState::Idle);
        was_active
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_task_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("test");
        assert_eq!(task.state(), TaskState::Idle);

        let counter = Arc::clone(&hits);
        task.schedule(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(task.state(), TaskState::Scheduled);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_prevents_late_run() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("test");

        let counter = Arc::clone(&hits);
        task.schedule(Duration::from_millis(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.cancel());
        assert!(!task.cancel());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(task.state(), TaskState::Idle);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_pending_timer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("test");

        for _ in 0..3 {
            let counter = Arc::clone(&hits);
            task.schedule(Duration::from_millis(20), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeating_until_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let mut task = ScheduledTask::new("ticker");
            let counter = Arc::clone(&hits);
            task.schedule_repeating(Duration::from_millis(10), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
            tokio::time::sleep(Duration::from_millis(55)).await;
        }
        let after_drop = hits.load(Ordering::SeqCst);
        assert!(after_drop >= 2, "expected several ticks, got {}", after_drop);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_run_in_progress() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("ticker");
        let counter = Arc::clone(&finished);
        task.schedule_repeating(Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // First run starts at 10ms and is still sleeping at 20ms
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.state(), TaskState::Firing);

        assert!(task.shutdown().await);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Idle);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_delay_skips_run() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("test");
        let counter = Arc::clone(&hits);
        task.schedule(Duration::from_millis(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(task.shutdown().await);
        assert!(!task.shutdown().await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
