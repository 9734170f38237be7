//! Autoupdate timer handle.
//!
//! Owns the background tasks driving scheduled update checks: an optional
//! one-shot first-run check and at most one recurring timer. Starting a timer
//! aborts the one it replaces.

use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Handle to the scheduler's background timer tasks.
#[derive(Debug, Default)]
pub struct AutoUpdateTimer {
    first_check: Mutex<Option<JoinHandle<()>>>,
    recurring: Mutex<Option<JoinHandle<()>>>,
}

impl AutoUpdateTimer {
    /// Creates a handle with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the recurring timer task, aborting any previous one.
    pub fn start<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        if let Some(previous) = self.recurring.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Aborts the recurring timer, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.recurring.lock().take() {
            handle.abort();
        }
    }

    /// Cancels the recurring timer and starts `task` in its place.
    pub fn reschedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.start(task);
    }

    /// Spawns the one-shot first check, aborting a pending one.
    pub fn start_first_check<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        if let Some(previous) = self.first_check.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Returns true while a recurring timer task is alive.
    pub fn is_armed(&self) -> bool {
        self.recurring
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Aborts every timer task.
    pub fn shutdown(&self) {
        if let Some(handle) = self.first_check.lock().take() {
            handle.abort();
        }
        self.cancel();
    }
}

impl Drop for AutoUpdateTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
