// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! One-shot timer tasks
//!
//! The session layer arms a timer when it starts waiting for a connect
//! or release response and cancels it when the response arrives. Tasks
//! run on the tokio runtime the timer was created on and must not be
//! handed closures that hold core locks.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Handle to a scheduled task; cancelling is idempotent.
#[derive(Debug)]
pub struct TimerHandle {
    inner: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.inner.abort();
    }
}

/// Schedules closures to run once after a delay.
#[derive(Debug, Clone)]
pub struct Timer {
    handle: Handle,
}

impl Timer {
    /// Captures the current tokio runtime. Panics outside a runtime
    /// context, like any other spawn.
    pub fn new() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle { inner }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_task_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::new();

        let fired_clone = fired.clone();
        timer.schedule(Duration::from_millis(10), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::new();

        let fired_clone = fired.clone();
        let handle = timer.schedule(Duration::from_millis(10), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
