//! `Scheduler::schedule_after`: a structured-concurrency replacement for
//! the source's `setTimeout`-after-mutation pattern.
//!
//! Every deferred task returns a `JoinHandle` the caller can `.abort()`,
//! so cancellation on shutdown is well-defined instead of implicit.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    /// Run `task` once, after `delay` has elapsed. Dropping or aborting
    /// the returned handle cancels the pending task.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_after_delay() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let scheduler = Scheduler::new();

        let handle = scheduler.schedule_after(Duration::from_millis(20), async move {
            ran_clone.store(true, Ordering::SeqCst);
        });

        assert!(!ran.load(Ordering::SeqCst));
        handle.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn abort_prevents_run() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let scheduler = Scheduler::new();

        let handle = scheduler.schedule_after(Duration::from_millis(50), async move {
            ran_clone.store(true, Ordering::SeqCst);
        });
        handle.abort();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
