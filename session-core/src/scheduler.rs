//! Debounced task scheduling
//!
//! A [`Debouncer`] runs the most recently scheduled task once no newer one has
//! arrived for `delay`. Scheduling again before the delay elapses replaces the
//! pending task. A task that already started is never aborted.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

const WAITING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

struct PendingRun {
    handle: JoinHandle<()>,
    phase: Arc<AtomicU8>,
}

impl PendingRun {
    /// Claim the run before it fires. `false` means it already started.
    fn cancel(&self) -> bool {
        let cancelled = self
            .phase
            .compare_exchange(WAITING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if cancelled {
            self.handle.abort();
        }
        cancelled
    }
}

pub struct Debouncer {
    delay: Duration,
    pending: Option<PendingRun>,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless another task is scheduled first.
    pub fn schedule<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(previous) = self.pending.take() {
            previous.cancel();
        }

        let phase = Arc::new(AtomicU8::new(WAITING));
        let claim = phase.clone();
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if claim
                .compare_exchange(WAITING, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            task.await;
        });

        self.pending = Some(PendingRun { handle, phase });
    }

    /// A task is scheduled and has not started yet.
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|run| run.phase.load(Ordering::SeqCst) == WAITING)
    }

    /// Drop a waiting task without running it. Returns `true` if one was
    /// waiting.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some_and(|run| run.cancel())
    }

    /// Cancel a waiting task, or wait for a started one to finish.
    ///
    /// Returns `true` if a waiting task was cancelled, meaning its work is
    /// still owed by the caller.
    pub async fn settle(&mut self) -> bool {
        let Some(run) = self.pending.take() else {
            return false;
        };
        if run.cancel() {
            return true;
        }
        if let Err(e) = run.handle.await {
            tracing::warn!(error = %e, "Debounced task did not complete");
        }
        false
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_schedules_run_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        for _ in 0..5 {
            debouncer.schedule(counting(&counter));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        debouncer.schedule(counting(&counter));
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_reports_owed_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        debouncer.schedule(counting(&counter));
        assert!(debouncer.settle().await);
        assert!(!debouncer.settle().await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_task_is_not_aborted() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(10));

        let slow = {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        };
        debouncer.schedule(slow);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Fired and mid-flight: settle waits instead of cancelling
        assert!(!debouncer.settle().await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
