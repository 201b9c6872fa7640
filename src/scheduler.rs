//! Scheduled Background Tasks
//!
//! Every periodic job in the crate (cache sweep, price refresh queue, RPC
//! health checks) runs as a [`ScheduledTask`]: a spawned loop driven by
//! `tokio::time::interval` that stops when asked. Because ticks come from the
//! tokio clock, tests can step time with a paused runtime.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

pub struct ScheduledTask {
    name: String,
    period: Duration,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn `job` every `period`, first run one period from now.
    ///
    /// The loop awaits each run before waiting for the next tick, so runs
    /// from the same task never overlap.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(task = %task_name, period_ms = period.as_millis() as u64, "Scheduled task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!(task = %task_name, "Scheduled task stopped");
        });

        info!(task = %name, period_ms = period.as_millis() as u64, "Spawned scheduled task");
        Self {
            name,
            period,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop and wait for the in-flight run, if any, to finish
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(task = %self.name, error = %e, "Scheduled task ended abnormally");
        }
    }
}

/// Single-flight marker over an `AtomicBool`.
///
/// The flag is cleared on drop, so a run whose future is cancelled mid-await
/// (timeout, `select!`) still lets the next run in.
pub(crate) struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    /// `None` when another run holds the flag
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_each_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = ScheduledTask::spawn("counter", Duration::from_secs(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Nothing before the first period elapses
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(task.is_running());

        task.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_observable() {
        let task = ScheduledTask::spawn("noop", Duration::from_millis(100), || async {});
        assert_eq!(task.name(), "noop");
        assert_eq!(task.period(), Duration::from_millis(100));
        task.shutdown().await;
    }

    #[test]
    fn test_run_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = RunGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(RunGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(RunGuard::try_acquire(&flag).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_guard_released_when_run_cancelled() {
        let flag = AtomicBool::new(false);
        let run = async {
            let _guard = RunGuard::try_acquire(&flag);
            tokio::time::sleep(Duration::from_secs(10)).await;
        };
        assert!(tokio::time::timeout(Duration::from_millis(50), run).await.is_err());
        assert!(!flag.load(Ordering::SeqCst));
        assert!(RunGuard::try_acquire(&flag).is_some());
    }
}
