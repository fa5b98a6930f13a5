//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting engine sessions."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Simple async rate limiter that ensures deterministic loop intervals.
///
/// The first tick completes immediately. `period` must be non-zero.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

/// Named background tasks owned by one session.
///
/// Spawning under a name that is already in use aborts the previous task, so at
/// most one task per name is ever alive. All tasks are aborted on
/// [`TaskGroup::shutdown`] or when the group is dropped.
#[derive(Debug, Default)]
pub struct TaskGroup {
    tasks: Mutex<HashMap<&'static str, JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` under `name`, aborting any task previously registered under it.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        if let Some(previous) = self.tasks.lock().insert(name, handle) {
            previous.abort();
            debug!(task = name, "replaced running task");
        }
    }

    /// Abort the task registered under `name`. Returns whether one was registered.
    pub fn abort(&self, name: &str) -> bool {
        match self.tasks.lock().remove(name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a task is registered under `name` and has not yet completed.
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort every task and wait until each one has stopped.
    pub async fn shutdown(&self) {
        let handles: Vec<(&'static str, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        for (name, handle) in handles {
            handle.abort();
            match handle.await {
                Ok(()) => debug!(task = name, "task finished before shutdown"),
                Err(err) if err.is_cancelled() => debug!(task = name, "task cancelled"),
                Err(err) => tracing::warn!(task = name, error = %err, "task panicked"),
            }
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_ticks_at_fixed_period() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let first = limiter.tick().await;
        let second = limiter.tick().await;
        assert_eq!(second - first, Duration::from_millis(100));
        assert_eq!(limiter.period(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn spawning_under_same_name_aborts_previous_task() {
        let group = TaskGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = counter.clone();
        group.spawn("ticker", async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                first.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(35)).await;
        group.spawn("ticker", std::future::pending());
        let frozen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(frozen, 3);
        assert_eq!(counter.load(Ordering::SeqCst), frozen);
        assert!(group.is_running("ticker"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_all_tasks() {
        let group = TaskGroup::new();
        group.spawn("a", std::future::pending());
        group.spawn("b", std::future::pending());
        assert!(group.is_running("a"));
        group.shutdown().await;
        assert!(!group.is_running("a"));
        assert!(!group.is_running("b"));
        assert!(!group.abort("a"));
    }
}
