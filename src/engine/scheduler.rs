use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Deferred lifecycle work keyed by ride id. At most one task per ride.
#[derive(Default)]
pub struct Scheduler {
    tasks: DashMap<Uuid, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay` unless the ride's entry is cancelled first.
    ///
    /// A task that schedules its own follow-up replaces its entry without
    /// aborting itself.
    pub fn schedule<F>(&self, ride_id: Uuid, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        self.tasks.insert(ride_id, handle);
        debug!(ride_id = %ride_id, delay_ms = delay.as_millis() as u64, "transition scheduled");
    }

    /// Aborts whatever is pending for the ride. Returns whether anything was.
    pub fn cancel(&self, ride_id: Uuid) -> bool {
        match self.tasks.remove(&ride_id) {
            Some((_, handle)) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!(ride_id = %ride_id, "scheduled transition cancelled");
                }
                pending
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, ride_id: Uuid) -> bool {
        self.tasks
            .get(&ride_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use uuid::Uuid;

    use super::Scheduler;

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_runs_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let ride_id = Uuid::from_u128(1);

        let counter = fired.clone();
        scheduler.schedule(ride_id, Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled(ride_id));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(ride_id));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_runs() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let ride_id = Uuid::from_u128(2);

        let counter = fired.clone();
        scheduler.schedule(ride_id, Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.cancel(ride_id));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!scheduler.cancel(ride_id));
    }
}
