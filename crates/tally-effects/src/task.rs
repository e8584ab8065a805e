//! Task spawning handlers
//!
//! [`TaskRegistry`] runs detached work on tokio and tracks handles for
//! shutdown. [`DeferredSpawner`] queues the same work so tests can decide
//! exactly when it runs.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::{PhysicalTimeEffects, TaskSpawner};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tokio-backed registry of background tasks
#[derive(Debug)]
pub struct TaskRegistry {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a task that is aborted on shutdown
    pub fn spawn_tracked<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = fut => {}
            }
        });
        let mut handles = self.handles.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    /// Run `f` every `interval` until it returns `false` or the registry shuts down.
    ///
    /// The first run happens after one interval has elapsed.
    pub fn spawn_interval_until<F, Fut>(
        &self,
        time_effects: Arc<dyn PhysicalTimeEffects>,
        interval: Duration,
        mut f: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = time_effects.sleep_ms(interval_ms) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }

                if *shutdown_rx.borrow() || !f().await {
                    break;
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Number of tasks that have not finished yet
    pub fn active_count(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait until at most `background` tasks are still running.
    ///
    /// Returns `false` if `timeout` passed first.
    pub async fn settle(&self, background: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.active_count() > background {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Signal shutdown and abort every tracked task
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TaskSpawner for TaskRegistry {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        self.spawn_tracked(fut);
    }
}

/// Spawner that queues work until [`DeferredSpawner::run_pending`] is awaited
#[derive(Default)]
pub struct DeferredSpawner {
    queue: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl DeferredSpawner {
    /// Create an empty spawner
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued tasks
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued tasks in spawn order, including tasks they spawn, until the
    /// queue is empty. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.queue.lock());
            if batch.is_empty() {
                return ran;
            }
            for fut in batch {
                fut.await;
                ran += 1;
            }
        }
    }

    /// Drop queued tasks without running them
    pub fn discard_pending(&self) -> usize {
        let mut queue = self.queue.lock();
        let count = queue.len();
        queue.clear();
        count
    }
}

impl TaskSpawner for DeferredSpawner {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        self.queue.lock().push(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimulatedTimeHandler;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn deferred_spawner_runs_nested_work() {
        let spawner = Arc::new(DeferredSpawner::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_spawner = spawner.clone();
        let inner_counter = counter.clone();
        spawner.spawn(
            async move {
                inner_counter.fetch_add(1, Ordering::SeqCst);
                let nested = inner_counter.clone();
                inner_spawner.spawn(
                    async move {
                        nested.fetch_add(10, Ordering::SeqCst);
                    }
                    .boxed(),
                );
            }
            .boxed(),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(spawner.run_pending().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert_eq!(spawner.pending_count(), 0);
    }

    #[tokio::test]
    async fn discarded_work_never_runs() {
        let spawner = DeferredSpawner::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        spawner.spawn(
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        );

        assert_eq!(spawner.discard_pending(), 1);
        assert_eq!(spawner.run_pending().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registry_runs_spawned_work() {
        let registry = TaskRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        TaskSpawner::spawn(
            &registry,
            async move {
                let _ = tx.send(7u8);
            }
            .boxed(),
        );
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn settle_waits_for_detached_work() {
        let registry = TaskRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        registry.spawn_tracked(async move {
            let _ = rx.await;
        });

        assert!(!registry.settle(0, Duration::from_millis(20)).await);
        tx.send(()).unwrap();
        assert!(registry.settle(0, Duration::from_secs(1)).await);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn interval_stops_when_callback_declines() {
        let registry = TaskRegistry::new();
        let clock = Arc::new(SimulatedTimeHandler::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut tx = Some(tx);

        let counted = runs.clone();
        registry.spawn_interval_until(clock.clone(), Duration::from_secs(60), move || {
            let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
            let done = if n == 3 { tx.take() } else { None };
            async move {
                if let Some(done) = done {
                    let _ = done.send(());
                    return false;
                }
                true
            }
        });

        rx.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(clock.get_time(), 180_000);
    }
}
