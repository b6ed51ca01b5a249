use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::CacheResult;
use crate::manager::{CacheManager, SyncReport};

impl CacheManager {
    /// Start one background write-back task per registered namespace.
    ///
    /// Must be called from within a tokio runtime, after every namespace has
    /// been registered; namespaces registered later are only written back by
    /// explicit syncs and the final flush.
    pub fn spawn_sync(self: &Arc<Self>) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self
            .sync_schedule()
            .into_iter()
            .map(|(namespace, period)| {
                let cache = Arc::clone(self);
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // The first tick completes immediately; nothing is dirty yet.
                    ticker.tick().await;
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                let cache = Arc::clone(&cache);
                                let ns = namespace.clone();
                                let outcome =
                                    tokio::task::spawn_blocking(move || cache.sync_due(&ns)).await;
                                match outcome {
                                    Ok(Ok(_)) => {}
                                    Ok(Err(e)) => {
                                        debug!(namespace = %namespace, error = %e, "background sync failed");
                                    }
                                    Err(e) => {
                                        warn!(namespace = %namespace, error = %e, "background sync task panicked");
                                    }
                                }
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                    debug!(namespace = %namespace, "sync task stopped");
                })
            })
            .collect();

        info!("cache background sync started");
        SyncHandle {
            cache: Arc::clone(self),
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Handle to the background write-back tasks.
///
/// Dropping the handle stops the tasks but cannot flush; call
/// [`SyncHandle::shutdown`] to guarantee nothing dirty is left behind.
pub struct SyncHandle {
    cache: Arc<CacheManager>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    /// Number of running sync tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every sync task, wait for in-flight ticks to finish, then flush
    /// every namespace to completion.
    pub async fn shutdown(mut self) -> CacheResult<SyncReport> {
        info!("cache shutting down, flushing all namespaces");
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || cache.flush_all()).await {
            Ok(result) => result,
            // The blocking pool is gone (runtime shutting down); flush inline.
            Err(_) => self.cache.flush_all(),
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
