//! Fixed-delay scheduling of the watchdogs.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use cmsync_common::Result;

/// Runs watchdog rounds on fixed-delay loops until shut down.
///
/// The delay is measured from the end of one round to the start of the
/// next, so a round never overlaps itself within one instance.
pub struct WatchdogScheduler {
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl WatchdogScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            loops: Vec::new(),
        }
    }

    /// Start a loop calling `round` now and then `delay` after each round ends.
    ///
    /// A failed round is logged; the loop keeps going.
    pub fn schedule<F, Fut>(&mut self, name: &'static str, delay: Duration, round: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<usize>> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            info!("Watchdog {} started, running every {:?}", name, delay);
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                match round().await {
                    Ok(count) => debug!("Watchdog {} round done ({} handles)", name, count),
                    Err(e) => error!("Watchdog {} round failed: {}", name, e),
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Watchdog {} stopped", name);
        });
        self.loops.push(handle);
    }

    /// Number of running loops.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Signal every loop to stop and wait for them.
    ///
    /// A round in progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.loops {
            if let Err(e) = handle.await {
                error!("Watchdog loop ended abnormally: {}", e);
            }
        }
    }
}

impl Default for WatchdogScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsync_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rounds_run_on_fixed_delay() {
        let rounds = Arc::new(AtomicU32::new(0));
        let counter = rounds.clone();
        let mut scheduler = WatchdogScheduler::new();
        scheduler.schedule("counter", Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 4);

        scheduler.shutdown().await;
        let after_shutdown = rounds.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_round_does_not_stop_loop() {
        let rounds = Arc::new(AtomicU32::new(0));
        let counter = rounds.clone();
        let mut scheduler = WatchdogScheduler::new();
        scheduler.schedule("failing", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<usize, _>(Error::Cluster("queue unavailable".to_string()))
            }
        });
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 4);
        scheduler.shutdown().await;
    }
}
