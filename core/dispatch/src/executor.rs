//! Bounded executor for asynchronous request paths.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use cmsync_common::Result;

/// How a task ended, as seen by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Finished successfully before the deadline.
    Completed,
    /// Finished with an error (or panicked) before the deadline.
    Failed(String),
    /// Still running when the deadline passed.
    TimedOut,
}

/// Runs tasks on a fixed number of slots with a deadline each.
///
/// A task that misses its deadline is reported as [`TaskOutcome::TimedOut`]
/// but is not cancelled; it keeps its slot until it finishes.
#[derive(Clone)]
pub struct BoundedExecutor {
    permits: Arc<Semaphore>,
    width: usize,
}

impl BoundedExecutor {
    /// Create an executor running at most `width` tasks at once.
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` once a slot is free and wait for its outcome or the deadline.
    ///
    /// The deadline counts from the moment the task starts running.
    pub async fn execute<F, T>(&self, name: &str, task: F, timeout: Duration) -> TaskOutcome
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::Failed("executor is closed".to_string()),
        };
        let mut running = tokio::spawn(async move {
            let _permit = permit;
            task.await
        });

        let outcome = match tokio::time::timeout(timeout, &mut running).await {
            Err(_) => TaskOutcome::TimedOut,
            Ok(Ok(Ok(_))) => TaskOutcome::Completed,
            Ok(Ok(Err(e))) => TaskOutcome::Failed(e.to_string()),
            Ok(Err(e)) => TaskOutcome::Failed(format!("task aborted: {}", e)),
        };

        match &outcome {
            TaskOutcome::Completed => debug!("Task {} completed", name),
            TaskOutcome::Failed(message) => error!("Task {} failed: {}", name, message),
            TaskOutcome::TimedOut => warn!("Task {} timed out after {:?}", name, timeout),
        }
        outcome
    }

    /// Fire-and-forget variant of [`execute`](Self::execute).
    pub fn spawn<F, T>(&self, name: String, task: F, timeout: Duration) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move { executor.execute(&name, task, timeout).await })
    }
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new(10)
    }
}
