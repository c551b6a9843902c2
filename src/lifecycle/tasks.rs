use std::fmt::Display;
use std::future::Future;

use tokio_util::task::TaskTracker;

/// Supervised fire-and-forget work: store inserts from the create path,
/// directory cleanup after deletes, reaping after downloads.
///
/// Callers never wait on these tasks, but failures are logged with the
/// record id and shutdown drains whatever is still running.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F, E>(&self, operation: &'static str, record_id: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let record_id = record_id.into();
        self.tracker.spawn(async move {
            match task.await {
                Ok(()) => tracing::debug!(operation, record_id = %record_id, "Background task done"),
                Err(e) => tracing::error!(
                    operation,
                    record_id = %record_id,
                    error = %e,
                    "Background task failed"
                ),
            }
        });
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task spawned so far, then keep accepting new ones.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Wait for outstanding tasks during shutdown.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            tracing::info!(pending = self.tracker.len(), "Waiting for background tasks");
        }
        self.tracker.wait().await;
    }
}
