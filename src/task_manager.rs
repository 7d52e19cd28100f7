//! Task management for async service lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Manages async tasks with proper lifecycle and error handling.
///
/// Every task gets a child of `global_token`; shutdown cancels the parent and
/// joins each task with a bounded wait.
pub struct TaskManager {
    tasks: HashMap<String, JoinHandle<Result<()>>>,
    pub global_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_shutdown_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// `timeout` bounds the join of each task in [`shutdown_all`](Self::shutdown_all).
    pub fn with_shutdown_timeout(timeout: Duration) -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout: timeout,
        }
    }

    /// Spawns and registers a task with the given name.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let task_token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            info!("Starting task: {}", task_name);
            match task_fn(task_token).await {
                Ok(()) => {
                    info!("Task '{}' completed successfully", task_name);
                    Ok(())
                }
                Err(e) => {
                    error!("Task '{}' failed: {:#}", task_name, e);
                    Err(e)
                }
            }
        });

        if let Some(previous) = self.tasks.insert(name.clone(), handle) {
            warn!("Task '{}' replaced a running task of the same name", name);
            previous.abort();
        }

        info!("Task '{}' spawned", name);
        Ok(())
    }

    /// Cancels every task and waits for each one.
    ///
    /// Returns the first error encountered, if any. A task that does not
    /// finish within the shutdown timeout is aborted.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());

        self.global_token.cancel();

        let mut first_error = None;
        let tasks: Vec<_> = self.tasks.drain().collect();

        for (name, mut handle) in tasks {
            let error = match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(e))) => {
                    warn!("Task '{}' failed during shutdown: {:#}", name, e);
                    Some(e)
                }
                Ok(Err(e)) => Some(anyhow!("Task '{}' panicked: {}", name, e)),
                Err(_) => {
                    handle.abort();
                    Some(anyhow!("Task '{}' shutdown timeout exceeded", name))
                }
            };
            if let Some(error) = error {
                error!("{:#}", error);
                first_error.get_or_insert(error);
            }
        }

        if let Some(error) = first_error {
            Err(error).context("One or more tasks failed during shutdown")
        } else {
            info!("All tasks stopped");
            Ok(())
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn cancelled_tasks_stop_cleanly() {
        let mut manager = TaskManager::new();
        for name in ["a", "b"] {
            manager
                .spawn_task(name.to_string(), |token| async move {
                    token.cancelled().await;
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(manager.active_count(), 2);
        assert!(manager.is_running("a"));

        manager.shutdown_all().await.unwrap();
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn task_error_is_reported() {
        let mut manager = TaskManager::new();
        manager
            .spawn_task("broken".into(), |_| async { bail!("radio on fire") })
            .await
            .unwrap();

        let err = manager.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("radio on fire"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_hits_timeout() {
        let mut manager = TaskManager::with_shutdown_timeout(Duration::from_secs(1));
        manager
            .spawn_task("stuck".into(), |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await
            .unwrap();

        let err = manager.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("shutdown timeout exceeded"));
    }
}
