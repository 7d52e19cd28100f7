use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    app_context::AppState, providers::traits::ServiceProvider, supervisor::ConnectionSupervisor,
    task_manager::TaskManager,
};

/// Runs the [`ConnectionSupervisor`], the only owner of the BLE link.
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes
pub struct ConnectionServiceProvider {
    state: Arc<AppState>,
}

impl ConnectionServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for ConnectionServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let supervisor = ConnectionSupervisor::from_state(&self.state);

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| {
                supervisor.run(cancel_token)
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ConnectionService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app_context::test_support::offline_state, config::Config, status::StatusCategory};
    use pretty_assertions::assert_eq;
    use tokio::time::{Duration, sleep};

    #[tokio::test]
    async fn provider_metadata() {
        let provider = ConnectionServiceProvider::new(offline_state(Config::default()).await);
        assert_eq!(provider.name(), "ConnectionService");
        assert_eq!(provider.priority(), 10);
        assert!(provider.is_critical());
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_searches_until_shutdown() {
        let state = offline_state(Config::default()).await;
        let mut task_manager = TaskManager::new();

        ConnectionServiceProvider::new(state.clone())
            .start(&mut task_manager)
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(task_manager.is_running("ConnectionService"));
        assert_eq!(state.status.snapshot().category, StatusCategory::Scanning);

        task_manager.shutdown_all().await.unwrap();

        let status = state.status.snapshot();
        assert_eq!(status.message, "Stopped");
        assert!(!status.connected);
    }
}
