use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::secs,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Status broadcast service provider.
///
/// Provides a non-critical service that periodically republishes the latest
/// [`ConnectionStatus`](crate::status::ConnectionStatus) on the event bus.
/// Fields the supervisor updates silently, such as the CPU reading, reach
/// subscribers this way, and clients that connect late converge on the
/// current state.
///
/// # Priority and Criticality
///
/// - **Priority**: 3 (low)
/// - **Critical**: No (optional service)
///
/// # Configuration
///
/// The broadcast interval is `connection.rssi_interval * 2`, never shorter
/// than one second.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use led_commander::providers::BroadcastServiceProvider;
/// use led_commander::app_context::AppState;
///
/// # async fn example(state: Arc<AppState>) -> anyhow::Result<()> {
/// let event_bus = state.event_bus.clone();
/// let provider = BroadcastServiceProvider::new(state, event_bus);
/// // Use with TaskManager to start the service
/// # Ok(())
/// # }
/// ```
pub struct BroadcastServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl BroadcastServiceProvider {
    /// Creates a new broadcast service provider.
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for BroadcastServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_broadcast_service(state, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "BroadcastService"
    }

    fn priority(&self) -> i32 {
        3
    }

    fn is_critical(&self) -> bool {
        false
    }
}

async fn broadcast_period(state: &AppState) -> Duration {
    let rssi_interval = state.config().await.connection.rssi_interval;
    secs(rssi_interval * 2.0).max(Duration::from_secs(1))
}

async fn run_broadcast_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut interval = interval(broadcast_period(&state).await);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Broadcast service cancelled");
                break;
            }
            _instant = interval.tick() => {
                broadcast_current_state(&state, &event_bus);
            }
        }
    }
    Ok(())
}

fn broadcast_current_state(state: &AppState, event_bus: &EventBus) {
    let snapshot = state.status.snapshot();

    if let Err(e) = event_bus.publish(Event::StatusChanged(snapshot)) {
        debug!("Status rebroadcast skipped: {e}");
    }
}
