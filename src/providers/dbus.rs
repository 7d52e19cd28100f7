//! D-Bus service provider for dependency injection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    app_context::AppState,
    bridge::ApplicationBridge,
    event::{Event, EventBus},
    interface::{DBusInterface, OBJECT_PATH, SERVICE_NAME, StatusDto},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// D-Bus service provider for external control.
///
/// Exposes the [`ApplicationBridge`] commands on the session bus and turns
/// every status event into a `StatusChanged` signal.
///
/// # Priority and Criticality
///
/// - **Priority**: 8 (high)
/// - **Critical**: Yes (it is the only control surface of the daemon)
///
/// # Interface
///
/// - **Service Name**: `io.github.led_commander`
/// - **Object Path**: `/io/github/led_commander`
///
/// # Requirements
///
/// Requires a running D-Bus session bus. Without one [`new`](Self::new)
/// fails and the coordinator never registers the provider. Once
/// registered, a start failure is fatal like any critical service.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use led_commander::providers::DBusServiceProvider;
/// use led_commander::app_context::AppState;
///
/// # async fn example(state: Arc<AppState>) -> anyhow::Result<()> {
/// let event_bus = state.event_bus.clone();
/// let provider = DBusServiceProvider::new(state, event_bus).await?;
/// # Ok(())
/// # }
/// ```
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
    /// Creates a new D-Bus service provider with session bus connection.
    pub async fn new(state: Arc<AppState>, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to the session bus")?;
        Ok(Self {
            state,
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let bridge = ApplicationBridge::from_state(&self.state);
        let event_bus = self.event_bus.clone();
        let connection = self.connection.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_dbus_service(bridge, event_bus, connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Serves the interface and forwards status events as signals until
/// cancellation is requested.
async fn run_dbus_service(
    bridge: ApplicationBridge,
    event_bus: EventBus,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut events = event_bus.subscribe();
    let interface = DBusInterface::new(bridge, env!("CARGO_PKG_VERSION").to_string());
    connection
        .object_server()
        .at(OBJECT_PATH, interface)
        .await
        .context("Failed to register D-Bus object")?;

    connection
        .request_name(SERVICE_NAME)
        .await
        .with_context(|| format!("Failed to acquire bus name {SERVICE_NAME}"))?;

    let iface = connection
        .object_server()
        .interface::<_, DBusInterface>(OBJECT_PATH)
        .await?;
    info!("D-Bus interface available at {SERVICE_NAME}{OBJECT_PATH}");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("D-Bus service cancelled");
                break;
            }
            event = events.recv() => match event {
                Ok(Event::StatusChanged(status)) => {
                    let dto = StatusDto::from(&status);
                    if let Err(e) = DBusInterface::status_updated(iface.signal_emitter(), &dto).await {
                        debug!("Failed to emit StatusChanged: {e}");
                    }
                }
                Ok(Event::SystemShutdown) => {}
                Err(RecvError::Lagged(n)) => warn!("D-Bus signal relay lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}
