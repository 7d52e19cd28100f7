//! Application state and global context management.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    config::{Config, ConfigManager},
    drivers::{ActiveDriver, DriverRegistry},
    event::EventBus,
    intent::ControlIntent,
    status::StatusHub,
    telemetry::{CpuSampler, SysinfoCpuSampler},
    transport::{BleCentral, btle::BtleCentral},
};

/// Shared application state containing all runtime data.
///
/// Built once at startup and handed to every service by `Arc`. Fields that
/// change at runtime carry their own synchronization.
pub struct AppState {
    /// Configuration manager for centralized config handling
    pub config_manager: Arc<ConfigManager>,
    /// Target color, mode, brightness and speed written by the control plane
    pub intent: Arc<ControlIntent>,
    /// Latest connection status and its subscribers
    pub status: Arc<StatusHub>,
    pub registry: Arc<DriverRegistry>,
    /// Driver bound to the current connection, if any
    pub active_driver: Arc<ActiveDriver>,
    /// Platform BLE adapter
    pub central: Arc<dyn BleCentral>,
    pub cpu: Arc<dyn CpuSampler>,
    pub event_bus: EventBus,
}

impl AppState {
    /// Creates the state on the first BLE adapter found on the system.
    pub async fn new(config_manager: ConfigManager, event_bus: EventBus) -> Result<Self> {
        let central = BtleCentral::new()
            .await
            .context("Failed to initialize Bluetooth adapter")?;

        Ok(Self::with_backends(
            config_manager,
            event_bus,
            Arc::new(central),
            Arc::new(SysinfoCpuSampler::new()),
        )
        .await)
    }

    /// Creates the state on explicit transport and telemetry backends.
    pub async fn with_backends(
        config_manager: ConfigManager,
        event_bus: EventBus,
        central: Arc<dyn BleCentral>,
        cpu: Arc<dyn CpuSampler>,
    ) -> Self {
        let intent = {
            let config = config_manager.get().await;
            intent_from(&config)
        };
        let status = StatusHub::with_event_bus(event_bus.clone());
        status.patch(|s| {
            s.mode = intent.mode();
            s.color = intent.color();
        });

        Self {
            config_manager: Arc::new(config_manager),
            intent: Arc::new(intent),
            status: Arc::new(status),
            registry: Arc::new(DriverRegistry::new()),
            active_driver: Arc::new(ActiveDriver::default()),
            central,
            cpu,
            event_bus,
        }
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }
}

/// Seeds the control intent from the saved preferences.
fn intent_from(config: &Config) -> ControlIntent {
    let prefs = &config.preferences;
    ControlIntent::new(
        prefs.last_color,
        prefs.last_mode,
        prefs.brightness,
        prefs.default_speed,
    )
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Color, Mode};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn intent_is_seeded_from_preferences() {
        let mut config = Config::default();
        config.preferences.last_color = Color::rgb(10, 20, 30);
        config.preferences.last_mode = Mode::Rainbow;
        config.preferences.brightness = 0.4;
        config.preferences.default_speed = 99;

        let state = test_support::offline_state(config).await;

        assert_eq!(state.intent.color(), Color::rgb(10, 20, 30));
        assert_eq!(state.intent.mode(), Mode::Rainbow);
        assert_eq!(state.intent.brightness(), 0.4);
        assert_eq!(state.intent.speed(), 99);
        assert_eq!(state.status.snapshot().mode, Mode::Rainbow);
        assert!(state.active_driver.get().is_none());
    }
}
