//! Control-plane facade shared by every command surface.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use crate::{
    app_context::AppState,
    color::{Color, ColorPreset, Mode},
    config::ConfigManager,
    drivers::{ActiveDriver, LedDriver, clamp_byte, mode_id},
    event::{Event, EventBus},
    intent::ControlIntent,
    status::{ConnectionStatus, StatusCallback, StatusCategory, StatusHub},
};

/// Single entry point for commands from the D-Bus interface or any other
/// front end.
///
/// Commands only write the shared [`ControlIntent`]; the supervisor picks
/// them up on its next iteration. Mode acknowledgements are the exception
/// and go straight to the active driver on a detached task.
#[derive(Clone)]
pub struct ApplicationBridge {
    config: Arc<ConfigManager>,
    intent: Arc<ControlIntent>,
    status: Arc<StatusHub>,
    active: Arc<ActiveDriver>,
    event_bus: EventBus,
}

impl ApplicationBridge {
    pub fn new(
        config: Arc<ConfigManager>,
        intent: Arc<ControlIntent>,
        status: Arc<StatusHub>,
        active: Arc<ActiveDriver>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            config,
            intent,
            status,
            active,
            event_bus,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.config_manager.clone(),
            state.intent.clone(),
            state.status.clone(),
            state.active_driver.clone(),
            state.event_bus.clone(),
        )
    }

    pub async fn set_color(&self, color: Color) {
        debug!("Color set to {color}");
        self.intent.set_color(color);
        self.config.get_mut().await.preferences.last_color = color;
    }

    /// Switches the effect and, if connected, acknowledges the new mode on
    /// the device without waiting for the write.
    pub async fn set_mode(&self, mode: Mode) {
        if self.intent.set_mode(mode) == mode {
            return;
        }
        info!("Mode changed to {mode}");
        self.status
            .update(&format!("Mode: {mode}"), StatusCategory::Info, |s| {
                s.mode = mode
            });
        self.config.get_mut().await.preferences.last_mode = mode;
        self.acknowledge_mode(mode);
    }

    /// Returns the stored factor, clamped to `0.0..=1.0`.
    pub async fn set_brightness(&self, brightness: f32) -> f32 {
        let value = self.intent.set_brightness(brightness);
        self.config.get_mut().await.preferences.brightness = value;
        value
    }

    /// Clamps `speed` to `0..=255`. An unchanged value writes nothing;
    /// otherwise the current mode is resent with the new speed.
    pub async fn set_speed(&self, speed: i32) -> u8 {
        let speed = clamp_byte(speed);
        if self.intent.set_speed(speed) == speed {
            return speed;
        }
        debug!("Speed set to {speed}");
        if let Some(driver) = self.active.get() {
            driver.set_speed(speed.into());
        }
        self.config.get_mut().await.preferences.default_speed = speed;
        self.acknowledge_mode(self.intent.mode());
        speed
    }

    pub fn on_status_change(&self, callback: StatusCallback) {
        self.status.subscribe(callback);
    }

    /// The supervisor drops the link on its next iteration and starts
    /// searching again after a short pause.
    pub fn request_disconnect(&self) {
        info!("Disconnect requested");
        self.intent.request_disconnect();
    }

    /// Copies the live intent into the preferences and writes the config file.
    pub async fn save_preferences(&self) -> Result<()> {
        {
            let mut config = self.config.get_mut().await;
            let prefs = &mut config.preferences;
            prefs.last_color = self.intent.color();
            prefs.last_mode = self.intent.mode();
            prefs.brightness = self.intent.brightness();
            prefs.default_speed = self.intent.speed();
        }
        self.config
            .save()
            .await
            .context("Failed to save preferences")
    }

    /// Looks `name` up among built-in and user presets, ignoring case, and
    /// applies its color.
    pub async fn apply_preset(&self, name: &str) -> Result<ColorPreset> {
        let preset = self
            .presets()
            .await
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| anyhow!("Unknown preset '{name}'"))?;
        self.set_color(preset.color).await;
        Ok(preset)
    }

    /// Built-in presets first, then the ones from the config file.
    pub async fn presets(&self) -> Vec<ColorPreset> {
        let mut presets = ColorPreset::default_presets();
        presets.extend(self.config.get().await.custom_presets.iter().cloned());
        presets
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.snapshot()
    }

    pub fn intent(&self) -> &ControlIntent {
        &self.intent
    }

    /// Asks the coordinator to stop every service and persist preferences.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        if let Err(e) = self.event_bus.publish(Event::SystemShutdown) {
            warn!("Failed to publish shutdown event: {e}");
        }
    }

    fn acknowledge_mode(&self, mode: Mode) {
        let Some(driver) = self.active.get() else {
            return;
        };
        let Some(id) = mode_id(&driver.supported_modes(), mode) else {
            warn!("{} has no vendor id for mode {mode}", driver.protocol_name());
            return;
        };
        let speed = i32::from(self.intent.speed());
        tokio::spawn(send_mode(driver, id, speed));
    }
}

async fn send_mode(driver: Arc<dyn LedDriver>, id: u8, speed: i32) {
    if !driver.set_mode(id, speed).await {
        debug!("Mode acknowledgement via {} failed", driver.protocol_name());
    }
}
