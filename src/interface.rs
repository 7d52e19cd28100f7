use log::{error, info};
use serde::{Deserialize, Serialize};
use zbus::{fdo, interface, object_server::SignalEmitter};
use zvariant::Type;

use crate::{
    bridge::ApplicationBridge,
    color::{Color, Mode},
    status::ConnectionStatus,
};

pub const SERVICE_NAME: &str = "io.github.led_commander";
pub const OBJECT_PATH: &str = "/io/github/led_commander";

/// Wire form of [`ConnectionStatus`]. D-Bus has no optional values, so an
/// unknown RSSI is sent as `0`, an unknown CPU load as `-1` and no error as
/// an empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Type)]
pub struct StatusDto {
    pub connected: bool,
    pub device_name: String,
    pub rssi: i16,
    pub mode: String,
    pub color: (u8, u8, u8),
    pub error: String,
    pub cpu_usage: f64,
    pub message: String,
    pub category: String,
}

impl From<&ConnectionStatus> for StatusDto {
    fn from(status: &ConnectionStatus) -> Self {
        Self {
            connected: status.connected,
            device_name: status.device_name.clone(),
            rssi: status.signal_strength.unwrap_or(0),
            mode: status.mode.to_string(),
            color: status.color.to_tuple(),
            error: status.error.clone().unwrap_or_default(),
            cpu_usage: status.cpu_usage.map_or(-1.0, f64::from),
            message: status.message.clone(),
            category: status.category.to_string(),
        }
    }
}

pub struct DBusInterface {
    bridge: ApplicationBridge,
    version: String,
}

impl DBusInterface {
    pub fn new(bridge: ApplicationBridge, version: String) -> Self {
        Self { bridge, version }
    }
}

#[interface(name = "io.github.led_commander1")]
impl DBusInterface {
    #[zbus(signal, name = "StatusChanged")]
    pub async fn status_updated(
        emitter: &SignalEmitter<'_>,
        status: &StatusDto,
    ) -> zbus::Result<()>;

    async fn set_color(&self, r: u8, g: u8, b: u8) {
        self.bridge.set_color(Color::rgb(r, g, b)).await;
    }

    async fn set_color_hex(&self, hex: String) -> fdo::Result<()> {
        let color = Color::from_hex(&hex).map_err(|e| fdo::Error::InvalidArgs(e.to_string()))?;
        self.bridge.set_color(color).await;
        Ok(())
    }

    async fn set_mode(&self, mode: String) -> fdo::Result<()> {
        let mode: Mode = mode
            .parse()
            .map_err(|e: anyhow::Error| fdo::Error::InvalidArgs(e.to_string()))?;
        self.bridge.set_mode(mode).await;
        Ok(())
    }

    /// Returns the stored, clamped factor.
    async fn set_brightness(&self, brightness: f64) -> f64 {
        f64::from(self.bridge.set_brightness(brightness as f32).await)
    }

    /// Returns the stored, clamped speed.
    async fn set_speed(&self, speed: i32) -> u8 {
        self.bridge.set_speed(speed).await
    }

    async fn apply_preset(&self, name: String) -> fdo::Result<(u8, u8, u8)> {
        self.bridge
            .apply_preset(&name)
            .await
            .map(|preset| preset.color.to_tuple())
            .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
    }

    async fn list_presets(&self) -> Vec<(String, (u8, u8, u8))> {
        self.bridge
            .presets()
            .await
            .into_iter()
            .map(|p| (p.name, p.color.to_tuple()))
            .collect()
    }

    async fn request_disconnect(&self) {
        self.bridge.request_disconnect();
    }

    async fn save_preferences(&self) -> fdo::Result<()> {
        self.bridge.save_preferences().await.map_err(|e| {
            error!("{e:#}");
            fdo::Error::Failed(format!("{e:#}"))
        })
    }

    async fn stop(&self) {
        info!("Stop requested over D-Bus");
        self.bridge.shutdown();
    }

    async fn get_status(&self) -> StatusDto {
        StatusDto::from(&self.bridge.status())
    }

    /// Full snapshot as JSON, nullable fields included.
    #[zbus(property)]
    async fn status(&self) -> String {
        serde_json::to_string(&self.bridge.status()).unwrap_or_else(|e| {
            error!("Failed to serialize status: {e}");
            String::from("{}")
        })
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }
}
