//! Configuration management for the led-commander daemon.
//!
//! Handles loading, validating and atomically saving the YAML document that
//! holds the target device, user preferences and connection tuning.

use crate::color::{Color, ColorPreset, Mode};
use anyhow::{Context, Result, bail, ensure};
use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "LED_COMMANDER_CONFIG";

/// Main configuration structure for the led-commander daemon.
///
/// # Example
///
/// ```yaml
/// version: 1
/// device:
///   address: "FF:FF:10:69:5B:2A"
///   protocol: triones
///   name: "Desk strip"
/// preferences:
///   brightness: 0.8
///   last_color: { r: 255, g: 80, b: 0 }
///   last_mode: RAINBOW
///   default_speed: 32
/// connection:
///   backoff_max: 120
/// custom_presets:
///   - name: Sunset
///     color: { r: 255, g: 94, b: 77 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Which peripheral to talk to and how.
    #[serde(default)]
    pub device: DeviceCfg,

    /// Values the user changes at runtime and expects back after a restart.
    #[serde(default)]
    pub preferences: Preferences,

    /// Discovery, reconnect and polling tuning.
    #[serde(default)]
    pub connection: ConnectionCfg,

    /// User presets offered after the built-in palette.
    #[serde(default)]
    pub custom_presets: Vec<ColorPreset>,
}

/// Target peripheral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCfg {
    /// MAC address. Without it discovery goes straight to a name scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Write characteristic. Filled in from the resolved driver when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_uuid: Option<String>,

    /// Explicit protocol name or alias; auto-detected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Display name used until the device reports its own.
    #[serde(default = "defaults::device_name")]
    pub name: String,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self {
            address: None,
            write_uuid: None,
            protocol: None,
            name: defaults::device_name(),
        }
    }
}

impl DeviceCfg {
    /// Explicit protocol, ignoring blank values.
    pub fn explicit_protocol(&self) -> Option<&str> {
        self.protocol
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Persisted user preferences. Out-of-range values are clamped on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "defaults::brightness", deserialize_with = "de::brightness")]
    pub brightness: f32,

    #[serde(default = "defaults::last_color", deserialize_with = "de::color")]
    pub last_color: Color,

    #[serde(default)]
    pub last_mode: Mode,

    #[serde(default = "defaults::auto_reconnect")]
    pub auto_reconnect: bool,

    /// Base reconnect delay in seconds, at least 1.
    #[serde(
        default = "defaults::reconnect_interval",
        deserialize_with = "de::reconnect_interval"
    )]
    pub reconnect_interval: f64,

    #[serde(default = "defaults::default_speed", deserialize_with = "de::speed")]
    pub default_speed: u8,

    #[serde(default = "defaults::theme")]
    pub theme: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            brightness: defaults::brightness(),
            last_color: defaults::last_color(),
            last_mode: Mode::default(),
            auto_reconnect: defaults::auto_reconnect(),
            reconnect_interval: defaults::reconnect_interval(),
            default_speed: defaults::default_speed(),
            theme: defaults::theme(),
        }
    }
}

/// Connection supervisor tuning. Durations are in seconds unless the
/// field name says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionCfg {
    pub backoff_factor: f64,
    pub backoff_max: f64,
    pub scan_timeout: f64,
    pub connect_timeout: f64,
    pub poll_interval_ms: u64,
    pub rssi_interval: f64,
    /// Consecutive discovery misses tolerated before the long cool-down.
    pub max_discovery_misses: u32,
    pub discovery_retry_delay: f64,
    pub discovery_cooldown: f64,
    /// Delay between attempts when auto-reconnect is off.
    pub fixed_retry_delay: f64,
    /// Pause after a user-requested disconnect.
    pub disconnect_pause: f64,
    /// Upper bound on joining background tasks at shutdown.
    pub shutdown_timeout: f64,
    /// Upper-case name fragments accepted by the fallback scan.
    pub name_filters: Vec<String>,
}

impl Default for ConnectionCfg {
    fn default() -> Self {
        Self {
            backoff_factor: 2.0,
            backoff_max: 300.0,
            scan_timeout: 5.0,
            connect_timeout: 10.0,
            poll_interval_ms: 100,
            rssi_interval: 5.0,
            max_discovery_misses: 10,
            discovery_retry_delay: 5.0,
            discovery_cooldown: 30.0,
            fixed_retry_delay: 5.0,
            disconnect_pause: 2.0,
            shutdown_timeout: 5.0,
            name_filters: ["ELK", "LED", "CTRL", "RGB"].map(String::from).to_vec(),
        }
    }
}

impl ConnectionCfg {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        secs(self.shutdown_timeout)
    }
}

/// Converts a validated, non-negative seconds value.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            device: DeviceCfg::default(),
            preferences: Preferences::default(),
            connection: ConnectionCfg::default(),
            custom_presets: Vec::new(),
        }
    }
}

impl Config {
    /// Validates value ranges.
    ///
    /// Unknown explicit protocol names pass: they surface at driver
    /// resolution, which falls back to ELK-BLEDOM.
    pub fn validate(&self) -> Result<()> {
        let prefs = &self.preferences;
        ensure!(
            prefs.brightness.is_finite() && (0.0..=1.0).contains(&prefs.brightness),
            "Brightness {} is outside 0..1",
            prefs.brightness
        );
        ensure!(
            prefs.reconnect_interval.is_finite() && prefs.reconnect_interval >= 1.0,
            "Reconnect interval {} must be at least 1 second",
            prefs.reconnect_interval
        );

        let conn = &self.connection;
        ensure!(
            conn.backoff_factor.is_finite() && conn.backoff_factor >= 1.0,
            "Backoff factor {} must be at least 1.0",
            conn.backoff_factor
        );
        for (name, value) in [
            ("backoff_max", conn.backoff_max),
            ("scan_timeout", conn.scan_timeout),
            ("connect_timeout", conn.connect_timeout),
            ("rssi_interval", conn.rssi_interval),
            ("discovery_retry_delay", conn.discovery_retry_delay),
            ("discovery_cooldown", conn.discovery_cooldown),
            ("fixed_retry_delay", conn.fixed_retry_delay),
            ("disconnect_pause", conn.disconnect_pause),
            ("shutdown_timeout", conn.shutdown_timeout),
        ] {
            ensure!(
                value.is_finite() && value >= 0.0,
                "Connection setting '{name}' must be a non-negative number of seconds, got {value}"
            );
        }
        ensure!(
            conn.backoff_max >= prefs.reconnect_interval,
            "backoff_max ({}) is below reconnect_interval ({})",
            conn.backoff_max,
            prefs.reconnect_interval
        );

        for preset in &self.custom_presets {
            if preset.name.trim().is_empty() {
                bail!("Custom preset with empty name");
            }
        }

        Ok(())
    }
}

mod defaults {
    use crate::color::Color;

    pub fn device_name() -> String {
        "LED Controller".to_string()
    }

    pub fn brightness() -> f32 {
        1.0
    }

    pub fn last_color() -> Color {
        Color::WHITE
    }

    pub fn auto_reconnect() -> bool {
        true
    }

    pub fn reconnect_interval() -> f64 {
        5.0
    }

    pub fn default_speed() -> u8 {
        crate::drivers::elk_bledom::DEFAULT_SPEED
    }

    pub fn theme() -> String {
        "dark".to_string()
    }
}

/// Clamping deserializers for [`Preferences`].
mod de {
    use super::*;

    pub fn brightness<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
        let value = f32::deserialize(d)?;
        Ok(if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            super::defaults::brightness()
        })
    }

    pub fn reconnect_interval<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let value = f64::deserialize(d)?;
        Ok(if value.is_finite() {
            value.max(1.0)
        } else {
            super::defaults::reconnect_interval()
        })
    }

    pub fn speed<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
        Ok(i64::deserialize(d)?.clamp(0, 255) as u8)
    }

    pub fn color<'de, D: Deserializer<'de>>(d: D) -> Result<Color, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            r: i32,
            #[serde(default)]
            g: i32,
            #[serde(default)]
            b: i32,
        }
        let raw = Raw::deserialize(d)?;
        Ok(Color::new(raw.r, raw.g, raw.b))
    }
}

/// Existing config file, searched in priority order.
fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    if let Some(path) = user_config_path().filter(|p| p.exists()) {
        return Some(path);
    }

    let etc = Path::new("/etc/led_commander/config.yml");
    if etc.exists() {
        return Some(etc.to_path_buf());
    }

    None
}

/// `$XDG_CONFIG_HOME/led_commander/config.yml`, or under `~/.config`.
fn user_config_path() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
        .map(|dir| dir.join("led_commander").join("config.yml"))
}

/// Configuration manager that owns the config data and its file.
///
/// # Example
///
/// ```no_run
/// use led_commander::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
/// let speed = config_manager.get().await.preferences.default_speed;
/// config_manager.get_mut().await.preferences.default_speed = speed / 2;
/// config_manager.save().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. `LED_COMMANDER_CONFIG` environment variable
    /// 3. `XDG_CONFIG_HOME/led_commander/config.yml` or `~/.config/led_commander/config.yml`
    /// 4. `/etc/led_commander/config.yml`
    ///
    /// An explicit path that does not exist yet, or no file at all, yields
    /// the defaults; the first save then creates the file.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path.or_else(locate_config) {
            Some(p) => p,
            None => {
                let target = user_config_path()
                    .context("Cannot determine a configuration path: HOME is not set")?;
                warn!(
                    "No configuration file found, using defaults (will save to {})",
                    target.display()
                );
                return Ok(Self::new(Config::default(), target));
            }
        };

        if !config_path.exists() {
            warn!(
                "Configuration file {} does not exist, using defaults",
                config_path.display()
            );
            return Ok(Self::new(Config::default(), config_path));
        }

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self::new(config, config_path))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    pub async fn get_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, Config> {
        self.config.write().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves the current configuration atomically.
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await.clone();
        Self::save_to_path(&config, &self.path)
    }

    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    fn save_to_path(config: &Config, path: &Path) -> Result<()> {
        let config_yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration")?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let tmp_path = path.with_extension("yml.tmp");
        fs::write(&tmp_path, config_yaml).with_context(|| {
            format!("Failed to write temporary config to {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move config to {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        if config.version != 1 {
            bail!(
                "Unsupported config version {} in file: {}",
                config.version,
                path.display()
            );
        }

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
