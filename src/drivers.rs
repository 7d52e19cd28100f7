//! Protocol drivers for BLE LED controllers.
//!
//! Each vendor module encodes one packet format behind [`LedDriver`]; the
//! stateless side of a protocol (fingerprinting, mode table, factory) lives
//! in its [`DriverDescriptor`].

pub mod elk_bledom;
pub mod link;
pub mod magichome;
pub mod registry;
pub mod triones;
pub mod tuya;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{color::Mode, transport::BleLink};

pub use registry::DriverRegistry;

/// Mode name to vendor mode id. Always covers MANUAL, CPU, BREATH and RAINBOW.
pub type ModeMap = BTreeMap<&'static str, u8>;

/// Per-connection device control contract shared by every protocol.
///
/// Operations report failure as `false` and never surface transport
/// errors; the caller owns the retry policy.
#[async_trait]
pub trait LedDriver: Send + Sync + fmt::Debug {
    /// Binds a live link. Returns `false` if the link is not connected.
    async fn connect(&self, link: Arc<dyn BleLink>) -> bool;

    /// Releases the bound link. Idempotent.
    async fn disconnect(&self);

    /// Channels are clamped to `0..=255` before encoding.
    async fn set_color(&self, r: i32, g: i32, b: i32) -> bool;

    /// `percent` is clamped to `0..=100`.
    async fn set_brightness(&self, percent: i32) -> bool;

    /// A positive `speed` replaces the remembered speed before the packet is built.
    async fn set_mode(&self, mode_id: u8, speed: i32) -> bool;

    /// Stores the speed used by later packets without writing anything.
    fn set_speed(&self, speed: i32);

    fn speed(&self) -> u8;

    fn write_characteristic_uuid(&self) -> Uuid;

    fn descriptor(&self) -> &'static dyn DriverDescriptor;

    fn protocol_name(&self) -> &'static str {
        self.descriptor().protocol_name()
    }

    fn supported_modes(&self) -> ModeMap {
        self.descriptor().supported_modes()
    }
}

/// Instance-free side of a protocol, also acting as its driver factory.
pub trait DriverDescriptor: Send + Sync {
    fn protocol_name(&self) -> &'static str;

    /// Case-insensitive name keyword match, or a UUID fragment match.
    fn can_handle_device(&self, name: Option<&str>, advertised: &[Uuid]) -> bool;

    fn supported_modes(&self) -> ModeMap;

    fn create(&self) -> Arc<dyn LedDriver>;
}

impl fmt::Debug for dyn DriverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol_name())
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Unknown protocol: {name}. Available: {}", available.join(", "))]
    UnknownProtocol { name: String, available: Vec<String> },
    #[error("Could not detect protocol for device: {0}. Please specify protocol in configuration.")]
    DetectionFailed(String),
}

/// Looks up the vendor id for `mode`.
pub fn mode_id(modes: &ModeMap, mode: Mode) -> Option<u8> {
    modes.get(mode.as_str()).copied()
}

/// Maps a `0..=100` percentage to a byte, flooring.
pub fn brightness_byte(percent: i32) -> u8 {
    (f64::from(percent.clamp(0, 100)) / 100.0 * 255.0) as u8
}

/// Clamps any integer to `0..=255`.
pub fn clamp_byte(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

pub(crate) fn name_matches(name: Option<&str>, keywords: &[&str]) -> bool {
    name.map(str::to_uppercase)
        .is_some_and(|upper| keywords.iter().any(|k| upper.contains(k)))
}

pub(crate) fn uuid_matches(advertised: &[Uuid], fragments: &[&str]) -> bool {
    advertised.iter().any(|uuid| {
        let text = uuid.to_string();
        fragments.iter().any(|f| text.contains(f))
    })
}

/// Mode table shared by the vendors with the STATIC/JUMP/FADE/FLASH set.
pub(crate) fn basic_effect_modes() -> ModeMap {
    const STATIC: u8 = 0x01;
    const JUMP: u8 = 0x02;
    const FADE: u8 = 0x03;
    const FLASH: u8 = 0x04;

    ModeMap::from([
        ("MANUAL", STATIC),
        ("STATIC", STATIC),
        ("JUMP", JUMP),
        ("FADE", FADE),
        ("FLASH", FLASH),
        ("CPU", FADE),
        ("BREATH", FADE),
        ("RAINBOW", JUMP),
    ])
}

/// The driver bound to the current connection, if any.
///
/// Written by the supervisor, read by the control plane for out-of-band
/// commands.
#[derive(Debug, Default)]
pub struct ActiveDriver(RwLock<Option<Arc<dyn LedDriver>>>);

impl ActiveDriver {
    pub fn get(&self) -> Option<Arc<dyn LedDriver>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, driver: Arc<dyn LedDriver>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(driver);
    }

    pub fn clear(&self) -> Option<Arc<dyn LedDriver>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn brightness_byte_floors() {
        assert_eq!(brightness_byte(0), 0);
        assert_eq!(brightness_byte(50), 127);
        assert_eq!(brightness_byte(100), 255);
        assert_eq!(brightness_byte(150), 255);
        assert_eq!(brightness_byte(-3), 0);
    }

    #[test]
    fn basic_modes_cover_every_effect() {
        let modes = basic_effect_modes();
        for mode in Mode::ALL {
            assert!(mode_id(&modes, mode).is_some(), "{mode} missing");
        }
        assert_eq!(mode_id(&modes, Mode::Breath), Some(0x03));
        assert_eq!(mode_id(&modes, Mode::Rainbow), Some(0x02));
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        assert!(name_matches(Some("my triones strip"), &["TRIONES"]));
        assert!(!name_matches(None, &["TRIONES"]));
        assert!(!name_matches(Some("other"), &["TRIONES"]));
    }

    #[test]
    fn unknown_protocol_lists_alternatives() {
        let err = DriverError::UnknownProtocol {
            name: "hue".into(),
            available: vec!["elk".into(), "tuya".into()],
        };
        assert_eq!(err.to_string(), "Unknown protocol: hue. Available: elk, tuya");
    }
}
