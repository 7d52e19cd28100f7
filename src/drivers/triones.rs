//! Triones (HappyLighting family) controllers.
//!
//! Frame: `[56, AA, CMD, P1, P2, P3, AA, AA]`.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    DriverDescriptor, LedDriver, ModeMap, basic_effect_modes, brightness_byte, clamp_byte,
    link::DriverLink, name_matches, uuid_matches,
};
use crate::transport::BleLink;

pub const WRITE_UUID: Uuid = Uuid::from_u128(0x0000ffd9_0000_1000_8000_00805f9b34fb);
pub const ALTERNATE_UUID: Uuid = Uuid::from_u128(0x0000ffd5_0000_1000_8000_00805f9b34fb);
pub const DEFAULT_SPEED: u8 = 0x20;

const UUID_FRAGMENTS: &[&str] = &["ffd9", "ffd5"];
const NAME_KEYWORDS: &[&str] = &["TRIONES", "TRION"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Color { r: u8, g: u8, b: u8 },
    Mode { id: u8, speed: u8 },
    Brightness(u8),
}

impl Command {
    pub fn to_bytes(self) -> [u8; 8] {
        let (cmd, p1, p2, p3) = match self {
            Command::Color { r, g, b } => (0x01, r, g, b),
            Command::Mode { id, speed } => (0x04, id, speed, 0x00),
            Command::Brightness(level) => (0x05, level, 0x00, 0x00),
        };
        [0x56, 0xAA, cmd, p1, p2, p3, 0xAA, 0xAA]
    }
}

#[derive(Debug)]
pub struct TrionesDriver {
    link: DriverLink,
}

impl TrionesDriver {
    pub fn new() -> Self {
        Self {
            link: DriverLink::new(WRITE_UUID, Some(ALTERNATE_UUID), UUID_FRAGMENTS, DEFAULT_SPEED),
        }
    }
}

impl Default for TrionesDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedDriver for TrionesDriver {
    async fn connect(&self, link: Arc<dyn BleLink>) -> bool {
        self.link.bind(link).await
    }

    async fn disconnect(&self) {
        self.link.release();
    }

    async fn set_color(&self, r: i32, g: i32, b: i32) -> bool {
        let cmd = Command::Color {
            r: clamp_byte(r),
            g: clamp_byte(g),
            b: clamp_byte(b),
        };
        self.link.write(&cmd.to_bytes()).await
    }

    async fn set_brightness(&self, percent: i32) -> bool {
        let cmd = Command::Brightness(brightness_byte(percent));
        self.link.write(&cmd.to_bytes()).await
    }

    async fn set_mode(&self, mode_id: u8, speed: i32) -> bool {
        let speed = self.link.remember_speed(speed);
        self.link
            .write(&Command::Mode { id: mode_id, speed }.to_bytes())
            .await
    }

    fn set_speed(&self, speed: i32) {
        self.link.set_speed(speed);
    }

    fn speed(&self) -> u8 {
        self.link.speed()
    }

    fn write_characteristic_uuid(&self) -> Uuid {
        self.link.primary()
    }

    fn descriptor(&self) -> &'static dyn DriverDescriptor {
        &Triones
    }
}

pub struct Triones;

impl DriverDescriptor for Triones {
    fn protocol_name(&self) -> &'static str {
        "Triones"
    }

    fn can_handle_device(&self, name: Option<&str>, advertised: &[Uuid]) -> bool {
        name_matches(name, NAME_KEYWORDS) || uuid_matches(advertised, UUID_FRAGMENTS)
    }

    fn supported_modes(&self) -> ModeMap {
        basic_effect_modes()
    }

    fn create(&self) -> Arc<dyn LedDriver> {
        Arc::new(TrionesDriver::new())
    }
}
