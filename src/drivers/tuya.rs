//! Tuya BLE lights, unauthenticated packet variant only.
//!
//! Frame: `[CMD, LEN, DATA..]`. Genuine Tuya firmware usually expects an
//! encrypted session; those devices will ignore these packets.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    DriverDescriptor, LedDriver, ModeMap, basic_effect_modes, brightness_byte, clamp_byte,
    link::DriverLink, name_matches, uuid_matches,
};
use crate::transport::BleLink;

pub const WRITE_UUID: Uuid = Uuid::from_u128(0x0000fe95_0000_1000_8000_00805f9b34fb);
pub const ALTERNATE_UUID: Uuid = Uuid::from_u128(0x0000fe40_0000_1000_8000_00805f9b34fb);
pub const DEFAULT_SPEED: u8 = 0x20;

const UUID_FRAGMENTS: &[&str] = &["fe95", "fe40"];
const NAME_KEYWORDS: &[&str] = &["TUYA", "TY-", "SMART LIFE", "SMARTLIFE"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Color { r: u8, g: u8, b: u8 },
    Mode { id: u8, speed: u8 },
    Brightness(u8),
}

impl Command {
    pub fn to_bytes(self) -> Vec<u8> {
        let (cmd, data) = match self {
            Command::Color { r, g, b } => (0x01, vec![r, g, b]),
            Command::Mode { id, speed } => (0x02, vec![id, speed]),
            Command::Brightness(level) => (0x03, vec![level]),
        };
        let mut buf = Vec::with_capacity(data.len() + 2);
        buf.push(cmd);
        buf.push(data.len() as u8);
        buf.extend(data);
        buf
    }
}

#[derive(Debug)]
pub struct TuyaDriver {
    link: DriverLink,
}

impl TuyaDriver {
    pub fn new() -> Self {
        Self {
            link: DriverLink::new(WRITE_UUID, Some(ALTERNATE_UUID), UUID_FRAGMENTS, DEFAULT_SPEED),
        }
    }
}

impl Default for TuyaDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedDriver for TuyaDriver {
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
        self.link
            .write(&Command::Brightness(brightness_byte(percent)).to_bytes())
            .await
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
        &Tuya
    }
}

pub struct Tuya;

impl DriverDescriptor for Tuya {
    fn protocol_name(&self) -> &'static str {
        "Tuya"
    }

    fn can_handle_device(&self, name: Option<&str>, advertised: &[Uuid]) -> bool {
        name_matches(name, NAME_KEYWORDS) || uuid_matches(advertised, UUID_FRAGMENTS)
    }

    fn supported_modes(&self) -> ModeMap {
        basic_effect_modes()
    }

    fn create(&self) -> Arc<dyn LedDriver> {
        Arc::new(TuyaDriver::new())
    }
}
