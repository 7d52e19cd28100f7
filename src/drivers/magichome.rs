//! MagicHome (Zengge) controllers.
//!
//! Frame: `[7E, LEN, CMD, DATA.., EF]` where `LEN = len(DATA) + 1`.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    DriverDescriptor, LedDriver, ModeMap, basic_effect_modes, brightness_byte, clamp_byte,
    link::DriverLink, name_matches, uuid_matches,
};
use crate::transport::BleLink;

pub const WRITE_UUID: Uuid = Uuid::from_u128(0x0000ffe5_0000_1000_8000_00805f9b34fb);
pub const ALTERNATE_UUID: Uuid = Uuid::from_u128(0x0000ffe9_0000_1000_8000_00805f9b34fb);
pub const DEFAULT_SPEED: u8 = 0x20;

const START: u8 = 0x7E;
const END: u8 = 0xEF;
const UUID_FRAGMENTS: &[&str] = &["ffe5", "ffe9"];
const NAME_KEYWORDS: &[&str] = &["MAGIC", "MAGICHOME", "MH-"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// The trailing white channel is always zero.
    Color { r: u8, g: u8, b: u8 },
    Mode { id: u8, speed: u8 },
    Brightness(u8),
}

impl Command {
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Command::Color { r, g, b } => packet(0x05, &[r, g, b, 0x00]),
            Command::Mode { id, speed } => packet(0x04, &[id, speed, 0x00, 0x00]),
            Command::Brightness(level) => packet(0x03, &[level, 0x00, 0x00, 0x00]),
        }
    }
}

fn packet(cmd: u8, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 4);
    buf.extend_from_slice(&[START, (data.len() + 1) as u8, cmd]);
    buf.extend_from_slice(data);
    buf.push(END);
    buf
}

#[derive(Debug)]
pub struct MagicHomeDriver {
    link: DriverLink,
}

impl MagicHomeDriver {
    pub fn new() -> Self {
        Self {
            link: DriverLink::new(WRITE_UUID, Some(ALTERNATE_UUID), UUID_FRAGMENTS, DEFAULT_SPEED),
        }
    }
}

impl Default for MagicHomeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedDriver for MagicHomeDriver {
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
        &MagicHome
    }
}

pub struct MagicHome;

impl DriverDescriptor for MagicHome {
    fn protocol_name(&self) -> &'static str {
        "MagicHome"
    }

    fn can_handle_device(&self, name: Option<&str>, advertised: &[Uuid]) -> bool {
        name_matches(name, NAME_KEYWORDS) || uuid_matches(advertised, UUID_FRAGMENTS)
    }

    fn supported_modes(&self) -> ModeMap {
        basic_effect_modes()
    }

    fn create(&self) -> Arc<dyn LedDriver> {
        Arc::new(MagicHomeDriver::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeLink;
    use pretty_assertions::assert_eq;

    #[test]
    fn length_byte_counts_command() {
        assert_eq!(
            Command::Color { r: 9, g: 8, b: 7 }.to_bytes(),
            vec![0x7E, 0x05, 0x05, 9, 8, 7, 0x00, 0xEF]
        );
        assert_eq!(
            Command::Mode { id: 0x02, speed: 0x40 }.to_bytes(),
            vec![0x7E, 0x05, 0x04, 0x02, 0x40, 0x00, 0x00, 0xEF]
        );
        assert_eq!(
            Command::Brightness(255).to_bytes(),
            vec![0x7E, 0x05, 0x03, 0xFF, 0x00, 0x00, 0x00, 0xEF]
        );
    }

    #[tokio::test]
    async fn color_write_goes_to_primary() {
        let fake = FakeLink::connected(vec![]);
        let driver = MagicHomeDriver::new();
        driver.connect(fake.clone()).await;
        assert!(driver.set_color(-1, 256, 100).await);
        assert_eq!(
            fake.writes(),
            vec![(WRITE_UUID, vec![0x7E, 0x05, 0x05, 0x00, 0xFF, 100, 0x00, 0xEF])]
        );
    }

    #[tokio::test]
    async fn both_characteristics_failing_reports_false() {
        let fake = FakeLink::connected(vec![]);
        fake.reject(WRITE_UUID);
        fake.reject(ALTERNATE_UUID);
        let driver = MagicHomeDriver::new();
        driver.connect(fake.clone()).await;
        assert!(!driver.set_mode(0x01, 10).await);
        assert_eq!(driver.speed(), 10);
    }

    #[test]
    fn fingerprint() {
        assert!(MagicHome.can_handle_device(Some("MagicHome Strip"), &[]));
        assert!(MagicHome.can_handle_device(Some("mh-1234"), &[]));
        assert!(MagicHome.can_handle_device(None, &[ALTERNATE_UUID]));
        assert!(!MagicHome.can_handle_device(Some("LEDBLE"), &[]));
    }
}
