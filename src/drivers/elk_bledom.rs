//! ELK-BLEDOM: the most common cheap strip controller, and the catch-all protocol.
//!
//! Frame: `[7E, 07, 05, CMD, P1, P2, P3, SPEED, EF]`.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    DriverDescriptor, LedDriver, ModeMap, clamp_byte, link::DriverLink, name_matches, uuid_matches,
};
use crate::transport::BleLink;

pub const WRITE_UUID: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);
pub const DEFAULT_SPEED: u8 = 0x10;

const HEADER: [u8; 3] = [0x7E, 0x07, 0x05];
const FOOTER: u8 = 0xEF;
const CMD_COLOR: u8 = 0x03;
const CMD_MODE: u8 = 0x04;

const NAME_KEYWORDS: &[&str] = &["ELK", "BLEDOM"];
const UUID_FRAGMENTS: &[&str] = &["0000fff3-0000-1000-8000-00805f9b34fb"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Color { r: u8, g: u8, b: u8, speed: u8 },
    Mode { id: u8, speed: u8 },
}

impl Command {
    pub fn to_bytes(self) -> [u8; 9] {
        match self {
            Command::Color { r, g, b, speed } => frame(CMD_COLOR, r, g, b, speed),
            Command::Mode { id, speed } => frame(CMD_MODE, id, 0x00, 0x00, speed),
        }
    }
}

/// Builds one raw 9-byte frame.
pub fn frame(cmd: u8, p1: u8, p2: u8, p3: u8, speed: u8) -> [u8; 9] {
    [HEADER[0], HEADER[1], HEADER[2], cmd, p1, p2, p3, speed, FOOTER]
}

#[derive(Debug)]
pub struct ElkBledomDriver {
    link: DriverLink,
}

impl ElkBledomDriver {
    pub fn new() -> Self {
        Self {
            link: DriverLink::new(WRITE_UUID, None, &[], DEFAULT_SPEED),
        }
    }
}

impl Default for ElkBledomDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedDriver for ElkBledomDriver {
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
            speed: self.link.speed(),
        };
        self.link.write(&cmd.to_bytes()).await
    }

    /// No dedicated command; brightness is folded into RGB upstream.
    async fn set_brightness(&self, _percent: i32) -> bool {
        true
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
        &ElkBledom
    }
}

/// Descriptor and factory for [`ElkBledomDriver`].
pub struct ElkBledom;

impl DriverDescriptor for ElkBledom {
    fn protocol_name(&self) -> &'static str {
        "ELK-BLEDOM"
    }

    fn can_handle_device(&self, name: Option<&str>, advertised: &[Uuid]) -> bool {
        name_matches(name, NAME_KEYWORDS) || uuid_matches(advertised, UUID_FRAGMENTS)
    }

    fn supported_modes(&self) -> ModeMap {
        ModeMap::from([("MANUAL", 0x01), ("CPU", 0x02), ("BREATH", 0x03), ("RAINBOW", 0x04)])
    }

    fn create(&self) -> Arc<dyn LedDriver> {
        Arc::new(ElkBledomDriver::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeLink;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn frame_layout() {
        let bytes = frame(0x03, 1, 2, 3, 0x42);
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[..3], [0x7E, 0x07, 0x05]);
        assert_eq!(bytes[7], 0x42);
        assert_eq!(bytes[8], 0xEF);
    }

    #[test]
    fn mode_packet() {
        let bytes = Command::Mode { id: 0x03, speed: 0x10 }.to_bytes();
        assert_eq!(bytes, [0x7E, 0x07, 0x05, 0x04, 0x03, 0x00, 0x00, 0x10, 0xEF]);
    }

    #[tokio::test]
    async fn set_color_writes_clamped_frame_with_current_speed() {
        let fake = FakeLink::connected(vec![]);
        let driver = ElkBledomDriver::new();
        assert!(driver.connect(fake.clone()).await);

        assert!(driver.set_color(300, -20, 128).await);

        assert_eq!(
            fake.writes(),
            vec![(WRITE_UUID, vec![0x7E, 0x07, 0x05, 0x03, 0xFF, 0x00, 0x80, 0x10, 0xEF])]
        );
    }

    #[tokio::test]
    async fn set_mode_with_speed_updates_remembered_speed() {
        let fake = FakeLink::connected(vec![]);
        let driver = ElkBledomDriver::new();
        driver.connect(fake.clone()).await;

        assert!(driver.set_mode(0x04, 0x30).await);
        assert!(driver.set_mode(0x01, 0).await);

        let packets = fake.packets();
        assert_eq!(packets[0][7], 0x30);
        assert_eq!(packets[1][4], 0x01);
        assert_eq!(packets[1][7], 0x30);
    }

    #[tokio::test]
    async fn brightness_is_noop_success() {
        let fake = FakeLink::connected(vec![]);
        let driver = ElkBledomDriver::new();
        driver.connect(fake.clone()).await;
        assert!(driver.set_brightness(40).await);
        assert_eq!(fake.write_count(), 0);
    }

    #[tokio::test]
    async fn commands_fail_after_disconnect() {
        let fake = FakeLink::connected(vec![]);
        let driver = ElkBledomDriver::new();
        driver.connect(fake).await;
        driver.disconnect().await;
        driver.disconnect().await;
        assert!(!driver.set_color(1, 2, 3).await);
    }

    #[test]
    fn fingerprint() {
        assert!(ElkBledom.can_handle_device(Some("ELK-BLEDOM  "), &[]));
        assert!(ElkBledom.can_handle_device(None, &[WRITE_UUID]));
        assert!(!ElkBledom.can_handle_device(Some("Strip"), &[]));
    }

    proptest! {
        #[test]
        fn color_payload_is_always_clamped(r in any::<i32>(), g in any::<i32>(), b in any::<i32>()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let fake = FakeLink::connected(vec![]);
            let driver = ElkBledomDriver::new();
            rt.block_on(async {
                driver.connect(fake.clone()).await;
                driver.set_color(r, g, b).await;
            });
            let packet = &fake.packets()[0];
            prop_assert_eq!(i32::from(packet[4]), r.clamp(0, 255));
            prop_assert_eq!(i32::from(packet[5]), g.clamp(0, 255));
            prop_assert_eq!(i32::from(packet[6]), b.clamp(0, 255));
        }
    }
}
