use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
};

use log::debug;
use uuid::Uuid;

use crate::{drivers::clamp_byte, transport::BleLink};

/// Link state every driver carries: the bound handle, the characteristic
/// actually in use and the remembered effect speed.
///
/// Writes go to the active characteristic first; on failure the alternate
/// characteristic is tried once and becomes active if it succeeds.
pub struct DriverLink {
    primary: Uuid,
    alternate: Option<Uuid>,
    probe: &'static [&'static str],
    link: Mutex<Option<Arc<dyn BleLink>>>,
    active: Mutex<Option<Uuid>>,
    speed: AtomicU8,
}

impl DriverLink {
    /// `probe` lists UUID fragments searched for in the characteristic list on bind.
    pub fn new(
        primary: Uuid,
        alternate: Option<Uuid>,
        probe: &'static [&'static str],
        default_speed: u8,
    ) -> Self {
        Self {
            primary,
            alternate,
            probe,
            link: Mutex::new(None),
            active: Mutex::new(None),
            speed: AtomicU8::new(default_speed),
        }
    }

    pub async fn bind(&self, link: Arc<dyn BleLink>) -> bool {
        if !link.is_connected().await {
            return false;
        }

        let discovered = if self.probe.is_empty() {
            None
        } else {
            link.characteristics().await.into_iter().find(|uuid| {
                let text = uuid.to_string();
                self.probe.iter().any(|fragment| text.contains(fragment))
            })
        };
        if let Some(uuid) = discovered {
            debug!("Using discovered write characteristic {uuid}");
        }

        *lock(&self.active) = Some(discovered.unwrap_or(self.primary));
        *lock(&self.link) = Some(link);
        true
    }

    pub fn release(&self) {
        lock(&self.link).take();
        lock(&self.active).take();
    }

    pub fn primary(&self) -> Uuid {
        self.primary
    }

    /// Characteristic the next write goes to.
    pub fn active_uuid(&self) -> Uuid {
        lock(&self.active).unwrap_or(self.primary)
    }

    pub fn speed(&self) -> u8 {
        self.speed.load(Ordering::Acquire)
    }

    pub fn set_speed(&self, speed: i32) {
        self.speed.store(clamp_byte(speed), Ordering::Release);
    }

    /// Applies the "positive speed overrides" rule of mode commands.
    pub fn remember_speed(&self, speed: i32) -> u8 {
        if speed > 0 {
            self.set_speed(speed);
        }
        self.speed()
    }

    /// Fire-and-forget write with alternate-characteristic fallback.
    pub async fn write(&self, packet: &[u8]) -> bool {
        let Some(link) = lock(&self.link).clone() else {
            return false;
        };
        if !link.is_connected().await {
            return false;
        }

        let uuid = self.active_uuid();
        let err = match link.write_characteristic(uuid, packet, false).await {
            Ok(()) => return true,
            Err(e) => e,
        };

        match self.alternate.filter(|alt| *alt != uuid) {
            Some(alt) => {
                debug!("Write to {uuid} failed ({err:#}), retrying on {alt}");
                *lock(&self.active) = Some(alt);
                match link.write_characteristic(alt, packet, false).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Write to {alt} failed: {e:#}");
                        false
                    }
                }
            }
            None => {
                debug!("Write to {uuid} failed: {err:#}");
                false
            }
        }
    }
}

impl fmt::Debug for DriverLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverLink")
            .field("active", &self.active_uuid())
            .field("bound", &lock(&self.link).is_some())
            .field("speed", &self.speed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockBleLink, fake::FakeLink};
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    const PRIMARY: Uuid = Uuid::from_u128(0x0000ffd9_0000_1000_8000_00805f9b34fb);
    const ALTERNATE: Uuid = Uuid::from_u128(0x0000ffd5_0000_1000_8000_00805f9b34fb);

    fn driver_link() -> DriverLink {
        DriverLink::new(PRIMARY, Some(ALTERNATE), &["ffd9", "ffd5"], 0x20)
    }

    #[tokio::test]
    async fn bind_refuses_disconnected_link() {
        let link = driver_link();
        assert!(!link.bind(FakeLink::offline()).await);
        assert!(!link.write(&[1, 2, 3]).await);
    }

    #[tokio::test]
    async fn bind_probes_characteristics() {
        let link = driver_link();
        assert!(link.bind(FakeLink::connected(vec![ALTERNATE])).await);
        assert_eq!(link.active_uuid(), ALTERNATE);
    }

    #[tokio::test]
    async fn failed_write_switches_to_alternate() {
        let mut mock = MockBleLink::new();
        mock.expect_is_connected().returning(|| true);
        mock.expect_characteristics().returning(Vec::new);
        mock.expect_write_characteristic()
            .withf(|uuid, _, ack| *uuid == PRIMARY && !ack)
            .times(1)
            .returning(|_, _, _| Err(anyhow!("write rejected")));
        mock.expect_write_characteristic()
            .withf(|uuid, _, _| *uuid == ALTERNATE)
            .times(2)
            .returning(|_, _, _| Ok(()));

        let link = driver_link();
        assert!(link.bind(Arc::new(mock)).await);
        assert!(link.write(&[0x56]).await);
        assert_eq!(link.active_uuid(), ALTERNATE);
        assert!(link.write(&[0x56]).await);
    }

    #[tokio::test]
    async fn without_alternate_a_failed_write_is_false() {
        let fake = FakeLink::connected(vec![]);
        fake.reject(PRIMARY);
        let link = DriverLink::new(PRIMARY, None, &[], 0x10);
        assert!(link.bind(fake.clone()).await);
        assert!(!link.write(&[0x7E]).await);
        assert_eq!(fake.write_count(), 0);
    }

    #[tokio::test]
    async fn release_unbinds() {
        let link = driver_link();
        link.bind(FakeLink::connected(vec![])).await;
        link.release();
        link.release();
        assert!(!link.write(&[1]).await);
        assert_eq!(link.active_uuid(), PRIMARY);
    }

    #[test]
    fn speed_rules() {
        let link = driver_link();
        assert_eq!(link.remember_speed(0), 0x20);
        assert_eq!(link.remember_speed(-4), 0x20);
        assert_eq!(link.remember_speed(300), 255);
        link.set_speed(-1);
        assert_eq!(link.speed(), 0);
    }
}
