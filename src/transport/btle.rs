use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral},
};
use log::{debug, info};
use tokio::time::{Instant, sleep, timeout};
use uuid::Uuid;

use super::{Advertisement, BleCentral, BleLink, TransportError};

const ADDRESS_POLL: Duration = Duration::from_millis(250);

/// [`BleCentral`] on top of the first adapter btleplug reports.
pub struct BtleCentral {
    adapter: Adapter,
}

impl BtleCentral {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .context("Failed to initialize BLE manager")?;
        let adapter = manager
            .adapters()
            .await
            .context("Failed to list BLE adapters")?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        if let Ok(name) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {name}");
        }
        Ok(Self { adapter })
    }

    async fn peripheral_by_address(&self, address: &str) -> Result<Option<Peripheral>> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {e}");
        }
    }
}

#[async_trait]
impl BleCentral for BtleCentral {
    async fn find_by_address(&self, address: &str, wait: Duration) -> Result<Option<Advertisement>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .context("Failed to start scan")?;

        let deadline = Instant::now() + wait;
        let found = loop {
            if let Some(p) = self.peripheral_by_address(address).await? {
                break Some(advertisement(&p).await);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(ADDRESS_POLL).await;
        };

        self.stop_scan().await;
        Ok(found)
    }

    async fn scan(&self, wait: Duration) -> Result<Vec<Advertisement>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .context("Failed to start scan")?;
        sleep(wait).await;

        let peripherals = self.adapter.peripherals().await;
        self.stop_scan().await;

        let mut seen = Vec::new();
        for p in peripherals? {
            seen.push(advertisement(&p).await);
        }
        Ok(seen)
    }

    async fn connect(&self, device: &Advertisement, wait: Duration) -> Result<Arc<dyn BleLink>> {
        let peripheral = self
            .peripheral_by_address(&device.address)
            .await?
            .ok_or_else(|| TransportError::DeviceNotFound(device.address.clone()))?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            timeout(wait, peripheral.connect())
                .await
                .map_err(|_| TransportError::Timeout)?
                .with_context(|| format!("Failed to connect to {}", device.display_name()))?;
        }
        timeout(wait, peripheral.discover_services())
            .await
            .map_err(|_| TransportError::Timeout)?
            .context("Service discovery failed")?;

        let link: Arc<dyn BleLink> = Arc::new(BtleLink { peripheral });
        Ok(link)
    }
}

/// [`BleLink`] over a connected btleplug peripheral.
pub struct BtleLink {
    peripheral: Peripheral,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl BleLink for BtleLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn characteristics(&self) -> Vec<Uuid> {
        self.peripheral
            .characteristics()
            .into_iter()
            .map(|c| c.uuid)
            .collect()
    }

    async fn write_characteristic(&self, uuid: Uuid, data: &[u8], require_ack: bool) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        let kind = if require_ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(&characteristic, data, kind)
            .await
            .with_context(|| format!("Write to {uuid} failed"))
    }

    async fn read_signal_strength(&self) -> Result<Option<i16>> {
        let properties = self.peripheral.properties().await?;
        Ok(properties.and_then(|p| p.rssi))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .context("Failed to disconnect")
    }
}

async fn advertisement(p: &Peripheral) -> Advertisement {
    let properties = p.properties().await.ok().flatten();
    Advertisement {
        address: p.address().to_string(),
        name: properties.as_ref().and_then(|props| props.local_name.clone()),
        services: properties
            .as_ref()
            .map(|props| props.services.clone())
            .unwrap_or_default(),
        rssi: properties.and_then(|props| props.rssi),
    }
}
