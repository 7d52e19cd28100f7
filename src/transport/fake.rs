//! Scripted in-memory transport for driving drivers and the supervisor in tests.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Advertisement, BleCentral, BleLink, TransportError};

/// Link that records every write.
#[derive(Debug, Default)]
pub struct FakeLink {
    connected: AtomicBool,
    characteristics: Vec<Uuid>,
    rejected: Mutex<HashSet<Uuid>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    rssi: Mutex<Option<i16>>,
    fail_rssi: AtomicBool,
}

impl FakeLink {
    pub fn connected(characteristics: Vec<Uuid>) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            characteristics,
            ..Default::default()
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Writes to `uuid` fail from now on.
    pub fn reject(&self, uuid: Uuid) {
        self.rejected.lock().unwrap().insert(uuid);
    }

    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn set_rssi(&self, rssi: Option<i16>) {
        *self.rssi.lock().unwrap() = rssi;
    }

    pub fn fail_rssi(&self) {
        self.fail_rssi.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|(_, data)| data).collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl BleLink for FakeLink {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn characteristics(&self) -> Vec<Uuid> {
        self.characteristics.clone()
    }

    async fn write_characteristic(&self, uuid: Uuid, data: &[u8], _require_ack: bool) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!(TransportError::NotConnected);
        }
        if self.rejected.lock().unwrap().contains(&uuid) {
            bail!(TransportError::CharacteristicNotFound(uuid));
        }
        self.writes.lock().unwrap().push((uuid, data.to_vec()));
        Ok(())
    }

    async fn read_signal_strength(&self) -> Result<Option<i16>> {
        if self.fail_rssi.load(Ordering::SeqCst) {
            bail!("RSSI not available");
        }
        Ok(*self.rssi.lock().unwrap())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Outcome of one scripted connect attempt.
pub enum ConnectOutcome {
    Link(Arc<FakeLink>),
    Fail(TransportError),
    Message(String),
}

/// Central whose discovery and connect results are scripted up front.
///
/// When the connect script runs dry every further attempt reconnects `fallback`.
pub struct FakeCentral {
    devices: Mutex<Vec<Advertisement>>,
    by_address: bool,
    script: Mutex<VecDeque<ConnectOutcome>>,
    fallback: Arc<FakeLink>,
    connect_times: Mutex<Vec<Instant>>,
    scans: Mutex<usize>,
}

impl FakeCentral {
    pub fn new(devices: Vec<Advertisement>, fallback: Arc<FakeLink>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            by_address: true,
            script: Mutex::new(VecDeque::new()),
            fallback,
            connect_times: Mutex::new(Vec::new()),
            scans: Mutex::new(0),
        })
    }

    /// Central that never answers address lookups, only scans.
    pub fn scan_only(devices: Vec<Advertisement>, fallback: Arc<FakeLink>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            by_address: false,
            script: Mutex::new(VecDeque::new()),
            fallback,
            connect_times: Mutex::new(Vec::new()),
            scans: Mutex::new(0),
        })
    }

    pub fn push(&self, outcome: ConnectOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_devices(&self, devices: Vec<Advertisement>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().unwrap().clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_times.lock().unwrap().len()
    }

    pub fn scans(&self) -> usize {
        *self.scans.lock().unwrap()
    }
}

#[async_trait]
impl BleCentral for FakeCentral {
    async fn find_by_address(&self, address: &str, _timeout: Duration) -> Result<Option<Advertisement>> {
        if !self.by_address {
            return Ok(None);
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(address))
            .cloned())
    }

    async fn scan(&self, _timeout: Duration) -> Result<Vec<Advertisement>> {
        *self.scans.lock().unwrap() += 1;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn connect(&self, _device: &Advertisement, _timeout: Duration) -> Result<Arc<dyn BleLink>> {
        self.connect_times.lock().unwrap().push(Instant::now());
        let outcome = self.script.lock().unwrap().pop_front();
        match outcome {
            Some(ConnectOutcome::Link(link)) => Ok(link as Arc<dyn BleLink>),
            Some(ConnectOutcome::Fail(err)) => Err(err.into()),
            Some(ConnectOutcome::Message(msg)) => bail!(msg),
            None => {
                self.fallback.connected.store(true, Ordering::SeqCst);
                Ok(self.fallback.clone() as Arc<dyn BleLink>)
            }
        }
    }
}

pub fn advertisement(address: &str, name: &str) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        name: Some(name.to_string()),
        services: Vec::new(),
        rssi: Some(-60),
    }
}
