//! BLE connection lifecycle: search, connect, communicate, recover.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    backoff::Backoff,
    config::{ConfigManager, ConnectionCfg, DeviceCfg, secs},
    drivers::{ActiveDriver, DriverDescriptor, DriverRegistry, LedDriver, elk_bledom::ElkBledom},
    effects::{EffectContext, EffectEngine},
    intent::ControlIntent,
    status::{MAX_ERROR_LEN, StatusCategory, StatusHub, TIMEOUT_MESSAGE, truncate},
    telemetry::CpuSampler,
    transport::{Advertisement, BleCentral, BleLink, FailureKind, TransportError, classify_failure},
};

/// Why a connected session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    UserDisconnect,
}

/// Owns the single BLE connection and runs the
/// `SEARCHING -> CONNECTING -> CONNECTED -> COMMUNICATING -> SEARCHING` cycle
/// until cancelled.
///
/// Every failure re-enters the cycle. Connection failures sleep on the
/// backoff. The backoff resets on entering CONNECTED, not when the device
/// is merely seen, so repeated connect timeouts against a visible device
/// keep growing the delay. Discovery misses sleep a fixed delay and
/// escalate to a cool-down.
pub struct ConnectionSupervisor {
    config: Arc<ConfigManager>,
    central: Arc<dyn BleCentral>,
    registry: Arc<DriverRegistry>,
    intent: Arc<ControlIntent>,
    status: Arc<StatusHub>,
    active: Arc<ActiveDriver>,
    cpu: Arc<dyn CpuSampler>,
    conn: ConnectionCfg,
    auto_reconnect: bool,
    backoff: Backoff,
    misses: u32,
    effects: EffectEngine,
}

impl ConnectionSupervisor {
    pub fn new(
        config: Arc<ConfigManager>,
        central: Arc<dyn BleCentral>,
        registry: Arc<DriverRegistry>,
        intent: Arc<ControlIntent>,
        status: Arc<StatusHub>,
        active: Arc<ActiveDriver>,
        cpu: Arc<dyn CpuSampler>,
    ) -> Self {
        let conn = ConnectionCfg::default();
        Self {
            backoff: Backoff::new(5.0, conn.backoff_factor, conn.backoff_max),
            config,
            central,
            registry,
            intent,
            status,
            active,
            cpu,
            conn,
            auto_reconnect: true,
            misses: 0,
            effects: EffectEngine::new(),
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.config_manager.clone(),
            state.central.clone(),
            state.registry.clone(),
            state.intent.clone(),
            state.status.clone(),
            state.active_driver.clone(),
            state.cpu.clone(),
        )
    }

    /// Runs until `cancel` fires. Never fails on device errors.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.load_settings().await;
        info!("Connection supervisor started");

        while !cancel.is_cancelled() {
            self.cycle(&cancel).await;
        }

        if let Some(driver) = self.active.clear() {
            driver.disconnect().await;
        }
        self.status.update("Stopped", StatusCategory::Idle, |s| {
            s.connected = false;
        });
        info!("Connection supervisor stopped");
        Ok(())
    }

    async fn load_settings(&mut self) {
        let config = self.config.get().await;
        self.conn = config.connection.clone();
        self.auto_reconnect = config.preferences.auto_reconnect;
        self.backoff = Backoff::new(
            config.preferences.reconnect_interval,
            self.conn.backoff_factor,
            self.conn.backoff_max,
        );
    }

    async fn cycle(&mut self, cancel: &CancellationToken) {
        if self.intent.take_disconnect_request() {
            debug!("Ignoring disconnect request while not connected");
        }
        let device_cfg = self.config.get().await.device.clone();

        self.status.update("Device search...", StatusCategory::Scanning, |s| {
            s.connected = false;
        });
        debug!("Scanning for BLE device...");

        let Some(found) = until_cancelled(cancel, self.discover(&device_cfg)).await else {
            return;
        };
        let Some(device) = found else {
            self.on_discovery_miss(cancel).await;
            return;
        };
        self.misses = 0;

        let driver = self.resolve_driver(&device_cfg, &device).await;
        match self.connect_and_communicate(&device, driver, cancel).await {
            Ok(SessionEnd::Cancelled) => {}
            Ok(SessionEnd::UserDisconnect) => {
                info!("Disconnected from {} on request", device.display_name());
                self.status
                    .update("Disconnected by user", StatusCategory::Idle, |s| {
                        s.connected = false;
                        s.signal_strength = None;
                    });
                pause(cancel, secs(self.conn.disconnect_pause)).await;
            }
            Err(e) => self.recover(e, cancel).await,
        }
    }

    /// Address lookup first, then a scan filtered by name fragments.
    async fn discover(&self, device: &DeviceCfg) -> Option<Advertisement> {
        let wait = secs(self.conn.scan_timeout);

        if let Some(address) = device.address.as_deref().filter(|a| !a.trim().is_empty()) {
            match self.central.find_by_address(address, wait).await {
                Ok(Some(found)) => {
                    info!("Found device by MAC: {}", found.display_name());
                    return Some(found);
                }
                Ok(None) => debug!("Device {address} not seen"),
                Err(e) => debug!("Device lookup by MAC failed: {e:#}"),
            }
        }

        let devices = match self.central.scan(wait).await {
            Ok(devices) => devices,
            Err(e) => {
                debug!("Device discovery error: {e:#}");
                return None;
            }
        };
        let found = devices.into_iter().find(|d| {
            d.name.as_deref().is_some_and(|name| {
                let upper = name.to_uppercase();
                self.conn
                    .name_filters
                    .iter()
                    .any(|f| upper.contains(&f.to_uppercase()))
            })
        })?;
        info!("Found device by name scan: {}", found.display_name());
        Some(found)
    }

    async fn on_discovery_miss(&mut self, cancel: &CancellationToken) {
        self.misses += 1;
        if self.misses > self.conn.max_discovery_misses {
            warn!(
                "Device not found after {} attempts, cooling down",
                self.misses - 1
            );
            self.status.update(
                "Device not found (max retries)",
                StatusCategory::Error,
                |s| s.connected = false,
            );
            self.misses = 0;
            pause(cancel, secs(self.conn.discovery_cooldown)).await;
        } else {
            debug!("Device not found ({} consecutive misses)", self.misses);
            pause(cancel, secs(self.conn.discovery_retry_delay)).await;
        }
    }

    /// Explicit protocol wins over detection; any failure falls back to ELK-BLEDOM.
    async fn resolve_driver(&self, device_cfg: &DeviceCfg, device: &Advertisement) -> Arc<dyn LedDriver> {
        let resolved = match device_cfg.explicit_protocol() {
            Some(protocol) => self.registry.create(protocol),
            None => self.registry.detect(device),
        };

        let driver = match resolved {
            Ok(driver) => {
                self.backfill_write_uuid(driver.as_ref()).await;
                driver
            }
            Err(e) => {
                error!("Failed to initialize driver: {e}");
                warn!("Falling back to ELK-BLEDOM driver");
                ElkBledom.create()
            }
        };
        driver.set_speed(self.intent.speed().into());
        driver
    }

    async fn backfill_write_uuid(&self, driver: &dyn LedDriver) {
        let mut config = self.config.get_mut().await;
        let missing = config
            .device
            .write_uuid
            .as_deref()
            .is_none_or(|uuid| uuid.trim().is_empty());
        if missing {
            let uuid = driver.write_characteristic_uuid().to_string();
            debug!("Using driver UUID: {uuid}");
            config.device.write_uuid = Some(uuid);
        }
    }

    async fn connect_and_communicate(
        &mut self,
        device: &Advertisement,
        driver: Arc<dyn LedDriver>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let name = device.display_name().to_string();
        self.status.update(
            &format!("Connecting to {name}..."),
            StatusCategory::Connecting,
            |_| {},
        );

        let connect = self.central.connect(device, secs(self.conn.connect_timeout));
        let Some(link) = until_cancelled(cancel, connect).await else {
            return Ok(SessionEnd::Cancelled);
        };
        let link = link.with_context(|| format!("Failed to connect to {name}"))?;

        if !driver.connect(link.clone()).await {
            release(&link).await;
            return Err(anyhow!(TransportError::NotConnected))
                .with_context(|| format!("{} driver rejected the link", driver.protocol_name()));
        }

        self.active.set(driver.clone());
        self.backoff.reset();
        let mode = self.intent.mode();
        self.status
            .update("Connected", StatusCategory::Connected, |s| {
                s.connected = true;
                s.device_name = device.name.clone().unwrap_or_else(|| "Unknown Device".into());
                s.signal_strength = device.rssi;
                s.error = None;
                s.mode = mode;
            });
        info!("Connected to {name} using {}", driver.protocol_name());

        let outcome = self.communicate(driver.as_ref(), link.as_ref(), cancel).await;

        self.active.clear();
        driver.disconnect().await;
        release(&link).await;
        outcome
    }

    async fn communicate(
        &mut self,
        driver: &dyn LedDriver,
        link: &dyn BleLink,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let rssi_every = secs(self.conn.rssi_interval);
        let poll = self.conn.poll_interval();
        let mut last_rssi: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(SessionEnd::Cancelled);
            }
            if self.intent.take_disconnect_request() {
                return Ok(SessionEnd::UserDisconnect);
            }
            if !link.is_connected().await {
                return Err(anyhow!(TransportError::NotConnected)).context("Device link lost");
            }

            if last_rssi.is_none_or(|at| at.elapsed() >= rssi_every) {
                last_rssi = Some(Instant::now());
                self.poll_signal(link).await;
            }

            let mode = self.intent.mode();
            self.status.patch(|s| s.mode = mode);
            let ctx = EffectContext {
                driver,
                intent: &self.intent,
                status: &self.status,
                cpu: self.cpu.as_ref(),
                cancel,
            };
            self.effects.step(&ctx).await;

            if !pause(cancel, poll).await {
                return Ok(SessionEnd::Cancelled);
            }
        }
    }

    async fn poll_signal(&self, link: &dyn BleLink) {
        match link.read_signal_strength().await {
            Ok(Some(rssi)) => {
                self.status.update("RSSI updated", StatusCategory::Info, |s| {
                    s.signal_strength = Some(rssi);
                });
            }
            Ok(None) => debug!("RSSI not reported"),
            Err(e) => debug!("RSSI read failed: {e:#}"),
        }
    }

    async fn recover(&mut self, err: anyhow::Error, cancel: &CancellationToken) {
        match classify_failure(&err) {
            FailureKind::ConnectionTimeout => {
                error!("{TIMEOUT_MESSAGE}: {err:#}");
                self.status
                    .update(TIMEOUT_MESSAGE, StatusCategory::Error, |s| {
                        s.connected = false;
                        s.error = Some(TIMEOUT_MESSAGE.to_string());
                    });
            }
            FailureKind::Generic => {
                let text = format!("{err:#}");
                error!("BLE error: {text}");
                self.status.update(
                    &format!("Connection error: {}", truncate(&text, 30)),
                    StatusCategory::Error,
                    |s| {
                        s.connected = false;
                        s.error = Some(truncate(&text, MAX_ERROR_LEN));
                    },
                );
            }
        }

        let delay = if self.auto_reconnect {
            let delay = self.backoff.next_delay();
            debug!("Reconnecting in {:.1}s (backoff)", delay.as_secs_f64());
            delay
        } else {
            secs(self.conn.fixed_retry_delay)
        };
        pause(cancel, delay).await;
    }
}

async fn release(link: &Arc<dyn BleLink>) {
    if let Err(e) = link.disconnect().await {
        debug!("Transport disconnect failed: {e:#}");
    }
}

/// Sleeps unless cancelled first. Returns `false` on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn until_cancelled<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        color::{Color, Mode},
        config::{Config, DeviceCfg},
        drivers::triones,
        telemetry::MockCpuSampler,
        transport::{
            MockBleCentral,
            fake::{ConnectOutcome, FakeCentral, FakeLink, advertisement},
        },
    };
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    const ADDRESS: &str = "FF:FF:10:69:5B:2A";

    struct Rig {
        central: Arc<FakeCentral>,
        config: Arc<ConfigManager>,
        intent: Arc<ControlIntent>,
        status: Arc<StatusHub>,
        active: Arc<ActiveDriver>,
        history: Arc<Mutex<Vec<(String, StatusCategory)>>>,
        cancel: CancellationToken,
    }

    impl Rig {
        fn new(central: Arc<FakeCentral>, device: DeviceCfg) -> Self {
            let config = Config {
                device,
                ..Config::default()
            };
            let status = Arc::new(StatusHub::new());
            let history = Arc::new(Mutex::new(Vec::new()));
            let sink = history.clone();
            status.subscribe(Arc::new(move |s| {
                sink.lock().unwrap().push((s.message.clone(), s.category));
            }));
            Self {
                central,
                config: Arc::new(ConfigManager::new(config, "unused.yml".into())),
                intent: Arc::new(ControlIntent::new(Color::rgb(255, 0, 0), Mode::Manual, 1.0, 0x10)),
                status,
                active: Arc::new(ActiveDriver::default()),
                history,
                cancel: CancellationToken::new(),
            }
        }

        fn with_address(central: Arc<FakeCentral>) -> Self {
            let device = DeviceCfg {
                address: Some(ADDRESS.into()),
                ..DeviceCfg::default()
            };
            Self::new(central, device)
        }

        fn spawn(&self) -> JoinHandle<Result<()>> {
            let mut cpu = MockCpuSampler::new();
            cpu.expect_cpu_usage().returning(|| Ok(10.0));
            let supervisor = ConnectionSupervisor::new(
                self.config.clone(),
                self.central.clone(),
                Arc::new(DriverRegistry::new()),
                self.intent.clone(),
                self.status.clone(),
                self.active.clone(),
                Arc::new(cpu),
            );
            tokio::spawn(supervisor.run(self.cancel.clone()))
        }

        fn messages(&self) -> Vec<String> {
            self.history.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }

        async fn stop(&self, handle: JoinHandle<Result<()>>) {
            self.cancel.cancel();
            handle.await.unwrap().unwrap();
        }
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_back_off_five_then_ten_seconds() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        central.push(ConnectOutcome::Fail(TransportError::Timeout));
        central.push(ConnectOutcome::Fail(TransportError::Timeout));
        let rig = Rig::with_address(central.clone());

        let handle = rig.spawn();
        wait_for(|| rig.active.get().is_some()).await;

        let times = central.connect_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(5));
        assert_eq!(times[2] - times[1], Duration::from_secs(10));
        assert!(rig.messages().iter().filter(|m| *m == TIMEOUT_MESSAGE).count() == 2);
        assert_eq!(rig.status.snapshot().error, None);

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn generic_error_is_truncated_and_reported() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        central.push(ConnectOutcome::Message("x".repeat(150)));
        let rig = Rig::with_address(central.clone());

        let handle = rig.spawn();
        wait_for(|| rig.messages().iter().any(|m| m.starts_with("Connection error: "))).await;

        let snapshot = rig.status.snapshot();
        assert_eq!(snapshot.category, StatusCategory::Error);
        assert_eq!(snapshot.error.as_ref().map(|e| e.chars().count()), Some(MAX_ERROR_LEN));
        assert_eq!(snapshot.message.chars().count(), "Connection error: ".len() + 30);

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn connected_session_resends_manual_color_and_reads_rssi() {
        let link = FakeLink::offline();
        link.set_rssi(Some(-48));
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        let rig = Rig::with_address(central.clone());

        let handle = rig.spawn();
        wait_for(|| link.write_count() >= 3).await;

        let snapshot = rig.status.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.device_name, "ELK-BLEDOM");
        assert_eq!(snapshot.signal_strength, Some(-48));
        assert_eq!(snapshot.color, Color::rgb(255, 0, 0));
        assert!(rig.messages().contains(&"RSSI updated".to_string()));
        assert!(link.packets().iter().all(|p| p[3] == 0x03 && p[4] == 0xFF));
        assert_eq!(rig.active.get().unwrap().protocol_name(), "ELK-BLEDOM");

        rig.stop(handle).await;
        assert!(rig.active.get().is_none());
        assert!(!rig.status.snapshot().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn rssi_failure_is_not_fatal() {
        let link = FakeLink::offline();
        link.fail_rssi();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        let rig = Rig::with_address(central.clone());

        let handle = rig.spawn();
        wait_for(|| link.write_count() >= 60).await;

        assert_eq!(central.connect_attempts(), 1);
        assert!(rig.status.snapshot().connected);

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn user_disconnect_skips_backoff() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        let rig = Rig::with_address(central.clone());

        let handle = rig.spawn();
        wait_for(|| rig.active.get().is_some()).await;
        rig.intent.request_disconnect();
        wait_for(|| central.connect_attempts() == 2).await;

        let times = central.connect_times();
        assert!(times[1] - times[0] >= Duration::from_secs(2));
        assert!(times[1] - times[0] < Duration::from_secs(3));
        assert!(rig.messages().contains(&"Disconnected by user".to_string()));
        assert!(!rig.messages().iter().any(|m| m.starts_with("Connection error")));

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_is_a_generic_error() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        let rig = Rig::with_address(central.clone());

        let handle = rig.spawn();
        wait_for(|| rig.active.get().is_some()).await;
        link.drop_link();
        wait_for(|| rig.messages().iter().any(|m| m.starts_with("Connection error"))).await;

        let error = rig.status.snapshot().error.unwrap();
        assert!(error.starts_with("Device link lost"), "{error}");

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_explicit_protocol_falls_back_to_elk() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "Triones")], link.clone());
        let device = DeviceCfg {
            address: Some(ADDRESS.into()),
            protocol: Some("hue".into()),
            ..DeviceCfg::default()
        };
        let rig = Rig::new(central, device);

        let handle = rig.spawn();
        wait_for(|| rig.active.get().is_some()).await;

        assert_eq!(rig.active.get().unwrap().protocol_name(), "ELK-BLEDOM");
        assert_eq!(rig.config.get().await.device.write_uuid, None);

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn detected_driver_backfills_write_uuid() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(
            vec![advertisement(ADDRESS, "Triones LED Controller")],
            link.clone(),
        );
        let rig = Rig::with_address(central);

        let handle = rig.spawn();
        wait_for(|| link.write_count() > 0).await;

        assert_eq!(rig.active.get().unwrap().protocol_name(), "Triones");
        assert_eq!(
            rig.config.get().await.device.write_uuid.as_deref(),
            Some(triones::WRITE_UUID.to_string().as_str())
        );
        assert_eq!(link.writes()[0].0, triones::WRITE_UUID);

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn name_scan_used_without_address() {
        let link = FakeLink::offline();
        let central = FakeCentral::scan_only(
            vec![
                advertisement("00:11:22:33:44:55", "Headphones"),
                advertisement(ADDRESS, "LEDnetWF"),
            ],
            link.clone(),
        );
        let rig = Rig::new(central.clone(), DeviceCfg::default());

        let handle = rig.spawn();
        wait_for(|| rig.active.get().is_some()).await;

        assert_eq!(rig.status.snapshot().device_name, "LEDnetWF");
        assert_eq!(central.scans(), 1);

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_misses_escalate_to_cooldown() {
        let link = FakeLink::offline();
        let central = FakeCentral::scan_only(vec![], link.clone());
        let rig = Rig::new(central.clone(), DeviceCfg::default());
        let start = Instant::now();

        let handle = rig.spawn();
        wait_for(|| {
            rig.messages()
                .contains(&"Device not found (max retries)".to_string())
        })
        .await;

        // Ten misses at 5s each, the eleventh escalates.
        assert_eq!(central.scans(), 11);
        assert_eq!(start.elapsed().as_secs() / 5, 10);

        wait_for(|| central.scans() == 12).await;
        assert!(start.elapsed() >= Duration::from_secs(80));

        central.set_devices(vec![advertisement(ADDRESS, "ELK-BLEDOM")]);
        wait_for(|| rig.active.get().is_some()).await;

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_without_auto_reconnect() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        for _ in 0..3 {
            central.push(ConnectOutcome::Fail(TransportError::Timeout));
        }
        let rig = Rig::with_address(central.clone());
        rig.config.get_mut().await.preferences.auto_reconnect = false;

        let handle = rig.spawn();
        wait_for(|| central.connect_attempts() == 4).await;

        let times = central.connect_times();
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }

        rig.stop(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff_sleep() {
        let link = FakeLink::offline();
        let central = FakeCentral::new(vec![advertisement(ADDRESS, "ELK-BLEDOM")], link.clone());
        central.push(ConnectOutcome::Fail(TransportError::Timeout));
        let rig = Rig::with_address(central.clone());
        rig.config.get_mut().await.preferences.reconnect_interval = 200.0;

        let handle = rig.spawn();
        wait_for(|| central.connect_attempts() == 1).await;
        let start = Instant::now();
        rig.stop(handle).await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(rig.status.snapshot().message, "Stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn backend_errors_count_as_discovery_misses() {
        let mut central = MockBleCentral::new();
        central
            .expect_find_by_address()
            .returning(|_, _| Err(anyhow!("org.bluez.Error.NotReady")));
        central
            .expect_scan()
            .times(3)
            .returning(|_| Err(anyhow!("org.bluez.Error.InProgress")));
        central.expect_connect().never();
        let config = Config {
            device: DeviceCfg {
                address: Some(ADDRESS.into()),
                ..DeviceCfg::default()
            },
            ..Config::default()
        };
        let status = Arc::new(StatusHub::new());
        let cancel = CancellationToken::new();
        let supervisor = ConnectionSupervisor::new(
            Arc::new(ConfigManager::new(config, "unused.yml".into())),
            Arc::new(central),
            Arc::new(DriverRegistry::new()),
            Arc::new(ControlIntent::default()),
            status.clone(),
            Arc::new(ActiveDriver::default()),
            Arc::new(MockCpuSampler::new()),
        );

        let handle = tokio::spawn(supervisor.run(cancel.clone()));
        // Scans at 0s, 5s and 10s.
        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(status.snapshot().message, "Stopped");
    }
}
