use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use log::{debug, info};

use super::{
    DriverDescriptor, DriverError, LedDriver, elk_bledom::ElkBledom, magichome::MagicHome,
    name_matches, triones::Triones, tuya::Tuya,
};
use crate::transport::Advertisement;

/// Name fragments that mark a device as "some LED controller" when no
/// vendor fingerprint matched.
const GENERIC_KEYWORDS: &[&str] = &["LED", "RGB", "CTRL", "LIGHT"];

/// Maps protocol names and device fingerprints to driver factories.
///
/// Explicit names are matched case-insensitively after trimming. Detection
/// walks `detection_order` and returns the first descriptor that claims the
/// device, so vendor fingerprints always beat the generic fallback.
#[derive(Debug)]
pub struct DriverRegistry {
    by_name: DashMap<String, Arc<dyn DriverDescriptor>>,
    detection_order: RwLock<Vec<Arc<dyn DriverDescriptor>>>,
}

impl DriverRegistry {
    /// Registry with the four built-in protocols and their aliases.
    pub fn new() -> Self {
        let elk: Arc<dyn DriverDescriptor> = Arc::new(ElkBledom);
        let triones: Arc<dyn DriverDescriptor> = Arc::new(Triones);
        let magichome: Arc<dyn DriverDescriptor> = Arc::new(MagicHome);
        let tuya: Arc<dyn DriverDescriptor> = Arc::new(Tuya);

        let by_name = DashMap::new();
        for alias in ["elk_bledom", "elk", "bledom"] {
            by_name.insert(alias.to_string(), elk.clone());
        }
        by_name.insert("triones".to_string(), triones.clone());
        for alias in ["magichome", "magic_home", "magic"] {
            by_name.insert(alias.to_string(), magichome.clone());
        }
        by_name.insert("tuya".to_string(), tuya.clone());

        Self {
            by_name,
            detection_order: RwLock::new(vec![triones, magichome, tuya, elk]),
        }
    }

    /// Creates a driver by explicit protocol name or alias.
    pub fn create(&self, protocol: &str) -> Result<Arc<dyn LedDriver>, DriverError> {
        let key = protocol.trim().to_lowercase();
        match self.by_name.get(&key) {
            Some(descriptor) => {
                info!("Using {} driver", descriptor.protocol_name());
                Ok(descriptor.create())
            }
            None => Err(DriverError::UnknownProtocol {
                name: protocol.to_string(),
                available: self.available_protocols(),
            }),
        }
    }

    /// Fingerprints an advertisement against the registered protocols.
    pub fn detect(&self, device: &Advertisement) -> Result<Arc<dyn LedDriver>, DriverError> {
        let name = device.name.as_deref();
        let order = self
            .detection_order
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(descriptor) = order
            .iter()
            .find(|d| d.can_handle_device(name, &device.services))
        {
            info!(
                "Detected {} protocol for {}",
                descriptor.protocol_name(),
                device.display_name()
            );
            return Ok(descriptor.create());
        }

        if name_matches(name, GENERIC_KEYWORDS) {
            debug!(
                "No fingerprint matched {}, assuming ELK-BLEDOM",
                device.display_name()
            );
            return Ok(ElkBledom.create());
        }

        Err(DriverError::DetectionFailed(device.display_name().to_string()))
    }

    /// Adds a protocol under `name`. New protocols are fingerprinted after
    /// the built-in ones.
    pub fn register(&self, name: &str, descriptor: Arc<dyn DriverDescriptor>) {
        let mut order = self
            .detection_order
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !order
            .iter()
            .any(|d| d.protocol_name() == descriptor.protocol_name())
        {
            order.push(descriptor.clone());
        }
        self.by_name.insert(name.trim().to_lowercase(), descriptor);
    }

    /// All accepted names and aliases, sorted.
    pub fn available_protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_protocol_supported(&self, protocol: &str) -> bool {
        self.by_name.contains_key(&protocol.trim().to_lowercase())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
