//! BLE transport boundary.
//!
//! The rest of the crate only sees [`BleCentral`] and [`BleLink`]; the
//! platform stack lives behind them in [`btle`].

pub mod btle;
#[cfg(test)]
pub mod fake;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// What a scan or address lookup learned about a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub services: Vec<Uuid>,
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Name if advertised, address otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Discovery and connection side of the platform BLE stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Looks for one peripheral by MAC address within `timeout`.
    async fn find_by_address(&self, address: &str, timeout: Duration) -> Result<Option<Advertisement>>;

    /// Scans for `timeout` and returns everything seen.
    async fn scan(&self, timeout: Duration) -> Result<Vec<Advertisement>>;

    /// Opens a GATT connection and discovers its characteristics.
    async fn connect(&self, device: &Advertisement, timeout: Duration) -> Result<Arc<dyn BleLink>>;
}

/// One live GATT connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleLink: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Characteristic UUIDs discovered on connect.
    async fn characteristics(&self) -> Vec<Uuid>;

    /// Writes `data`; with `require_ack == false` the write is fire-and-forget.
    async fn write_characteristic(&self, uuid: Uuid, data: &[u8], require_ack: bool) -> Result<()>;

    /// Latest RSSI in dBm, if the stack knows one.
    async fn read_signal_strength(&self) -> Result<Option<i16>>;

    async fn disconnect(&self) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection timed out")]
    Timeout,
    #[error("device is not connected")]
    NotConnected,
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("BLE backend error: {0}")]
    Backend(String),
}

/// How a failed connection cycle is reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ConnectionTimeout,
    Generic,
}

/// Sorts a cycle failure into timeout or generic.
///
/// Typed timeouts anywhere in the chain win. Otherwise the outer message
/// must look like a GATT timeout, while nested causes only need to mention
/// one.
pub fn classify_failure(err: &anyhow::Error) -> FailureKind {
    let typed_timeout = err.chain().any(|cause| {
        matches!(cause.downcast_ref::<TransportError>(), Some(TransportError::Timeout))
            || cause.is::<tokio::time::error::Elapsed>()
            || matches!(cause.downcast_ref::<btleplug::Error>(), Some(btleplug::Error::TimedOut(_)))
    });
    if typed_timeout {
        return FailureKind::ConnectionTimeout;
    }

    let outer = err.to_string().to_lowercase();
    if (outer.contains("gatt") && outer.contains("timeout")) || mentions_conn_error(&outer) {
        return FailureKind::ConnectionTimeout;
    }

    let nested_timeout = err.chain().skip(1).any(|cause| {
        let msg = cause.to_string().to_lowercase();
        msg.contains("timeout") || mentions_conn_error(&msg)
    });
    if nested_timeout {
        FailureKind::ConnectionTimeout
    } else {
        FailureKind::Generic
    }
}

fn mentions_conn_error(msg: &str) -> bool {
    msg.contains("error 8") || msg.contains("conn timeout")
}
