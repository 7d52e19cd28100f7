//! Connection status snapshots and their subscribers.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    color::{Color, Mode},
    event::{Event, EventBus},
};

/// Longest error text carried in a status snapshot.
pub const MAX_ERROR_LEN: usize = 100;

/// Text reported when the link failed with a connection timeout.
pub const TIMEOUT_MESSAGE: &str = "GATT CONN TIMEOUT";

/// Coarse tag attached to each status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Info,
    Error,
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCategory::Idle => "idle",
            StatusCategory::Scanning => "scanning",
            StatusCategory::Connecting => "connecting",
            StatusCategory::Connected => "connected",
            StatusCategory::Info => "info",
            StatusCategory::Error => "error",
        };
        f.write_str(s)
    }
}

/// Read-only snapshot of the device link, replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub device_name: String,
    /// RSSI in dBm.
    pub signal_strength: Option<i16>,
    pub mode: Mode,
    pub color: Color,
    /// Last failure, at most [`MAX_ERROR_LEN`] characters.
    pub error: Option<String>,
    pub cpu_usage: Option<f32>,
    /// Short human readable description of the last transition.
    pub message: String,
    pub category: StatusCategory,
}

/// Subscriber invoked with every new snapshot.
pub type StatusCallback = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Owns the current [`ConnectionStatus`] and fans each new snapshot out
/// to callbacks and the event bus.
///
/// A panicking callback is caught and logged; it never reaches the caller
/// that produced the update.
pub struct StatusHub {
    current: Mutex<ConnectionStatus>,
    subscribers: Mutex<Vec<StatusCallback>>,
    event_bus: Option<EventBus>,
}

impl StatusHub {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(ConnectionStatus::default()),
            subscribers: Mutex::new(Vec::new()),
            event_bus: None,
        }
    }

    /// Also republishes every snapshot as [`Event::StatusChanged`].
    pub fn with_event_bus(event_bus: EventBus) -> Self {
        Self {
            event_bus: Some(event_bus),
            ..Self::new()
        }
    }

    pub fn subscribe(&self, callback: StatusCallback) {
        lock(&self.subscribers).push(callback);
    }

    pub fn snapshot(&self) -> ConnectionStatus {
        lock(&self.current).clone()
    }

    /// Applies `change` to a copy of the current snapshot, stores it and
    /// notifies every subscriber.
    pub fn update<F>(&self, message: &str, category: StatusCategory, change: F) -> ConnectionStatus
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        let snapshot = {
            let mut current = lock(&self.current);
            let mut next = current.clone();
            change(&mut next);
            next.message = message.to_string();
            next.category = category;
            *current = next.clone();
            next
        };
        self.emit(&snapshot);
        snapshot
    }

    /// Changes fields without notifying anyone, for values that ride along
    /// with the next transition.
    pub fn patch<F>(&self, change: F)
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        change(&mut lock(&self.current));
    }

    fn emit(&self, snapshot: &ConnectionStatus) {
        let subscribers = lock(&self.subscribers).clone();
        for callback in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                debug!("Status subscriber panicked on '{}'", snapshot.message);
            }
        }

        if let Some(bus) = &self.event_bus {
            // No receivers is a normal state between client connections.
            let _ = bus.publish(Event::StatusChanged(snapshot.clone()));
        }
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusHub")
            .field("current", &self.snapshot())
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

/// Cuts `text` to at most `max` characters on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
