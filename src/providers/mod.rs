//! Dependency injection providers for service management.
//!
//! This module contains all providers for creating and managing system components
//! using the Dependency Injection pattern for loose coupling and testability.

pub mod app_state;
pub mod broadcast;
pub mod connection;
pub mod dbus;
pub mod traits;

// Re-export core types for convenience
pub use app_state::AppStateProvider;
pub use broadcast::BroadcastServiceProvider;
pub use connection::ConnectionServiceProvider;
pub use dbus::DBusServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
