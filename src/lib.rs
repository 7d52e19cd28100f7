//! # led_commander
//!
//! A Linux daemon for controlling BLE RGB LED strip controllers.
//!
//! ## Features
//!
//! - **Async Architecture**: Built on Tokio, one supervisor task owns the BLE link
//! - **Multiple Protocols**: ELK-BLEDOM, Triones, MagicHome and plain Tuya
//!   behind one driver trait, picked by name or advertisement fingerprint
//! - **Resilient Connection**: discovery retries, exponential reconnect backoff
//! - **Effects**: manual color, CPU load ramp, breathing, rainbow cycle
//! - **D-Bus Interface**: commands, status property and status signal
//!
//! ## Architecture
//!
//! The daemon uses a provider-based dependency injection system with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`ConnectionSupervisor`](supervisor::ConnectionSupervisor) - BLE state machine
//! - [`ApplicationBridge`](bridge::ApplicationBridge) - Control-plane facade
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Shared application state
//!
//! ## Example
//!
//! ```no_run
//! use led_commander::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod backoff;
pub mod bridge;
pub mod cli;
pub mod color;
pub mod config;
pub mod coordinator;
pub mod drivers;
pub mod effects;
pub mod event;
pub mod intent;
pub mod interface;
pub mod providers;
pub mod status;
pub mod supervisor;
pub mod task_manager;
pub mod telemetry;
pub mod transport;
