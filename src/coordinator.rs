//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::error::RecvError,
};

use crate::{
    app_context::AppState,
    bridge::ApplicationBridge,
    config::ConfigManager,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, BroadcastServiceProvider, ConnectionServiceProvider,
        DBusServiceProvider, ServiceProvider,
    },
    task_manager::TaskManager,
};

/// SystemCoordinator with Dependency Injection pattern.
///
/// Manages the complete lifecycle of all services using a provider-based
/// architecture for loose coupling and testability.
///
/// # Features
/// - Service prioritization (critical vs non-critical)
/// - Graceful degradation on service failures
/// - Shutdown on Ctrl+C, SIGTERM or a `SystemShutdown` event, followed by
///   saving the user preferences
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Opens the Bluetooth adapter and registers every service.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager, self.event_bus.clone())
            .provide()
            .await
            .context("Failed to initialize application state")?;

        let shutdown_timeout = state.config().await.connection.shutdown_timeout();
        self.task_manager = TaskManager::with_shutdown_timeout(shutdown_timeout);
        self.shared_state = Some(state.clone());

        self.register_service_providers(state)
            .await
            .context("Failed to register service providers")?;

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    /// Registers all service providers with prioritization.
    async fn register_service_providers(&mut self, state: Arc<AppState>) -> Result<()> {
        let mut providers = local_providers(&state);

        match DBusServiceProvider::new(state.clone(), self.event_bus.clone()).await {
            Ok(provider) => {
                providers.push(Box::new(provider));
            }
            Err(e) => {
                warn!("Failed to create D-Bus service provider: {e:#}, skipping D-Bus service");
            }
        }

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );

        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started successfully (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e:#}",
                        provider.name()
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Waits for a shutdown signal or event, then stops everything.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        bail!("Failed to listen for shutdown signal: {e}");
                    }
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    self.shutdown().await;
                    break;
                }

                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    self.shutdown().await;
                    break;
                }

                event = event_rx.recv() => {
                    if self.handle_event(event).await? {
                        break;
                    }
                }
            }
        }

        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns `true` once the system has been shut down.
    async fn handle_event(&mut self, event_result: Result<Event, RecvError>) -> Result<bool> {
        match event_result {
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                self.shutdown().await;
                Ok(true)
            }
            Ok(Event::StatusChanged(_)) => Ok(false),
            Err(RecvError::Closed) => Err(anyhow!("Event bus channel closed unexpectedly")),
            Err(RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
                Ok(false)
            }
        }
    }

    /// Stops every task, then persists the preferences. Failures are logged,
    /// never returned, so the process can still exit.
    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        if let Some(state) = &self.shared_state {
            match ApplicationBridge::from_state(state).save_preferences().await {
                Ok(()) => info!("Preferences saved to {}", state.config_manager.path().display()),
                Err(e) => error!("{e:#}"),
            }
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

/// Services that need nothing beyond the shared state.
fn local_providers(state: &Arc<AppState>) -> Vec<Box<dyn ServiceProvider>> {
    vec![
        Box::new(ConnectionServiceProvider::new(state.clone())),
        Box::new(BroadcastServiceProvider::new(
            state.clone(),
            state.event_bus.clone(),
        )),
    ]
}
