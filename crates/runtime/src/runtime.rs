//! High-level runtime orchestrator.
//!
//! The runtime owns the coordinator worker, wires the delegation channel and
//! the event bus, and exposes a builder-based API for hosts to drive item
//! uses against a shared world.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{CombatHandle, Result, RuntimeError};
use crate::config::RuntimeConfig;
use crate::delegation::{
    CoordinatorWorker, DelegationClient, DelegationMetrics, EngineHandler, HandlerRegistry,
    ReactionHandler, RollHandler, WorldHandler,
};
use crate::dialogs::ClientDirectory;
use crate::dice::SharedRoller;
use crate::events::EventBus;
use crate::hooks::{HookRegistry, MacroRunner, NoMacros};
use crate::workflow::ActionEngine;
use crate::world::{World, WorldStore};

/// Main runtime that resolves actions.
///
/// Design: Runtime owns the coordinator worker and keeps the engine alive.
/// [`CombatHandle`] provides a cloneable façade for clients.
pub struct Runtime {
    handle: CombatHandle,
    coordinator_handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl Runtime {
    /// Create a new runtime builder
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Get a cloneable handle to this runtime
    pub fn handle(&self) -> CombatHandle {
        self.handle.clone()
    }

    /// Stops the coordinator and waits for it to exit.
    ///
    /// Delegated calls still in flight resolve as failures on the caller's
    /// side once their reply sender is dropped.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.handle);
        let _ = self.shutdown_tx.send(());
        self.coordinator_handle
            .await
            .map_err(RuntimeError::WorkerJoin)?;
        info!(target: "runtime::delegation", "runtime stopped");
        Ok(())
    }
}

/// Builder for [`Runtime`] with flexible configuration.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    world: Option<World>,
    hooks: Option<HookRegistry>,
    macros: Option<Arc<dyn MacroRunner>>,
    roller: Option<SharedRoller>,
    clients: ClientDirectory,
}

impl RuntimeBuilder {
    fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            world: None,
            hooks: None,
            macros: None,
            roller: None,
            clients: ClientDirectory::new(),
        }
    }

    /// Override runtime configuration
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initial world (required)
    pub fn world(mut self, world: World) -> Self {
        self.world = Some(world);
        self
    }

    /// Set workflow hooks. Defaults to an empty registry.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Set the runner for item macros. Defaults to [`NoMacros`].
    pub fn macros(mut self, macros: impl MacroRunner + 'static) -> Self {
        self.macros = Some(Arc::new(macros));
        self
    }

    /// Set the die roller. Defaults to an entropy-seeded roller.
    pub fn roller(mut self, roller: SharedRoller) -> Self {
        self.roller = Some(roller);
        self
    }

    /// Connected users and their dialogs. The directory stays shared, so
    /// users may be registered after the runtime is built.
    pub fn clients(mut self, clients: ClientDirectory) -> Self {
        self.clients = clients;
        self
    }

    /// Build the runtime
    pub async fn build(self) -> Result<Runtime> {
        let world = self.world.ok_or(RuntimeError::MissingWorld)?;
        let gm = world.gm.clone();
        let config = Arc::new(self.config);
        let world = WorldStore::new(world);
        let bus = EventBus::with_capacity(config.event_buffer_size);
        let roller = self.roller.unwrap_or_else(SharedRoller::from_entropy);
        let macros = self.macros.unwrap_or_else(|| Arc::new(NoMacros));

        let (delivery_tx, delivery_rx) = mpsc::channel(config.command_buffer_size);
        let client = DelegationClient::new(delivery_tx, gm, config.delegation_timeout());

        let engine = Arc::new(ActionEngine::new(
            Arc::clone(&config),
            world.clone(),
            bus.clone(),
            self.hooks.unwrap_or_default(),
            macros,
            roller.clone(),
            self.clients.clone(),
            client.clone(),
        ));

        let handlers = HandlerRegistry::new()
            .with(Arc::new(WorldHandler::new(world.clone())))
            .with(Arc::new(ReactionHandler::new(
                self.clients.clone(),
                world,
                config.reaction_timeout(),
            )))
            .with(Arc::new(RollHandler::new(roller)))
            .with(Arc::new(EngineHandler::new(Arc::downgrade(&engine))));

        let metrics = Arc::new(DelegationMetrics::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let coordinator = CoordinatorWorker::new(
            delivery_rx,
            handlers,
            config.reply_cache_size,
            Arc::clone(&metrics),
            shutdown_rx,
        );
        let coordinator_handle = tokio::spawn(async move {
            coordinator.run().await;
        });

        info!(
            target: "runtime::delegation",
            gm = %client.user(),
            undo_capacity = config.undo_capacity,
            "runtime started"
        );

        Ok(Runtime {
            handle: CombatHandle::new(engine, client, self.clients, metrics),
            coordinator_handle,
            shutdown_tx,
        })
    }
}
