//! Presentation context runtime: owns the control surface, the state cache
//! and the dispatch loop, and drives them from a single task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use panbridge_config::AppConfig;

use crate::control::{CommandHandle, ControlSurface};
use crate::dispatch::{Dispatcher, Tick};
use crate::ids::IdAllocator;
use crate::notify::{NotificationBackend, Notifier, NotifySendBackend};
use crate::queue::BridgeQueues;
use crate::signals::SignalBus;
use crate::store::{DeviceRecord, PanStore, UsersSnapshot};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Errors from the bridge runtime.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge is not running")]
    Stopped,
}

/// Read-only query answered inside the bridge task.
#[derive(Debug)]
enum Query {
    ListServers(oneshot::Sender<UsersSnapshot>),
    ListDevices {
        pan_user: String,
        reply: oneshot::Sender<Vec<DeviceRecord>>,
    },
    ListUserDevices {
        pan_user: String,
        user_id: String,
        reply: oneshot::Sender<Vec<DeviceRecord>>,
    },
}

/// Cloneable handle for asking the running bridge about its cache.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    tx: mpsc::Sender<Query>,
}

impl QueryHandle {
    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| BridgeError::Stopped)?;
        rx.await.map_err(|_| BridgeError::Stopped)
    }

    pub async fn list_servers(&self) -> Result<UsersSnapshot, BridgeError> {
        self.ask(Query::ListServers).await
    }

    pub async fn list_devices(&self, pan_user: &str) -> Result<Vec<DeviceRecord>, BridgeError> {
        let pan_user = pan_user.to_string();
        self.ask(|reply| Query::ListDevices { pan_user, reply }).await
    }

    pub async fn list_user_devices(
        &self,
        pan_user: &str,
        user_id: &str,
    ) -> Result<Vec<DeviceRecord>, BridgeError> {
        let pan_user = pan_user.to_string();
        let user_id = user_id.to_string();
        self.ask(|reply| Query::ListUserDevices {
            pan_user,
            user_id,
            reply,
        })
        .await
    }
}

/// The pantalaimon UI bridge.
pub struct Bridge {
    config: AppConfig,
    dispatcher: Dispatcher,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    query_tx: mpsc::Sender<Query>,
    query_rx: mpsc::Receiver<Query>,
}

impl Bridge {
    /// Create a bridge that renders notifications through `notify-send`.
    pub fn new(config: AppConfig, store: Arc<dyn PanStore>, queues: BridgeQueues) -> Self {
        let backend = NotifySendBackend::new(
            config.notifications.notify_send_bin.as_str(),
            config.notifications.app_name.as_str(),
        );
        Self::with_backend(config, store, queues, Arc::new(backend))
    }

    /// Create a bridge with an explicit notification backend.
    pub fn with_backend(
        config: AppConfig,
        store: Arc<dyn PanStore>,
        queues: BridgeQueues,
        backend: Arc<dyn NotificationBackend>,
    ) -> Self {
        match store.load_all_users() {
            Ok(users) => info!(accounts = users.len(), "Loaded accounts from store"),
            Err(e) => warn!(error = %e, "Failed to load accounts from store"),
        }

        let commands = CommandHandle::new(Arc::new(IdAllocator::new()), queues.commands);
        let surface = ControlSurface::new(commands, store, config.server_names());
        let signals = SignalBus::new(config.bridge.signal_history);
        let notifier = Notifier::init(config.notifications.enabled, backend);
        let dispatcher = Dispatcher::new(queues.events, surface, signals, notifier);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (query_tx, query_rx) = mpsc::channel(64);

        Self {
            config,
            dispatcher,
            shutdown_tx,
            shutdown_rx,
            query_tx,
            query_rx,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Handle for issuing commands. Usable from any task.
    pub fn commands(&self) -> CommandHandle {
        self.dispatcher.surface().commands().clone()
    }

    pub fn signals(&self) -> SignalBus {
        self.dispatcher.signals().clone()
    }

    pub fn queries(&self) -> QueryHandle {
        QueryHandle {
            tx: self.query_tx.clone(),
        }
    }

    pub fn surface(&self) -> &ControlSurface {
        self.dispatcher.surface()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.dispatcher.notifier().is_enabled()
    }

    /// Run one dispatch step outside of [`Bridge::run`].
    pub fn tick(&mut self) -> Tick {
        self.dispatcher.tick()
    }

    pub fn shutdown_sender(&self) -> broadcast::Sender<ShutdownSignal> {
        self.shutdown_tx.clone()
    }

    /// Request the run loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Drive the dispatch loop and answer queries until shut down.
    ///
    /// Commands still queued for the worker are left where they are. A
    /// bridge runs once: queries stop being accepted when this returns.
    pub async fn run(&mut self) {
        // `interval` rejects a zero period.
        let period = Duration::from_millis(self.config.bridge.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.config.bridge.tick_interval_ms,
            servers = self.surface().servers().len(),
            notifications = self.notifications_enabled(),
            "Bridge starting"
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping bridge");
                    break;
                }
                _ = &mut ctrl_c => {
                    warn!("Ctrl-C received, initiating graceful shutdown");
                    let _ = self.shutdown_tx.send(ShutdownSignal);
                    break;
                }
                Some(query) = self.query_rx.recv() => self.answer(query),
                _ = interval.tick() => {
                    self.dispatcher.tick();
                }
            }
        }

        // Pending and later queries fail with `BridgeError::Stopped`.
        self.query_rx.close();
        while self.query_rx.try_recv().is_ok() {}

        info!(backlog = self.dispatcher.backlog(), "Bridge stopped");
    }

    fn answer(&self, query: Query) {
        let surface = self.dispatcher.surface();
        let delivered = match query {
            Query::ListServers(reply) => reply.send(surface.list_servers()).is_ok(),
            Query::ListDevices { pan_user, reply } => {
                reply.send(surface.list_devices(&pan_user)).is_ok()
            }
            Query::ListUserDevices {
                pan_user,
                user_id,
                reply,
            } => reply
                .send(surface.list_user_devices(&pan_user, &user_id))
                .is_ok(),
        };
        if !delivered {
            debug!("Query caller went away before the answer");
        }
    }
}
