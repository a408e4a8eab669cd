//! Bridge test helpers.
//!
//! [`TestBridge`] wires a [`Bridge`] to an in-memory store, a [`MockWorker`]
//! and a [`RecordingBackend`] inside a temporary directory. Call
//! [`TestBridge::serve`] to run it behind a real control socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use panbridge_config::AppConfig;
use panbridge_core::bridge::{Bridge, ShutdownSignal};
use panbridge_core::ipc::{IpcClient, IpcState, server};
use panbridge_core::queue;
use panbridge_core::store::MemoryStore;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::notify::RecordingBackend;
use crate::worker::MockWorker;

/// A test-scoped bridge with an owned temp directory for config and socket.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestBridge {
    pub bridge: Bridge,
    pub store: MemoryStore,
    pub worker: MockWorker,
    pub notifications: RecordingBackend,
    pub config_path: PathBuf,
    temp_dir: TempDir,
}

impl TestBridge {
    /// Create a bridge from an in-memory config.
    pub fn new(config: AppConfig) -> Self {
        Self::with_backend(config, RecordingBackend::new())
    }

    /// Create a bridge whose notifications go to `backend`.
    pub fn with_backend(config: AppConfig, backend: RecordingBackend) -> Self {
        Self::with_store(config, backend, MemoryStore::new())
    }

    /// Create a bridge reading from a pre-populated store.
    pub fn with_store(config: AppConfig, backend: RecordingBackend, store: MemoryStore) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("panbridge.toml");
        let (queues, endpoint) = queue::channel();
        let bridge = Bridge::with_backend(
            config,
            Arc::new(store.clone()),
            queues,
            Arc::new(backend.clone()),
        );

        Self {
            bridge,
            store,
            worker: MockWorker::new(endpoint),
            notifications: backend,
            config_path,
            temp_dir,
        }
    }

    /// Create a bridge backed by a temporary config file containing the given
    /// TOML string.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("panbridge.toml");
        tokio::fs::write(&config_path, toml_content)
            .await
            .expect("failed to write test config");

        let config = AppConfig::load(&config_path)
            .await
            .expect("failed to parse test config");

        let mut test = Self::new(config);
        test.config_path = config_path;
        test.temp_dir = temp_dir;
        test
    }

    /// Socket path inside the temp directory.
    pub fn socket_path(&self) -> PathBuf {
        self.temp_dir.path().join("panbridge.sock")
    }

    /// Run the bridge loop and the IPC server in background tasks.
    pub async fn serve(self) -> RunningBridge {
        let socket_path = self.socket_path();
        let Self {
            mut bridge,
            store,
            worker,
            notifications,
            temp_dir,
            ..
        } = self;

        let state = Arc::new(IpcState::from_bridge(&bridge));
        let shutdown = bridge.shutdown_sender();

        let ipc_path = socket_path.clone();
        let ipc_shutdown = shutdown.subscribe();
        let ipc_task =
            tokio::spawn(async move { server::serve(&ipc_path, state, ipc_shutdown).await });
        let bridge_task = tokio::spawn(async move {
            bridge.run().await;
            bridge
        });

        for _ in 0..200 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        RunningBridge {
            client: IpcClient::new(&socket_path),
            store,
            worker,
            notifications,
            shutdown,
            bridge_task,
            ipc_task,
            _temp_dir: temp_dir,
        }
    }
}

/// A bridge running behind a control socket.
pub struct RunningBridge {
    pub client: IpcClient,
    pub store: MemoryStore,
    pub worker: MockWorker,
    pub notifications: RecordingBackend,
    pub shutdown: broadcast::Sender<ShutdownSignal>,
    bridge_task: JoinHandle<Bridge>,
    ipc_task: JoinHandle<std::io::Result<()>>,
    _temp_dir: TempDir,
}

impl RunningBridge {
    /// Wait for the bridge loop to exit (after `/stop` or [`Self::stop`]) and
    /// hand the bridge back.
    pub async fn join(self) -> Bridge {
        let bridge = tokio::time::timeout(Duration::from_secs(2), self.bridge_task)
            .await
            .expect("bridge did not stop")
            .expect("bridge task panicked");
        let _ = tokio::time::timeout(Duration::from_secs(2), self.ipc_task).await;
        bridge
    }

    /// Signal shutdown and wait for both tasks.
    pub async fn stop(self) -> Bridge {
        let _ = self.shutdown.send(ShutdownSignal);
        self.join().await
    }
}
