//! IPC server: axum HTTP router over a Unix domain socket.
//!
//! The bridge binds a Unix socket and exposes the control and device
//! operations as a JSON API. Command routes answer with the correlation id
//! at once; queries are forwarded to the bridge task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::info;

use panbridge_config::AppConfig;

use super::types::*;
use crate::bridge::{Bridge, BridgeError, QueryHandle, ShutdownSignal};
use crate::control::CommandHandle;
use crate::ids::MessageId;
use crate::signals::SignalBus;

/// Shared state accessible to all IPC route handlers.
pub struct IpcState {
    pub config: AppConfig,
    pub commands: CommandHandle,
    pub queries: QueryHandle,
    pub signals: SignalBus,
    pub shutdown_tx: broadcast::Sender<ShutdownSignal>,
    pub started_at: Instant,
}

impl IpcState {
    /// Collect the handles the routes need from a bridge.
    pub fn from_bridge(bridge: &Bridge) -> Self {
        Self {
            config: bridge.config().clone(),
            commands: bridge.commands(),
            queries: bridge.queries(),
            signals: bridge.signals(),
            shutdown_tx: bridge.shutdown_sender(),
            started_at: Instant::now(),
        }
    }
}

/// Default Unix socket path for the control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/panbridge.sock";

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build the axum router with all IPC routes.
pub fn router(state: Arc<IpcState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handle_health))
        .route("/stop", post(handle_stop))
        .route("/config", get(handle_config))
        .route("/servers", get(handle_servers))
        .route("/keys/export", post(handle_export_keys))
        .route("/keys/import", post(handle_import_keys))
        .route("/rooms/send-anyways", post(handle_send_anyways))
        .route("/rooms/cancel-sending", post(handle_cancel_sending))
        .route("/devices", get(handle_devices))
        .route("/devices/verify", post(handle_verify))
        .route("/devices/unverify", post(handle_unverify))
        .route("/devices/blacklist", post(handle_blacklist))
        .route("/devices/unblacklist", post(handle_unblacklist))
        .route("/verification/start", post(handle_start_verification))
        .route("/verification/cancel", post(handle_cancel_verification))
        .route("/verification/accept", post(handle_accept_verification))
        .route("/verification/confirm", post(handle_confirm_verification))
        .route("/signals", get(handle_signals))
        .with_state(state)
}

/// Start the IPC server on the given Unix socket path.
///
/// Removes any stale socket file before binding. Runs until the
/// shutdown signal is received.
pub async fn serve(
    socket_path: &Path,
    state: Arc<IpcState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "IPC server listening");

    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("IPC server shutting down");
        })
        .await?;

    std::fs::remove_file(socket_path).ok();
    Ok(())
}

/// Resolve the socket path from config or use the default.
pub fn socket_path_from_config(config: &AppConfig) -> PathBuf {
    config
        .ipc
        .socket_path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

fn stopped(e: BridgeError) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn accepted(id: MessageId) -> Json<CommandResponse> {
    Json(CommandResponse { id })
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health(State(state): State<Arc<IpcState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        build_profile: crate::build_info::BUILD_PROFILE.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        last_signal: state.signals.last_seq(),
    })
}

async fn handle_stop(State(state): State<Arc<IpcState>>) -> (StatusCode, Json<StopResponse>) {
    info!("Stop requested via IPC");
    let _ = state.shutdown_tx.send(ShutdownSignal);
    (
        StatusCode::OK,
        Json(StopResponse {
            acknowledged: true,
            message: "Shutdown initiated".to_string(),
        }),
    )
}

async fn handle_config(
    State(state): State<Arc<IpcState>>,
) -> Result<Json<ConfigResponse>, ApiError> {
    match toml::to_string_pretty(&state.config) {
        Ok(toml_str) => Ok(Json(ConfigResponse { toml: toml_str })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to serialize config: {e}"),
            }),
        )),
    }
}

async fn handle_servers(
    State(state): State<Arc<IpcState>>,
) -> Result<Json<ServersResponse>, ApiError> {
    let servers = state.queries.list_servers().await.map_err(stopped)?;
    Ok(Json(ServersResponse { servers }))
}

async fn handle_export_keys(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<KeysRequest>,
) -> Json<CommandResponse> {
    accepted(
        state
            .commands
            .export_keys(&req.pan_user, req.file_path, req.passphrase),
    )
}

async fn handle_import_keys(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<KeysRequest>,
) -> Json<CommandResponse> {
    accepted(
        state
            .commands
            .import_keys(&req.pan_user, req.file_path, req.passphrase),
    )
}

async fn handle_send_anyways(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<RoomRequest>,
) -> Json<CommandResponse> {
    accepted(state.commands.send_anyways(&req.pan_user, &req.room_id))
}

async fn handle_cancel_sending(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<RoomRequest>,
) -> Json<CommandResponse> {
    accepted(state.commands.cancel_sending(&req.pan_user, &req.room_id))
}

async fn handle_devices(
    State(state): State<Arc<IpcState>>,
    Query(query): Query<DevicesQuery>,
) -> Result<Json<DevicesResponse>, ApiError> {
    let devices = match &query.user_id {
        Some(user_id) => {
            state
                .queries
                .list_user_devices(&query.pan_user, user_id)
                .await
        }
        None => state.queries.list_devices(&query.pan_user).await,
    }
    .map_err(stopped)?;
    Ok(Json(DevicesResponse { devices }))
}

type DeviceOp = fn(&CommandHandle, &str, &str, &str) -> MessageId;

fn device_command(state: &IpcState, req: &DeviceRequest, op: DeviceOp) -> Json<CommandResponse> {
    accepted(op(
        &state.commands,
        &req.pan_user,
        &req.user_id,
        &req.device_id,
    ))
}

async fn handle_verify(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::verify)
}

async fn handle_unverify(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::unverify)
}

async fn handle_blacklist(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::blacklist)
}

async fn handle_unblacklist(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::unblacklist)
}

async fn handle_start_verification(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::start_key_verification)
}

async fn handle_cancel_verification(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::cancel_key_verification)
}

async fn handle_accept_verification(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::accept_key_verification)
}

async fn handle_confirm_verification(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    device_command(&state, &req, CommandHandle::confirm_key_verification)
}

async fn handle_signals(
    State(state): State<Arc<IpcState>>,
    Query(query): Query<SignalsQuery>,
) -> Json<SignalsResponse> {
    Json(SignalsResponse {
        signals: state.signals.since(query.after),
        last_seq: state.signals.last_seq(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CommandKind, DaemonResponse, DeviceTarget, Event};
    use crate::queue::{self, WorkerEndpoint};
    use crate::store::{DeviceRecord, MemoryStore, PanUser};
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.notifications.enabled = false;
        config.bridge.tick_interval_ms = 5;
        config.servers.push(panbridge_config::ServerConfig {
            name: "home".to_string(),
            homeserver: "https://home.example".to_string(),
        });
        config
    }

    /// Router over a bridge that is not running.
    fn test_state(store: MemoryStore) -> (Arc<IpcState>, Bridge, WorkerEndpoint) {
        let (queues, worker) = queue::channel();
        let bridge = Bridge::new(test_config(), Arc::new(store), queues);
        (Arc::new(IpcState::from_bridge(&bridge)), bridge, worker)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _bridge, _worker) = test_state(MemoryStore::new());
        let app = router(state);
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let health: HealthResponse = body_json(resp).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.last_signal, 0);
    }

    #[tokio::test]
    async fn test_stop_endpoint() {
        let (state, _bridge, _worker) = test_state(MemoryStore::new());
        let mut rx = state.shutdown_tx.subscribe();
        let app = router(state);

        let req = Request::post("/stop").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let stop: StopResponse = body_json(resp).await;
        assert!(stop.acknowledged);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_config_endpoint() {
        let (state, _bridge, _worker) = test_state(MemoryStore::new());
        let app = router(state);
        let req = Request::get("/config").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let config: ConfigResponse = body_json(resp).await;
        assert!(config.toml.contains("tick_interval_ms"));
    }

    #[tokio::test]
    async fn test_export_keys_returns_id_and_enqueues() {
        let (state, _bridge, mut worker) = test_state(MemoryStore::new());
        let app = router(state);

        let req = post_json(
            "/keys/export",
            serde_json::json!({
                "pan_user": "alice",
                "file_path": "/tmp/k.txt",
                "passphrase": "pw",
            }),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let accepted: CommandResponse = body_json(resp).await;
        let command = worker.commands.try_recv().unwrap();
        assert_eq!(command.id(), accepted.id);
        assert_eq!(command.kind().name(), "export_keys");
    }

    #[tokio::test]
    async fn test_device_routes_map_to_commands() {
        let (state, _bridge, mut worker) = test_state(MemoryStore::new());
        let app = router(state);
        let body = serde_json::json!({
            "pan_user": "alice",
            "user_id": "@bob:home",
            "device_id": "B1",
        });

        let routes = [
            "/devices/verify",
            "/devices/unverify",
            "/devices/blacklist",
            "/devices/unblacklist",
            "/verification/start",
            "/verification/cancel",
            "/verification/accept",
            "/verification/confirm",
        ];
        let mut ids = Vec::new();
        for uri in routes {
            let resp = app.clone().oneshot(post_json(uri, body.clone())).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
            let accepted: CommandResponse = body_json(resp).await;
            ids.push(accepted.id.get());
        }
        assert_eq!(ids, (0..8).collect::<Vec<u64>>());

        let target = DeviceTarget::new("@bob:home", "B1");
        let kinds: Vec<CommandKind> = std::iter::from_fn(|| worker.commands.try_recv())
            .map(|c| c.into_kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::DeviceVerify(target.clone()),
                CommandKind::DeviceUnverify(target.clone()),
                CommandKind::DeviceBlacklist(target.clone()),
                CommandKind::DeviceUnblacklist(target.clone()),
                CommandKind::StartSas(target.clone()),
                CommandKind::CancelSas(target.clone()),
                CommandKind::AcceptSas(target.clone()),
                CommandKind::ConfirmSas(target),
            ]
        );
    }

    #[tokio::test]
    async fn test_room_routes() {
        let (state, _bridge, mut worker) = test_state(MemoryStore::new());
        let app = router(state);
        let body = serde_json::json!({"pan_user": "alice", "room_id": "!r:example"});

        for uri in ["/rooms/send-anyways", "/rooms/cancel-sending"] {
            let resp = app.clone().oneshot(post_json(uri, body.clone())).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(
            worker.commands.try_recv().unwrap().kind().name(),
            "send_anyways"
        );
        assert_eq!(
            worker.commands.try_recv().unwrap().kind().name(),
            "cancel_sending"
        );
    }

    #[tokio::test]
    async fn test_queries_go_through_running_bridge() {
        let store = MemoryStore::new();
        store.add_user("home", PanUser::new("@alice:home", "ALICE"));
        store.upsert_device("@alice:home", DeviceRecord::new("@bob:home", "B1"));
        let (state, mut bridge, _worker) = test_state(store);
        let task = tokio::spawn(async move { bridge.run().await });
        let app = router(Arc::clone(&state));

        let req = Request::get("/servers").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let servers: ServersResponse = body_json(resp).await;
        assert_eq!(servers.servers["home"], vec![PanUser::new("@alice:home", "ALICE")]);

        let req = Request::get("/devices?pan_user=%40alice%3Ahome&user_id=%40bob%3Ahome")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let devices: DevicesResponse = body_json(resp).await;
        assert_eq!(devices.devices.len(), 1);

        let req = Request::get("/devices?pan_user=nobody")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let devices: DevicesResponse = body_json(resp).await;
        assert!(devices.devices.is_empty());

        state.shutdown_tx.send(ShutdownSignal).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_on_stopped_bridge_is_unavailable() {
        let (state, bridge, _worker) = test_state(MemoryStore::new());
        drop(bridge);
        let app = router(state);
        let req = Request::get("/servers").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_signals_endpoint_filters_by_seq() {
        let (state, mut bridge, worker) = test_state(MemoryStore::new());
        worker.events.send(Event::DaemonResponse(DaemonResponse::new(
            MessageId::new(0),
            "alice",
            "0",
            "ok",
        )));
        worker.events.send(Event::DaemonResponse(DaemonResponse::new(
            MessageId::new(1),
            "alice",
            "1",
            "failed",
        )));
        bridge.tick();
        bridge.tick();

        let app = router(state);
        let req = Request::get("/signals?after=1").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let signals: SignalsResponse = body_json(resp).await;
        assert_eq!(signals.last_seq, 2);
        assert_eq!(signals.signals.len(), 1);
        assert_eq!(
            signals.signals[0].signal.response_id(),
            Some(MessageId::new(1))
        );
    }
}
