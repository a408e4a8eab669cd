//! IPC client: connects to the bridge over a Unix domain socket.
//!
//! Provides a typed client for `panctl` to issue commands, query the state
//! cache and follow signals. Uses `hyper` for HTTP/1.1 over the Unix socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::debug;

use super::types::*;
use crate::ids::MessageId;
use crate::message::Passphrase;
use crate::signals::SignalRecord;

/// How often [`IpcClient::wait_for_response`] polls for new signals.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to bridge socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bridge is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bridge returned error: {0}")]
    BridgeError(String),

    #[error("no response for command {id} within {timeout:?}")]
    Timeout { id: MessageId, timeout: Duration },

    #[error("signals after {after} were evicted before the response to command {id} was seen")]
    Missed { id: MessageId, after: u64 },
}

/// Client for the panbridge control socket.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the bridge socket exists (bridge is likely running).
    pub fn bridge_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send an HTTP request over the Unix socket using hyper and return the response body.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<Bytes, IpcClientError> {
        if !self.bridge_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                })?;

        let io = TokioIo::new(stream);

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, http_body_util::Full<Bytes>>(io)
                .await
                .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        // Drive the connection in the background
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "IPC connection error");
            }
        });

        debug!(method, path, "IPC request");

        let http_method = method
            .parse::<hyper::Method>()
            .map_err(|e| IpcClientError::Request(format!("invalid method: {e}")))?;

        let req_body = match body {
            Some(data) => http_body_util::Full::new(Bytes::copy_from_slice(data)),
            None => http_body_util::Full::new(Bytes::new()),
        };

        let mut builder = hyper::Request::builder()
            .method(http_method)
            .uri(path)
            .header("host", "localhost");

        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }

        let req = builder
            .body(req_body)
            .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| IpcClientError::Request(format!("request failed: {e}")))?;

        let status = resp.status();

        let resp_body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&resp_body) {
                return Err(IpcClientError::BridgeError(err.error));
            }
            return Err(IpcClientError::Request(format!(
                "unexpected status: {status}"
            )));
        }

        Ok(resp_body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, IpcClientError> {
        let body = self.request("GET", path, None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("{what}: {e}")))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        req: &B,
    ) -> Result<T, IpcClientError> {
        let body_bytes = serde_json::to_vec(req)
            .map_err(|e| IpcClientError::Parse(format!("failed to serialize request: {e}")))?;
        let body = self.request("POST", path, Some(&body_bytes)).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("{path}: {e}")))
    }

    async fn command<B: Serialize>(&self, path: &str, req: &B) -> Result<MessageId, IpcClientError> {
        let resp: CommandResponse = self.post(path, req).await?;
        Ok(resp.id)
    }

    async fn device_command(
        &self,
        path: &str,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        let req = DeviceRequest {
            pan_user: pan_user.to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
        };
        self.command(path, &req).await
    }

    // ── Typed API methods ──────────────────────────────────────────────

    /// Is the bridge running and responsive?
    pub async fn health(&self) -> Result<HealthResponse, IpcClientError> {
        self.get("/health", "health").await
    }

    /// Request bridge shutdown.
    pub async fn stop(&self) -> Result<StopResponse, IpcClientError> {
        let body = self.request("POST", "/stop", None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("stop: {e}")))
    }

    /// Get the bridge's current config as TOML.
    pub async fn config(&self) -> Result<ConfigResponse, IpcClientError> {
        self.get("/config", "config").await
    }

    /// Accounts per configured server.
    pub async fn servers(&self) -> Result<ServersResponse, IpcClientError> {
        self.get("/servers", "servers").await
    }

    pub async fn export_keys(
        &self,
        pan_user: &str,
        file_path: impl Into<PathBuf>,
        passphrase: impl Into<Passphrase>,
    ) -> Result<MessageId, IpcClientError> {
        let req = KeysRequest {
            pan_user: pan_user.to_string(),
            file_path: file_path.into(),
            passphrase: passphrase.into(),
        };
        self.command("/keys/export", &req).await
    }

    pub async fn import_keys(
        &self,
        pan_user: &str,
        file_path: impl Into<PathBuf>,
        passphrase: impl Into<Passphrase>,
    ) -> Result<MessageId, IpcClientError> {
        let req = KeysRequest {
            pan_user: pan_user.to_string(),
            file_path: file_path.into(),
            passphrase: passphrase.into(),
        };
        self.command("/keys/import", &req).await
    }

    pub async fn send_anyways(
        &self,
        pan_user: &str,
        room_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        let req = RoomRequest {
            pan_user: pan_user.to_string(),
            room_id: room_id.to_string(),
        };
        self.command("/rooms/send-anyways", &req).await
    }

    pub async fn cancel_sending(
        &self,
        pan_user: &str,
        room_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        let req = RoomRequest {
            pan_user: pan_user.to_string(),
            room_id: room_id.to_string(),
        };
        self.command("/rooms/cancel-sending", &req).await
    }

    /// Devices known to `pan_user`, optionally narrowed to one user.
    pub async fn devices(
        &self,
        pan_user: &str,
        user_id: Option<&str>,
    ) -> Result<DevicesResponse, IpcClientError> {
        let mut path = format!("/devices?pan_user={}", urlencoding::encode(pan_user));
        if let Some(user_id) = user_id {
            path.push_str("&user_id=");
            path.push_str(&urlencoding::encode(user_id));
        }
        self.get(&path, "devices").await
    }

    pub async fn verify(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/devices/verify", pan_user, user_id, device_id)
            .await
    }

    pub async fn unverify(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/devices/unverify", pan_user, user_id, device_id)
            .await
    }

    pub async fn blacklist(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/devices/blacklist", pan_user, user_id, device_id)
            .await
    }

    pub async fn unblacklist(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/devices/unblacklist", pan_user, user_id, device_id)
            .await
    }

    pub async fn start_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/verification/start", pan_user, user_id, device_id)
            .await
    }

    pub async fn cancel_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/verification/cancel", pan_user, user_id, device_id)
            .await
    }

    pub async fn accept_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/verification/accept", pan_user, user_id, device_id)
            .await
    }

    pub async fn confirm_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<MessageId, IpcClientError> {
        self.device_command("/verification/confirm", pan_user, user_id, device_id)
            .await
    }

    /// Signals emitted after sequence number `after`.
    pub async fn signals(&self, after: u64) -> Result<SignalsResponse, IpcClientError> {
        self.get(&format!("/signals?after={after}"), "signals").await
    }

    /// Poll signals until the `Response` for `id` shows up.
    ///
    /// The bridge never expires a command on its own; giving up after
    /// `timeout` is the caller's decision. Signals emitted before `after`
    /// are not searched, so pass the `last_seq` observed before issuing the
    /// command.
    ///
    /// The bridge keeps only the last `signal_history` signals. If more than
    /// that are emitted between two polls, signals the client has not seen
    /// yet may be gone; this is reported as [`IpcClientError::Missed`] rather
    /// than waiting out the timeout.
    pub async fn wait_for_response(
        &self,
        id: MessageId,
        after: u64,
        timeout: Duration,
    ) -> Result<SignalRecord, IpcClientError> {
        let poll = async {
            let mut cursor = after;
            loop {
                let batch = self.signals(cursor).await?;
                if let Some(found) = batch
                    .signals
                    .iter()
                    .find(|r| r.signal.response_id() == Some(id))
                {
                    return Ok(found.clone());
                }
                let oldest = batch
                    .signals
                    .first()
                    .map_or(batch.last_seq + 1, |r| r.seq);
                if oldest > cursor + 1 {
                    return Err(IpcClientError::Missed { id, after: cursor });
                }
                cursor = cursor.max(batch.last_seq);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| IpcClientError::Timeout { id, timeout })?
    }
}
