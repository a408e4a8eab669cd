//! Shared request/response types for the control socket.
//!
//! These types are serialized as JSON over the Unix domain socket
//! transport. Both the IPC server (bridge) and client (`panctl`) use
//! these types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::message::Passphrase;
use crate::signals::SignalRecord;
use crate::store::{DeviceRecord, UsersSnapshot};

/// Bridge health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
    pub uptime_secs: u64,
    /// Sequence number of the most recent signal.
    pub last_signal: u64,
}

/// Bridge shutdown response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub acknowledged: bool,
    pub message: String,
}

/// Configuration response (serialized TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub toml: String,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Correlation id of an enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: MessageId,
}

/// Key export or import request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysRequest {
    pub pan_user: String,
    pub file_path: PathBuf,
    pub passphrase: Passphrase,
}

/// Request addressing a room on behalf of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRequest {
    pub pan_user: String,
    pub room_id: String,
}

/// Request addressing a remote device on behalf of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub pan_user: String,
    pub user_id: String,
    pub device_id: String,
}

/// Query string of `GET /devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesQuery {
    pub pan_user: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceRecord>,
}

/// Accounts per configured server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: UsersSnapshot,
}

/// Query string of `GET /signals`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalsQuery {
    #[serde(default)]
    pub after: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsResponse {
    pub signals: Vec<SignalRecord>,
    pub last_seq: u64,
}
