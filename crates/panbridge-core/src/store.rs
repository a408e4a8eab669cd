//! Read-only view of the proxy's persistent store.
//!
//! The bridge never writes through this trait. It asks for whole snapshots
//! when the state cache is (re)built and treats every answer as a complete
//! replacement of what it held before.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// A proxy account on one homeserver: the Matrix user id and the device
/// the proxy logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanUser {
    pub user_id: String,
    pub device_id: String,
}

impl PanUser {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

/// A remote device as known to one proxy account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub user_id: String,
    pub device_id: String,
    #[serde(default)]
    pub display_name: String,
    /// Ed25519 fingerprint key.
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub blacklisted: bool,
}

impl DeviceRecord {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn blacklisted(mut self, blacklisted: bool) -> Self {
        self.blacklisted = blacklisted;
        self
    }
}

/// Devices of one account, keyed by user id then device id.
pub type UserDevices = BTreeMap<String, BTreeMap<String, DeviceRecord>>;

/// All known devices: pan user → user id → device id → record.
pub type DeviceSnapshot = BTreeMap<String, UserDevices>;

/// Accounts per server name.
pub type UsersSnapshot = BTreeMap<String, Vec<PanUser>>;

/// Errors from the storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

/// Snapshot provider consumed when the state cache is rebuilt.
pub trait PanStore: Send + Sync {
    /// Accounts registered on the named server.
    fn load_users(&self, server: &str) -> Result<Vec<PanUser>, StoreError>;

    /// Every account across all servers.
    fn load_all_users(&self) -> Result<Vec<PanUser>, StoreError>;

    /// Every device known to every account.
    fn load_all_devices(&self) -> Result<DeviceSnapshot, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    users: UsersSnapshot,
    devices: DeviceSnapshot,
}

/// In-memory [`PanStore`] shared between the daemon that writes it and the
/// bridge that reads it. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write leaves the maps whole, so a poisoned lock stays usable.
    fn read_inner(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the account list of one server.
    pub fn set_users(&self, server: &str, users: Vec<PanUser>) {
        let mut inner = self.write_inner();
        inner.users.insert(server.to_string(), users);
    }

    /// Register an account on a server.
    pub fn add_user(&self, server: &str, user: PanUser) {
        let mut inner = self.write_inner();
        inner.users.entry(server.to_string()).or_default().push(user);
    }

    /// Forget every account of a server.
    pub fn remove_server(&self, server: &str) {
        let mut inner = self.write_inner();
        inner.users.remove(server);
    }

    /// Insert or replace a device record for an account.
    pub fn upsert_device(&self, pan_user: &str, device: DeviceRecord) {
        let mut inner = self.write_inner();
        inner
            .devices
            .entry(pan_user.to_string())
            .or_default()
            .entry(device.user_id.clone())
            .or_default()
            .insert(device.device_id.clone(), device);
    }

    /// Replace every device of every account.
    pub fn set_devices(&self, devices: DeviceSnapshot) {
        let mut inner = self.write_inner();
        inner.devices = devices;
    }
}

impl PanStore for MemoryStore {
    fn load_users(&self, server: &str) -> Result<Vec<PanUser>, StoreError> {
        let inner = self.read_inner();
        Ok(inner.users.get(server).cloned().unwrap_or_default())
    }

    fn load_all_users(&self) -> Result<Vec<PanUser>, StoreError> {
        let inner = self.read_inner();
        Ok(inner.users.values().flatten().cloned().collect())
    }

    fn load_all_devices(&self) -> Result<DeviceSnapshot, StoreError> {
        let inner = self.read_inner();
        Ok(inner.devices.clone())
    }
}

/// On-disk snapshot written by an out-of-process worker.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(default)]
    pub users: UsersSnapshot,
    #[serde(default)]
    pub devices: DeviceSnapshot,
}

/// [`PanStore`] that re-reads a JSON [`SnapshotFile`] on every load.
///
/// The worker rewrites the file and then raises `UpdateUsers` or
/// `UpdateDevices`. A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct SnapshotFileStore {
    path: PathBuf,
}

impl SnapshotFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SnapshotFile, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SnapshotFile::default());
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "{}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&text)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }
}

impl PanStore for SnapshotFileStore {
    fn load_users(&self, server: &str) -> Result<Vec<PanUser>, StoreError> {
        Ok(self.read()?.users.remove(server).unwrap_or_default())
    }

    fn load_all_users(&self) -> Result<Vec<PanUser>, StoreError> {
        Ok(self.read()?.users.into_values().flatten().collect())
    }

    fn load_all_devices(&self) -> Result<DeviceSnapshot, StoreError> {
        Ok(self.read()?.devices)
    }
}
