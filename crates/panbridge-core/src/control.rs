//! The control surface: command operations that enqueue work for the worker
//! and return a correlation id at once, plus read-only queries answered from
//! the state cache.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::StateCache;
use crate::ids::{IdAllocator, MessageId};
use crate::message::{Command, CommandKind, DeviceTarget, Passphrase};
use crate::queue::CommandSender;
use crate::store::{DeviceRecord, PanStore, UsersSnapshot};

/// Cheap, cloneable handle that turns operations into queued commands.
///
/// Every method builds exactly one [`Command`], enqueues it without blocking
/// and returns the id embedded in it. The caller matches that id against a
/// later `Response` signal to learn the outcome.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    ids: Arc<IdAllocator>,
    queue: CommandSender,
}

impl CommandHandle {
    pub fn new(ids: Arc<IdAllocator>, queue: CommandSender) -> Self {
        Self { ids, queue }
    }

    fn submit(&self, pan_user: &str, kind: CommandKind) -> MessageId {
        let id = self.ids.next();
        debug!(id = %id, pan_user, kind = kind.name(), "Enqueueing command");
        self.queue.send(Command::new(id, pan_user, kind));
        id
    }

    fn submit_device(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
        kind: fn(DeviceTarget) -> CommandKind,
    ) -> MessageId {
        self.submit(pan_user, kind(DeviceTarget::new(user_id, device_id)))
    }

    /// Number of commands issued through this handle's allocator.
    pub fn issued(&self) -> u64 {
        self.ids.issued()
    }

    pub fn export_keys(
        &self,
        pan_user: &str,
        file_path: impl Into<PathBuf>,
        passphrase: impl Into<Passphrase>,
    ) -> MessageId {
        self.submit(
            pan_user,
            CommandKind::ExportKeys {
                file_path: file_path.into(),
                passphrase: passphrase.into(),
            },
        )
    }

    pub fn import_keys(
        &self,
        pan_user: &str,
        file_path: impl Into<PathBuf>,
        passphrase: impl Into<Passphrase>,
    ) -> MessageId {
        self.submit(
            pan_user,
            CommandKind::ImportKeys {
                file_path: file_path.into(),
                passphrase: passphrase.into(),
            },
        )
    }

    /// Send the held-back message to a room despite unverified devices.
    pub fn send_anyways(&self, pan_user: &str, room_id: &str) -> MessageId {
        self.submit(
            pan_user,
            CommandKind::SendAnyways {
                room_id: room_id.to_string(),
            },
        )
    }

    /// Drop the held-back message for a room.
    pub fn cancel_sending(&self, pan_user: &str, room_id: &str) -> MessageId {
        self.submit(
            pan_user,
            CommandKind::CancelSending {
                room_id: room_id.to_string(),
            },
        )
    }

    pub fn verify(&self, pan_user: &str, user_id: &str, device_id: &str) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::DeviceVerify)
    }

    pub fn unverify(&self, pan_user: &str, user_id: &str, device_id: &str) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::DeviceUnverify)
    }

    pub fn blacklist(&self, pan_user: &str, user_id: &str, device_id: &str) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::DeviceBlacklist)
    }

    pub fn unblacklist(&self, pan_user: &str, user_id: &str, device_id: &str) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::DeviceUnblacklist)
    }

    pub fn start_key_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::StartSas)
    }

    pub fn cancel_key_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::CancelSas)
    }

    pub fn accept_key_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::AcceptSas)
    }

    pub fn confirm_key_verification(
        &self,
        pan_user: &str,
        user_id: &str,
        device_id: &str,
    ) -> MessageId {
        self.submit_device(pan_user, user_id, device_id, CommandKind::ConfirmSas)
    }
}

/// Command handle plus the state cache it answers queries from.
///
/// Lives in the presentation context; only the dispatch loop refreshes the
/// cache, and queries run on the same task.
pub struct ControlSurface {
    commands: CommandHandle,
    store: Arc<dyn PanStore>,
    servers: Vec<String>,
    cache: StateCache,
}

impl ControlSurface {
    /// Build the surface and populate the cache from the store.
    ///
    /// A store failure here is logged and leaves the cache empty; queries
    /// still answer (with empty results) until a later refresh succeeds.
    pub fn new(commands: CommandHandle, store: Arc<dyn PanStore>, servers: Vec<String>) -> Self {
        let mut surface = Self {
            commands,
            store,
            servers,
            cache: StateCache::new(),
        };
        surface.update_users();
        surface.update_devices();
        surface
    }

    pub fn commands(&self) -> &CommandHandle {
        &self.commands
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Rebuild the users snapshot from the store.
    pub fn update_users(&mut self) {
        match self.cache.refresh_users(self.store.as_ref(), &self.servers) {
            Ok(count) => info!(servers = self.servers.len(), users = count, "Users cache rebuilt"),
            Err(e) => warn!(error = %e, "Failed to reload users, keeping previous snapshot"),
        }
    }

    /// Rebuild the devices snapshot from the store.
    pub fn update_devices(&mut self) {
        match self.cache.refresh_devices(self.store.as_ref()) {
            Ok(count) => info!(devices = count, "Devices cache rebuilt"),
            Err(e) => warn!(error = %e, "Failed to reload devices, keeping previous snapshot"),
        }
    }

    /// Accounts per configured server.
    pub fn list_servers(&self) -> UsersSnapshot {
        self.cache.users().clone()
    }

    /// Every device known to `pan_user`; empty for unknown accounts.
    pub fn list_devices(&self, pan_user: &str) -> Vec<DeviceRecord> {
        self.cache.devices(pan_user)
    }

    /// Devices of one user as known to `pan_user`; empty when absent.
    pub fn list_user_devices(&self, pan_user: &str, user_id: &str) -> Vec<DeviceRecord> {
        self.cache.user_devices(pan_user, user_id)
    }
}
