//! In-memory snapshots of users and devices used to answer queries.
//!
//! The cache is never the source of truth. Each refresh loads a complete
//! snapshot from the [`PanStore`] and swaps it in whole; nothing is patched
//! incrementally. A failed load leaves the previous snapshot untouched.

use crate::store::{DeviceRecord, DeviceSnapshot, PanStore, StoreError, UsersSnapshot};

#[derive(Debug, Default)]
pub struct StateCache {
    users: UsersSnapshot,
    devices: DeviceSnapshot,
}

impl StateCache {
    /// An empty cache. Queries against it return empty results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the users map for the given servers. Returns the number of
    /// accounts now cached.
    pub fn refresh_users(
        &mut self,
        store: &dyn PanStore,
        servers: &[String],
    ) -> Result<usize, StoreError> {
        let mut users = UsersSnapshot::new();
        for server in servers {
            users.insert(server.clone(), store.load_users(server)?);
        }
        self.users = users;
        Ok(self.users.values().map(Vec::len).sum())
    }

    /// Rebuild the devices map. Returns the number of devices now cached.
    pub fn refresh_devices(&mut self, store: &dyn PanStore) -> Result<usize, StoreError> {
        self.devices = store.load_all_devices()?;
        Ok(self
            .devices
            .values()
            .flat_map(|users| users.values())
            .map(|devices| devices.len())
            .sum())
    }

    /// Accounts per server.
    pub fn users(&self) -> &UsersSnapshot {
        &self.users
    }

    /// Every device known to `pan_user`, ordered by user id then device id.
    pub fn devices(&self, pan_user: &str) -> Vec<DeviceRecord> {
        self.devices
            .get(pan_user)
            .map(|users| {
                users
                    .values()
                    .flat_map(|devices| devices.values().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Devices of `user_id` as known to `pan_user`.
    pub fn user_devices(&self, pan_user: &str, user_id: &str) -> Vec<DeviceRecord> {
        self.devices
            .get(pan_user)
            .and_then(|users| users.get(user_id))
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default()
    }
}
