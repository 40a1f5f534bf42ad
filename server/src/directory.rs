//! Display-name resolution for devices.

use dashmap::DashMap;
use faceoff_protocol::DeviceId;

/// Resolves a device id to a player's display name.
///
/// The coordinator treats the directory as read-only; an unknown device is
/// simply rendered with `user_name: null` in snapshots.
pub trait PlayerDirectory: Send + Sync {
    fn resolve(&self, device_id: &DeviceId) -> Option<String>;
}

/// In-memory directory, for development and tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    names: DashMap<DeviceId, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device_id: impl Into<DeviceId>, name: impl Into<String>) {
        self.names.insert(device_id.into(), name.into());
    }
}

impl PlayerDirectory for InMemoryDirectory {
    fn resolve(&self, device_id: &DeviceId) -> Option<String> {
        self.names.get(device_id).map(|name| name.clone())
    }
}

/// Directory that knows nobody.
pub struct AnonymousDirectory;

impl PlayerDirectory for AnonymousDirectory {
    fn resolve(&self, _device_id: &DeviceId) -> Option<String> {
        None
    }
}
