//! Optional mirroring of coordinator state to a durable store.
//!
//! In-memory state is authoritative for a lobby's whole lifetime; the mirror
//! exists for observability. Mirror failures are logged by the
//! implementation and never roll back anything in memory. On restart the
//! coordinator starts empty and treats whatever was persisted as advisory.

use async_trait::async_trait;
use faceoff_protocol::{DeviceId, LobbyId, LobbyInfo};

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Upserts the current snapshot of a lobby.
    async fn mirror_lobby(&self, lobby: &LobbyInfo);

    /// Removes a lobby from the store.
    async fn remove_lobby(&self, lobby_id: LobbyId);

    /// Records that a device entered the matchmaking queue.
    async fn queue_entered(&self, device_id: &DeviceId);

    /// Records that a device left the matchmaking queue.
    async fn queue_left(&self, device_id: &DeviceId);
}

/// Default store: keeps nothing.
pub struct NoopPersistence;

#[async_trait]
impl Persistence for NoopPersistence {
    async fn mirror_lobby(&self, _lobby: &LobbyInfo) {}
    async fn remove_lobby(&self, _lobby_id: LobbyId) {}
    async fn queue_entered(&self, _device_id: &DeviceId) {}
    async fn queue_left(&self, _device_id: &DeviceId) {}
}
