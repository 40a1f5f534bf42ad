//! Tracks live sockets per (lobby code, device) and routes disconnects
//! into the registry.

use std::sync::Arc;

use dashmap::DashMap;

use faceoff_protocol::{DeviceId, LobbyEvent};

use crate::broadcast::{Broadcaster, EventSender, SubscriberId};
use crate::error::LobbyError;
use crate::registry::LobbyRegistry;

/// The only path by which a socket disconnect influences lobby state.
/// HTTP-initiated leave is independent and does not require a socket.
pub struct ConnectionHub {
    registry: Arc<LobbyRegistry>,
    broadcaster: Arc<Broadcaster>,
    /// Current subscription per seat. A reconnect replaces the old entry.
    connections: DashMap<(String, DeviceId), SubscriberId>,
}

impl ConnectionHub {
    pub fn new(registry: Arc<LobbyRegistry>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            registry,
            broadcaster,
            connections: DashMap::new(),
        }
    }

    /// Whether the device currently holds a seat in the lobby behind `code`.
    pub async fn is_member(&self, code: &str, device_id: &DeviceId) -> bool {
        match self.registry.snapshot_by_code(code).await {
            Some(snapshot) => snapshot.players.iter().any(|p| p.device_id == *device_id),
            None => false,
        }
    }

    /// Registers a socket for a lobby member and pushes the current lobby
    /// snapshot to it. Fails when the lobby is gone or the device holds no
    /// seat in it.
    pub async fn connect(
        &self,
        code: &str,
        device_id: &DeviceId,
        sender: EventSender,
    ) -> Result<SubscriberId, LobbyError> {
        let code = code.trim().to_uppercase();
        let snapshot = self
            .registry
            .snapshot_by_code(&code)
            .await
            .ok_or(LobbyError::NotFound)?;
        if !snapshot.players.iter().any(|p| p.device_id == *device_id) {
            return Err(LobbyError::NotInLobby);
        }

        let id = self.broadcaster.subscribe(&code, sender);
        if let Some(previous) = self
            .connections
            .insert((code.clone(), device_id.clone()), id)
        {
            self.broadcaster.unsubscribe(&code, previous);
        }
        self.broadcaster
            .send_to(&code, id, LobbyEvent::PlayerJoined { lobby: snapshot });
        tracing::debug!(%code, %device_id, "socket subscribed");
        Ok(id)
    }

    /// Socket closed. Membership leaves first (with the disconnect flag),
    /// then the subscription is dropped. A stale socket that was already
    /// replaced by a reconnect for the same seat only loses its
    /// subscription and does not touch lobby state.
    pub async fn disconnect(&self, code: &str, device_id: &DeviceId, id: SubscriberId) {
        let code = code.trim().to_uppercase();
        let key = (code.clone(), device_id.clone());
        let current = self.connections.get(&key).map(|entry| *entry);
        if current != Some(id) {
            self.broadcaster.unsubscribe(&code, id);
            return;
        }
        self.connections.remove(&key);
        self.registry.leave(device_id, true).await;
        self.broadcaster.unsubscribe(&code, id);
        tracing::debug!(%code, %device_id, "socket disconnected");
    }
}
