//! Wire types shared between the faceoff coordinator and its clients.
//!
//! Everything here crosses a serialization boundary: REST bodies, the
//! WebSocket event frames, and the lobby snapshots embedded in both.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque device identifier presented by clients in the `X-Device-ID` header.
///
/// The coordinator never interprets it beyond non-emptiness; name resolution
/// is delegated to the player directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(pub Uuid);

impl LobbyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LobbyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a lobby.
///
/// `ReadyCheck` is transient: the coordinator enters it only inside the
/// critical section that starts the countdown, so external reads observe
/// `Waiting`, `Countdown` or `GameStarted` at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    ReadyCheck,
    Countdown,
    GameStarted,
}

impl LobbyStatus {
    /// Whether new members may join a lobby in this state.
    pub fn is_joinable(&self) -> bool {
        matches!(self, LobbyStatus::Waiting)
    }

    /// Terminal lobbies accept no further mutations.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LobbyStatus::GameStarted)
    }
}

impl fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LobbyStatus::Waiting => "waiting",
            LobbyStatus::ReadyCheck => "ready_check",
            LobbyStatus::Countdown => "countdown",
            LobbyStatus::GameStarted => "game_started",
        };
        f.write_str(s)
    }
}

/// One seated player, as rendered in lobby snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub device_id: DeviceId,
    pub user_name: Option<String>,
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
}

/// A point-in-time snapshot of a lobby.
///
/// Every broadcast event that carries a lobby embeds the snapshot taken
/// under the same critical section as the mutation it announces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyInfo {
    pub id: LobbyId,
    pub code: String,
    pub status: LobbyStatus,
    pub max_players: usize,
    pub current_players: usize,
    pub players: Vec<PlayerInfo>,
    pub countdown_start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Why a lobby was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    GameStarted,
    Empty,
}

/// Typed events fanned out on a lobby's broadcast topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LobbyEvent {
    PlayerJoined {
        lobby: LobbyInfo,
    },
    PlayerLeft {
        device_id: DeviceId,
        lobby: LobbyInfo,
    },
    ReadyStatusChanged {
        device_id: DeviceId,
        is_ready: bool,
        lobby: LobbyInfo,
    },
    CountdownStarted {
        lobby: LobbyInfo,
    },
    CountdownTick {
        seconds_remaining: u32,
        lobby: LobbyInfo,
    },
    CountdownAborted {
        lobby: LobbyInfo,
    },
    GameStarted {
        lobby_code: String,
    },
    LobbyDeleted {
        reason: DeletionReason,
    },
    Error {
        error_code: String,
        message: String,
    },
}

impl LobbyEvent {
    /// The wire name of this event, matching the `type` field of the frame.
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyEvent::PlayerJoined { .. } => "player_joined",
            LobbyEvent::PlayerLeft { .. } => "player_left",
            LobbyEvent::ReadyStatusChanged { .. } => "ready_status_changed",
            LobbyEvent::CountdownStarted { .. } => "countdown_started",
            LobbyEvent::CountdownTick { .. } => "countdown_tick",
            LobbyEvent::CountdownAborted { .. } => "countdown_aborted",
            LobbyEvent::GameStarted { .. } => "game_started",
            LobbyEvent::LobbyDeleted { .. } => "lobby_deleted",
            LobbyEvent::Error { .. } => "error",
        }
    }
}

/// A framed broadcast message as delivered on the wire:
/// `{"type": ..., "data": ..., "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyMessage {
    #[serde(flatten)]
    pub event: LobbyEvent,
    pub timestamp: DateTime<Utc>,
}

impl LobbyMessage {
    pub fn new(event: LobbyEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// REST bodies
// ---------------------------------------------------------------------------

/// Body of `POST /lobby/join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinLobbyRequest {
    pub code: String,
}

/// Body of `POST /lobby/ready`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReadyRequest {
    pub is_ready: bool,
}

/// Response for lobby operations that return a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lobby: Option<LobbyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LobbyResponse {
    pub fn with_lobby(lobby: LobbyInfo, message: impl Into<String>) -> Self {
        Self {
            success: true,
            lobby: Some(lobby),
            message: Some(message.into()),
        }
    }
}

/// Response for operations that only acknowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

/// Response for `POST /lobby/find_match`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingResponse {
    pub success: bool,
    pub in_queue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lobby: Option<LobbyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response for `GET /lobby/queue_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    pub success: bool,
    pub in_queue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_time: Option<u64>,
}

/// Structured error body: `{success, error: {kind, message}, status_code}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
    pub status_code: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}
