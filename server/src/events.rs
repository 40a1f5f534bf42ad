//! Append-only structured log of lobby events.

use faceoff_protocol::DeviceId;
use serde_json::Value;

/// Everything the coordinator records about lobby and queue lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LobbyCreated,
    LobbyJoined,
    LobbyLeft,
    LobbyLeftOnDisconnect,
    ReadyToggle,
    CountdownStarted,
    CountdownAborted,
    GameStarted,
    LobbyDeleted,
    MatchmakingQueueJoin,
    MatchmakingQueueLeave,
    MatchmakingMatchFound,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LobbyCreated => "lobby_created",
            EventKind::LobbyJoined => "lobby_joined",
            EventKind::LobbyLeft => "lobby_left",
            EventKind::LobbyLeftOnDisconnect => "lobby_left_on_disconnect",
            EventKind::ReadyToggle => "ready_toggle",
            EventKind::CountdownStarted => "countdown_started",
            EventKind::CountdownAborted => "countdown_aborted",
            EventKind::GameStarted => "game_started",
            EventKind::LobbyDeleted => "lobby_deleted",
            EventKind::MatchmakingQueueJoin => "matchmaking_queue_join",
            EventKind::MatchmakingQueueLeave => "matchmaking_queue_leave",
            EventKind::MatchmakingMatchFound => "matchmaking_match_found",
        }
    }
}

/// Best-effort append-only sink. A sink failure must never fail the
/// operation that produced the event.
pub trait EventSink: Send + Sync {
    fn record(&self, kind: EventKind, device_id: Option<&DeviceId>, fields: Value);
}

/// Forwards events to the `lobby_events` tracing target.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, kind: EventKind, device_id: Option<&DeviceId>, fields: Value) {
        tracing::info!(
            target: "lobby_events",
            event = kind.as_str(),
            device_id = device_id.map(DeviceId::as_str).unwrap_or("-"),
            %fields,
        );
    }
}

/// Discards everything. Used in tests that don't assert on the log.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _kind: EventKind, _device_id: Option<&DeviceId>, _fields: Value) {}
}
