//! The lobby state machine: membership, ready flags, status transitions.
//!
//! Lock discipline (fixed order, no exceptions):
//!   queue mutex  →  registry index mutex  →  per-lobby mutex
//!
//! The index mutex guards the `code → lobby` and `device → lobby` maps plus
//! the lobby table; each lobby's own mutex serializes every mutation and
//! read of that lobby. Broadcast publishes are issued inside the lobby
//! section so the embedded snapshot always equals the post-mutation state;
//! delivery itself is non-suspending (unbounded channels). Nothing sleeps
//! or does I/O while holding any of the three locks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use faceoff_protocol::{
    DeletionReason, DeviceId, LobbyEvent, LobbyId, LobbyInfo, LobbyStatus, PlayerInfo,
};

use crate::broadcast::Broadcaster;
use crate::code::{is_valid_code, CodeMint};
use crate::countdown;
use crate::directory::PlayerDirectory;
use crate::error::LobbyError;
use crate::events::{EventKind, EventSink};
use crate::matchmaking::MatchQueue;
use crate::persistence::Persistence;

/// Tunables threaded through from `ServerConfig`.
#[derive(Debug, Clone)]
pub struct LobbySettings {
    pub max_players: usize,
    pub code_length: usize,
    pub countdown_seconds: u32,
    pub post_game_grace_seconds: u64,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            max_players: 2,
            code_length: 4,
            countdown_seconds: 3,
            post_game_grace_seconds: 2,
        }
    }
}

/// One seated member. Insertion order is the per-lobby ordering.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub device_id: DeviceId,
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
}

/// Mutable state of a single lobby, guarded by its own mutex.
pub(crate) struct LobbyState {
    pub id: LobbyId,
    pub code: String,
    pub status: LobbyStatus,
    pub max_players: usize,
    pub members: Vec<Member>,
    pub countdown_start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every transition away from `Countdown`. An in-flight tick
    /// re-reads it before publishing, which makes cancellation observable
    /// without killing the timer task.
    pub countdown_generation: u64,
}

impl LobbyState {
    fn member_index(&self, device_id: &DeviceId) -> Option<usize> {
        self.members.iter().position(|m| m.device_id == *device_id)
    }

    fn is_full(&self) -> bool {
        self.members.len() >= self.max_players
    }

    fn all_ready(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.is_ready)
    }

    fn reset_ready(&mut self) {
        for member in &mut self.members {
            member.is_ready = false;
        }
    }
}

type SharedLobby = Arc<Mutex<LobbyState>>;

/// The maps behind the index mutex. Always locked before any lobby mutex.
#[derive(Default)]
struct RegistryIndex {
    lobbies: HashMap<LobbyId, SharedLobby>,
    by_code: HashMap<String, LobbyId>,
    by_device: HashMap<DeviceId, LobbyId>,
}

/// What `leave` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The device was not in any lobby.
    NotMember,
    /// The device left; the lobby still has members.
    Left,
    /// The device was the last member; the lobby is gone.
    Deleted,
    /// The lobby already reached `game_started`; nothing was changed.
    Terminal,
}

/// Authoritative owner of every lobby and membership in the process.
pub struct LobbyRegistry {
    index: Mutex<RegistryIndex>,
    mint: CodeMint,
    settings: LobbySettings,
    queue: Arc<MatchQueue>,
    broadcaster: Arc<Broadcaster>,
    directory: Arc<dyn PlayerDirectory>,
    persistence: Arc<dyn Persistence>,
    events: Arc<dyn EventSink>,
}

impl LobbyRegistry {
    pub fn new(
        settings: LobbySettings,
        queue: Arc<MatchQueue>,
        broadcaster: Arc<Broadcaster>,
        directory: Arc<dyn PlayerDirectory>,
        persistence: Arc<dyn Persistence>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            index: Mutex::new(RegistryIndex::default()),
            mint: CodeMint::new(settings.code_length),
            settings,
            queue,
            broadcaster,
            directory,
            persistence,
            events,
        }
    }

    pub(crate) fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    /// Creates a lobby with the caller as its first (unready) member.
    pub async fn create(&self, device_id: &DeviceId) -> Result<LobbyInfo, LobbyError> {
        // The queue lock is held until membership is established, so a
        // concurrent find_match cannot pair this device mid-create.
        let mut queue = self.queue.inner.lock().await;
        let mut index = self.index.lock().await;
        if index.by_device.contains_key(device_id) {
            return Err(LobbyError::AlreadyInLobby);
        }
        if queue.remove(device_id) {
            self.record_queue_leave(device_id);
        }
        drop(queue);

        let now = Utc::now();
        let code = self.mint.mint(|candidate| index.by_code.contains_key(candidate));
        let id = LobbyId::new();
        let state = LobbyState {
            id,
            code: code.clone(),
            status: LobbyStatus::Waiting,
            max_players: self.settings.max_players,
            members: vec![Member {
                device_id: device_id.clone(),
                is_ready: false,
                joined_at: now,
            }],
            countdown_start_time: None,
            created_at: now,
            updated_at: now,
            countdown_generation: 0,
        };
        let snapshot = self.snapshot(&state);
        index.lobbies.insert(id, Arc::new(Mutex::new(state)));
        index.by_code.insert(code.clone(), id);
        index.by_device.insert(device_id.clone(), id);
        drop(index);

        tracing::info!(%id, %code, %device_id, "lobby created");
        self.events.record(
            EventKind::LobbyCreated,
            Some(device_id),
            json!({ "lobby_code": code, "creator": device_id.as_str() }),
        );
        self.mirror(snapshot.clone());
        Ok(snapshot)
    }

    /// Joins an existing lobby by invite code.
    pub async fn join(&self, device_id: &DeviceId, code: &str) -> Result<LobbyInfo, LobbyError> {
        let code = code.trim().to_uppercase();
        if !is_valid_code(&code, self.settings.code_length) {
            return Err(LobbyError::NotFound);
        }

        let mut queue = self.queue.inner.lock().await;
        let mut index = self.index.lock().await;
        if index.by_device.contains_key(device_id) {
            return Err(LobbyError::AlreadyInLobby);
        }
        let lobby_id = *index.by_code.get(&code).ok_or(LobbyError::NotFound)?;
        let shared = Arc::clone(index.lobbies.get(&lobby_id).ok_or(LobbyError::NotFound)?);
        let mut state = shared.lock().await;
        if !state.status.is_joinable() {
            return Err(LobbyError::NotJoinable);
        }
        if state.is_full() {
            return Err(LobbyError::Full);
        }

        if queue.remove(device_id) {
            self.record_queue_leave(device_id);
        }
        drop(queue);
        index.by_device.insert(device_id.clone(), lobby_id);
        drop(index);

        // Any membership change resets ready flags.
        state.reset_ready();
        state.members.push(Member {
            device_id: device_id.clone(),
            is_ready: false,
            joined_at: Utc::now(),
        });
        state.updated_at = Utc::now();
        let snapshot = self.snapshot(&state);
        self.broadcaster.publish(
            &state.code,
            LobbyEvent::PlayerJoined {
                lobby: snapshot.clone(),
            },
        );
        drop(state);

        tracing::info!(%code, %device_id, players = snapshot.current_players, "player joined");
        self.events.record(
            EventKind::LobbyJoined,
            Some(device_id),
            json!({
                "lobby_code": code,
                "joiner": device_id.as_str(),
                "current_players": snapshot.current_players,
            }),
        );
        self.mirror(snapshot.clone());
        Ok(snapshot)
    }

    /// Removes the device from its lobby, if any, and applies departure
    /// recomputation: cancel the countdown, clear ready flags, delete the
    /// lobby when it empties. `disconnected` only changes the event kind
    /// written to the sink.
    pub async fn leave(&self, device_id: &DeviceId, disconnected: bool) -> LeaveOutcome {
        let mut index = self.index.lock().await;
        let Some(&lobby_id) = index.by_device.get(device_id) else {
            return LeaveOutcome::NotMember;
        };
        let Some(shared) = index.lobbies.get(&lobby_id).map(Arc::clone) else {
            index.by_device.remove(device_id);
            return LeaveOutcome::NotMember;
        };
        let mut state = shared.lock().await;
        if state.status.is_terminal() {
            // Deletion is already scheduled; the post-game socket teardown
            // must not mutate a finished lobby.
            return LeaveOutcome::Terminal;
        }
        let Some(position) = state.member_index(device_id) else {
            index.by_device.remove(device_id);
            return LeaveOutcome::NotMember;
        };

        index.by_device.remove(device_id);
        state.members.remove(position);
        let was_countdown = state.status == LobbyStatus::Countdown;
        state.countdown_generation += 1;
        state.countdown_start_time = None;
        state.updated_at = Utc::now();
        let code = state.code.clone();

        let leave_kind = if disconnected {
            EventKind::LobbyLeftOnDisconnect
        } else {
            EventKind::LobbyLeft
        };

        if state.members.is_empty() {
            index.by_code.remove(&code);
            index.lobbies.remove(&lobby_id);
            drop(index);

            // The departure and the deletion coincide: player_left is
            // elided and only lobby_deleted goes out.
            self.broadcaster.publish(
                &code,
                LobbyEvent::LobbyDeleted {
                    reason: DeletionReason::Empty,
                },
            );
            let last_activity = state.updated_at;
            drop(state);
            self.broadcaster.release(&code);

            tracing::info!(%code, %device_id, "last member left, lobby deleted");
            self.events.record(
                leave_kind,
                Some(device_id),
                json!({ "lobby_code": code, "leaver": device_id.as_str(), "remaining_players": 0 }),
            );
            self.events.record(
                EventKind::LobbyDeleted,
                None,
                json!({
                    "lobby_code": code,
                    "reason": "empty",
                    "last_activity": last_activity.to_rfc3339(),
                }),
            );
            let persistence = Arc::clone(&self.persistence);
            tokio::spawn(async move { persistence.remove_lobby(lobby_id).await });
            return LeaveOutcome::Deleted;
        }

        drop(index);
        state.reset_ready();
        state.status = LobbyStatus::Waiting;
        let snapshot = self.snapshot(&state);
        if was_countdown {
            self.broadcaster.publish(
                &code,
                LobbyEvent::CountdownAborted {
                    lobby: snapshot.clone(),
                },
            );
            self.events.record(
                EventKind::CountdownAborted,
                Some(device_id),
                json!({ "lobby_code": code, "trigger_player": device_id.as_str() }),
            );
        }
        self.broadcaster.publish(
            &code,
            LobbyEvent::PlayerLeft {
                device_id: device_id.clone(),
                lobby: snapshot.clone(),
            },
        );
        drop(state);

        tracing::info!(%code, %device_id, players = snapshot.current_players, "player left");
        self.events.record(
            leave_kind,
            Some(device_id),
            json!({
                "lobby_code": code,
                "leaver": device_id.as_str(),
                "remaining_players": snapshot.current_players,
            }),
        );
        self.mirror(snapshot);
        LeaveOutcome::Left
    }

    /// Updates a member's ready flag and recomputes the lobby status.
    ///
    /// A call that does not change the flag is a full no-op: no event is
    /// published and no status is recomputed. Going unready during the
    /// countdown cancels it and clears every ready flag.
    pub async fn set_ready(
        self: &Arc<Self>,
        device_id: &DeviceId,
        is_ready: bool,
    ) -> Result<LobbyInfo, LobbyError> {
        let index = self.index.lock().await;
        let &lobby_id = index.by_device.get(device_id).ok_or(LobbyError::NotInLobby)?;
        let shared = Arc::clone(index.lobbies.get(&lobby_id).ok_or(LobbyError::NotInLobby)?);
        let mut state = shared.lock().await;
        drop(index);

        if state.status.is_terminal() {
            return Err(LobbyError::InvalidState);
        }
        let position = state.member_index(device_id).ok_or(LobbyError::NotInLobby)?;
        if state.members[position].is_ready == is_ready {
            return Ok(self.snapshot(&state));
        }

        state.members[position].is_ready = is_ready;
        state.updated_at = Utc::now();
        let code = state.code.clone();

        if !is_ready && state.status == LobbyStatus::Countdown {
            // Unready during countdown: cancel the timer, clear all flags.
            state.countdown_generation += 1;
            state.countdown_start_time = None;
            state.reset_ready();
            state.status = LobbyStatus::Waiting;
            let snapshot = self.snapshot(&state);
            self.broadcaster.publish(
                &code,
                LobbyEvent::ReadyStatusChanged {
                    device_id: device_id.clone(),
                    is_ready: false,
                    lobby: snapshot.clone(),
                },
            );
            self.broadcaster.publish(
                &code,
                LobbyEvent::CountdownAborted {
                    lobby: snapshot.clone(),
                },
            );
            drop(state);

            tracing::info!(%code, %device_id, "countdown aborted by unready");
            self.record_ready_toggle(device_id, &snapshot);
            self.events.record(
                EventKind::CountdownAborted,
                Some(device_id),
                json!({ "lobby_code": code, "trigger_player": device_id.as_str() }),
            );
            self.mirror(snapshot.clone());
            return Ok(snapshot);
        }

        if state.is_full() && state.all_ready() {
            // ready_check collapses into the countdown start; the transient
            // status is never observable at rest.
            state.status = LobbyStatus::Countdown;
            state.countdown_start_time = Some(Utc::now());
            state.countdown_generation += 1;
            let generation = state.countdown_generation;
            let snapshot = self.snapshot(&state);
            self.broadcaster.publish(
                &code,
                LobbyEvent::ReadyStatusChanged {
                    device_id: device_id.clone(),
                    is_ready,
                    lobby: snapshot.clone(),
                },
            );
            self.broadcaster.publish(
                &code,
                LobbyEvent::CountdownStarted {
                    lobby: snapshot.clone(),
                },
            );
            drop(state);

            tracing::info!(%code, "all players ready, countdown started");
            self.record_ready_toggle(device_id, &snapshot);
            self.events.record(
                EventKind::CountdownStarted,
                None,
                json!({ "lobby_code": code }),
            );
            countdown::spawn_countdown(Arc::clone(self), lobby_id, generation);
            self.mirror(snapshot.clone());
            return Ok(snapshot);
        }

        state.status = LobbyStatus::Waiting;
        let snapshot = self.snapshot(&state);
        self.broadcaster.publish(
            &code,
            LobbyEvent::ReadyStatusChanged {
                device_id: device_id.clone(),
                is_ready,
                lobby: snapshot.clone(),
            },
        );
        drop(state);

        self.record_ready_toggle(device_id, &snapshot);
        self.mirror(snapshot.clone());
        Ok(snapshot)
    }

    /// Current lobby snapshot for a device, if it is seated anywhere.
    pub async fn status(&self, device_id: &DeviceId) -> Option<LobbyInfo> {
        let index = self.index.lock().await;
        let lobby_id = *index.by_device.get(device_id)?;
        let shared = Arc::clone(index.lobbies.get(&lobby_id)?);
        let state = shared.lock().await;
        drop(index);
        Some(self.snapshot(&state))
    }

    /// Creates a lobby seating two matched devices, both unready.
    ///
    /// Called by the matchmaker with the queue lock held; seat 1 is the
    /// earlier queuer.
    pub async fn pair(
        &self,
        first: &DeviceId,
        second: &DeviceId,
    ) -> Result<LobbyInfo, LobbyError> {
        let mut index = self.index.lock().await;
        if index.by_device.contains_key(first) || index.by_device.contains_key(second) {
            return Err(LobbyError::AlreadyInLobby);
        }

        let now = Utc::now();
        let code = self.mint.mint(|candidate| index.by_code.contains_key(candidate));
        let id = LobbyId::new();
        let state = LobbyState {
            id,
            code: code.clone(),
            status: LobbyStatus::Waiting,
            max_players: self.settings.max_players,
            members: vec![
                Member {
                    device_id: first.clone(),
                    is_ready: false,
                    joined_at: now,
                },
                Member {
                    device_id: second.clone(),
                    is_ready: false,
                    joined_at: now,
                },
            ],
            countdown_start_time: None,
            created_at: now,
            updated_at: now,
            countdown_generation: 0,
        };
        let shared = Arc::new(Mutex::new(state));
        index.lobbies.insert(id, Arc::clone(&shared));
        index.by_code.insert(code.clone(), id);
        index.by_device.insert(first.clone(), id);
        index.by_device.insert(second.clone(), id);

        let state = shared.lock().await;
        drop(index);
        let snapshot = self.snapshot(&state);
        // One player_joined per seat, in insertion order.
        self.broadcaster.publish(
            &code,
            LobbyEvent::PlayerJoined {
                lobby: snapshot.clone(),
            },
        );
        self.broadcaster.publish(
            &code,
            LobbyEvent::PlayerJoined {
                lobby: snapshot.clone(),
            },
        );
        drop(state);

        tracing::info!(%id, %code, %first, %second, "matchmaking lobby created");
        self.events.record(
            EventKind::MatchmakingMatchFound,
            None,
            json!({
                "lobby_code": code,
                "player1": first.as_str(),
                "player2": second.as_str(),
            }),
        );
        self.mirror(snapshot.clone());
        Ok(snapshot)
    }

    /// Lobby id a device is currently seated in, if any.
    pub async fn membership(&self, device_id: &DeviceId) -> Option<LobbyId> {
        self.index.lock().await.by_device.get(device_id).copied()
    }

    /// Snapshot of the lobby behind an invite code, if it is live.
    pub async fn snapshot_by_code(&self, code: &str) -> Option<LobbyInfo> {
        let code = code.trim().to_uppercase();
        let index = self.index.lock().await;
        let lobby_id = *index.by_code.get(&code)?;
        let shared = Arc::clone(index.lobbies.get(&lobby_id)?);
        let state = shared.lock().await;
        drop(index);
        Some(self.snapshot(&state))
    }

    /// Number of live lobbies.
    pub async fn lobby_count(&self) -> usize {
        self.index.lock().await.lobbies.len()
    }

    // -----------------------------------------------------------------
    // Countdown hooks (called from the countdown worker task)
    // -----------------------------------------------------------------

    /// Publishes one tick for the given countdown instance. Returns `false`
    /// when the instance is stale (lobby gone, status moved, or a cancel
    /// bumped the generation) so the worker stops silently.
    pub(crate) async fn publish_tick(
        &self,
        lobby_id: LobbyId,
        generation: u64,
        seconds_remaining: u32,
    ) -> bool {
        let index = self.index.lock().await;
        let Some(shared) = index.lobbies.get(&lobby_id).map(Arc::clone) else {
            return false;
        };
        let state = shared.lock().await;
        drop(index);
        if state.status != LobbyStatus::Countdown || state.countdown_generation != generation {
            return false;
        }
        let snapshot = self.snapshot(&state);
        self.broadcaster.publish(
            &state.code,
            LobbyEvent::CountdownTick {
                seconds_remaining,
                lobby: snapshot,
            },
        );
        true
    }

    /// Final countdown transition: `countdown → game_started`. Returns the
    /// lobby code for the grace period, or `None` if the instance is stale.
    pub(crate) async fn complete_countdown(
        &self,
        lobby_id: LobbyId,
        generation: u64,
    ) -> Option<String> {
        let index = self.index.lock().await;
        let shared = index.lobbies.get(&lobby_id).map(Arc::clone)?;
        let mut state = shared.lock().await;
        drop(index);
        if state.status != LobbyStatus::Countdown || state.countdown_generation != generation {
            return None;
        }
        state.status = LobbyStatus::GameStarted;
        state.updated_at = Utc::now();
        let code = state.code.clone();
        self.broadcaster.publish(
            &code,
            LobbyEvent::GameStarted {
                lobby_code: code.clone(),
            },
        );
        let snapshot = self.snapshot(&state);
        drop(state);

        tracing::info!(%code, "game started");
        self.events
            .record(EventKind::GameStarted, None, json!({ "lobby_code": code }));
        self.mirror(snapshot);
        Some(code)
    }

    /// Post-grace teardown of a started lobby: drop it from every index,
    /// announce the deletion, release the topic.
    pub(crate) async fn finalize_game(&self, lobby_id: LobbyId) {
        let mut index = self.index.lock().await;
        let Some(shared) = index.lobbies.remove(&lobby_id) else {
            return;
        };
        let state = shared.lock().await;
        index.by_code.remove(&state.code);
        index.by_device.retain(|_, id| *id != lobby_id);
        drop(index);
        let code = state.code.clone();
        let last_activity = state.updated_at;
        self.broadcaster.publish(
            &code,
            LobbyEvent::LobbyDeleted {
                reason: DeletionReason::GameStarted,
            },
        );
        drop(state);
        self.broadcaster.release(&code);

        tracing::info!(%code, "lobby removed after game start");
        self.events.record(
            EventKind::LobbyDeleted,
            None,
            json!({
                "lobby_code": code,
                "reason": "game_started",
                "last_activity": last_activity.to_rfc3339(),
            }),
        );
        let persistence = Arc::clone(&self.persistence);
        tokio::spawn(async move { persistence.remove_lobby(lobby_id).await });
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    fn snapshot(&self, state: &LobbyState) -> LobbyInfo {
        LobbyInfo {
            id: state.id,
            code: state.code.clone(),
            status: state.status,
            max_players: state.max_players,
            current_players: state.members.len(),
            players: state
                .members
                .iter()
                .map(|m| PlayerInfo {
                    device_id: m.device_id.clone(),
                    user_name: self.directory.resolve(&m.device_id),
                    is_ready: m.is_ready,
                    joined_at: m.joined_at,
                })
                .collect(),
            countdown_start_time: state.countdown_start_time,
            created_at: state.created_at,
        }
    }

    fn record_ready_toggle(&self, device_id: &DeviceId, snapshot: &LobbyInfo) {
        let member_ready = snapshot
            .players
            .iter()
            .find(|p| p.device_id == *device_id)
            .map(|p| p.is_ready)
            .unwrap_or(false);
        self.events.record(
            EventKind::ReadyToggle,
            Some(device_id),
            json!({
                "lobby_code": snapshot.code,
                "device_id": device_id.as_str(),
                "is_ready": member_ready,
                "lobby_status": snapshot.status.to_string(),
            }),
        );
    }

    fn record_queue_leave(&self, device_id: &DeviceId) {
        self.events.record(
            EventKind::MatchmakingQueueLeave,
            Some(device_id),
            json!({ "device_id": device_id.as_str() }),
        );
        let persistence = Arc::clone(&self.persistence);
        let device_id = device_id.clone();
        tokio::spawn(async move { persistence.queue_left(&device_id).await });
    }

    fn mirror(&self, snapshot: LobbyInfo) {
        let persistence = Arc::clone(&self.persistence);
        tokio::spawn(async move { persistence.mirror_lobby(&snapshot).await });
    }
}
