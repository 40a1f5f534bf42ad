//! Integration tests for the lobby state machine: create/join/ready,
//! countdown lifecycle, disconnects, and teardown.
//!
//! Timer-driven tests run on tokio's paused clock so the countdown and the
//! post-game grace elapse deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use faceoff_protocol::{DeviceId, LobbyStatus};
use faceoff_server::broadcast::Broadcaster;
use faceoff_server::directory::InMemoryDirectory;
use faceoff_server::error::LobbyError;
use faceoff_server::events::NullEventSink;
use faceoff_server::hub::ConnectionHub;
use faceoff_server::matchmaking::{MatchQueue, Matchmaker};
use faceoff_server::persistence::NoopPersistence;
use faceoff_server::registry::{LeaveOutcome, LobbyRegistry, LobbySettings};

// =========================================================================
// Harness
// =========================================================================

struct Fixture {
    registry: Arc<LobbyRegistry>,
    matchmaker: Arc<Matchmaker>,
    broadcaster: Arc<Broadcaster>,
    hub: Arc<ConnectionHub>,
}

fn fixture() -> Fixture {
    let queue = Arc::new(MatchQueue::new());
    let broadcaster = Arc::new(Broadcaster::new());
    let directory = Arc::new(InMemoryDirectory::new());
    directory.insert("dev-a", "Alice");
    directory.insert("dev-b", "Bob");
    let registry = Arc::new(LobbyRegistry::new(
        LobbySettings::default(),
        Arc::clone(&queue),
        Arc::clone(&broadcaster),
        directory,
        Arc::new(NoopPersistence),
        Arc::new(NullEventSink),
    ));
    let matchmaker = Arc::new(Matchmaker::new(
        queue,
        Arc::clone(&registry),
        Arc::new(NullEventSink),
        Arc::new(NoopPersistence),
        30,
    ));
    let hub = Arc::new(ConnectionHub::new(
        Arc::clone(&registry),
        Arc::clone(&broadcaster),
    ));
    Fixture {
        registry,
        matchmaker,
        broadcaster,
        hub,
    }
}

fn dev(name: &str) -> DeviceId {
    DeviceId::from(name)
}

/// Collects every frame currently buffered on a subscription.
fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).expect("frame is JSON"));
    }
    frames
}

fn kinds(frames: &[serde_json::Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["type"].as_str().expect("frame has type").to_string())
        .collect()
}

/// Drives a fresh lobby with members a/b into the countdown state and
/// returns its code.
async fn start_countdown(f: &Fixture, a: &DeviceId, b: &DeviceId) -> String {
    let lobby = f.registry.create(a).await.expect("create");
    let code = lobby.code.clone();
    f.registry.join(b, &code).await.expect("join");
    f.registry.set_ready(a, true).await.expect("ready a");
    let after = f.registry.set_ready(b, true).await.expect("ready b");
    assert_eq!(after.status, LobbyStatus::Countdown);
    code
}

// =========================================================================
// Scenario: create → join → ready → countdown → game start → teardown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn full_flow_reaches_game_start_and_teardown() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");

    let lobby = f.registry.create(&a).await.unwrap();
    assert_eq!(lobby.status, LobbyStatus::Waiting);
    assert_eq!(lobby.current_players, 1);
    assert_eq!(lobby.players[0].user_name.as_deref(), Some("Alice"));

    let code = lobby.code.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.broadcaster.subscribe(&code, tx);

    let joined = f.registry.join(&b, &code).await.unwrap();
    assert_eq!(joined.current_players, 2);

    f.registry.set_ready(&a, true).await.unwrap();
    let after = f.registry.set_ready(&b, true).await.unwrap();
    assert_eq!(after.status, LobbyStatus::Countdown);
    assert!(after.countdown_start_time.is_some());
    assert!(after.players.iter().all(|p| p.is_ready));

    // Countdown (3 s) plus post-game grace (2 s) elapse on the paused clock.
    tokio::time::sleep(Duration::from_secs(6)).await;

    let frames = drain(&mut rx);
    assert_eq!(
        kinds(&frames),
        vec![
            "player_joined",
            "ready_status_changed",
            "ready_status_changed",
            "countdown_started",
            "countdown_tick",
            "countdown_tick",
            "countdown_tick",
            "game_started",
            "lobby_deleted",
        ]
    );

    let ticks: Vec<i64> = frames
        .iter()
        .filter(|f| f["type"] == "countdown_tick")
        .map(|f| f["data"]["seconds_remaining"].as_i64().unwrap())
        .collect();
    assert_eq!(ticks, vec![2, 1, 0]);

    let game_started = frames.iter().find(|f| f["type"] == "game_started").unwrap();
    assert_eq!(game_started["data"]["lobby_code"], code.as_str());

    let deleted = frames.last().unwrap();
    assert_eq!(deleted["data"]["reason"], "game_started");

    assert!(f.registry.status(&a).await.is_none());
    assert!(f.registry.status(&b).await.is_none());
    assert_eq!(f.registry.lobby_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn terminal_lobby_rejects_mutations_until_grace_expires() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");
    let code = start_countdown(&f, &a, &b).await;

    // Past the countdown, inside the 2 s grace window.
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let snapshot = f.registry.status(&a).await.expect("still readable");
    assert_eq!(snapshot.status, LobbyStatus::GameStarted);

    assert!(matches!(
        f.registry.set_ready(&a, false).await,
        Err(LobbyError::InvalidState)
    ));
    assert!(matches!(
        f.registry.join(&dev("dev-c"), &code).await,
        Err(LobbyError::NotJoinable)
    ));
    assert_eq!(f.registry.leave(&a, false).await, LeaveOutcome::Terminal);
    assert!(matches!(
        f.registry.create(&a).await,
        Err(LobbyError::AlreadyInLobby)
    ));

    // Grace expires; the lobby is gone and the device is free again.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(f.registry.status(&a).await.is_none());
    f.registry.create(&a).await.expect("free after teardown");
}

// =========================================================================
// Scenario: unready aborts the countdown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn unready_during_countdown_aborts_it() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");
    let code = start_countdown(&f, &a, &b).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    f.broadcaster.subscribe(&code, tx);

    // Let one tick out, then go unready.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let snapshot = f.registry.set_ready(&a, false).await.unwrap();
    assert_eq!(snapshot.status, LobbyStatus::Waiting);
    assert!(snapshot.countdown_start_time.is_none());
    assert!(snapshot.players.iter().all(|p| !p.is_ready));

    // No tick of the cancelled instance may surface afterwards.
    tokio::time::sleep(Duration::from_secs(10)).await;

    let frames = drain(&mut rx);
    assert_eq!(
        kinds(&frames),
        vec!["countdown_tick", "ready_status_changed", "countdown_aborted"]
    );
    assert_eq!(f.registry.lobby_count().await, 1);
}

// =========================================================================
// Scenario: disconnect during countdown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn disconnect_during_countdown_aborts_and_leaves() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");
    let code = start_countdown(&f, &a, &b).await;

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    f.broadcaster.subscribe(&code, tx_a);
    let (tx_b, _rx_b) = mpsc::unbounded_channel();
    let b_subscription = f.hub.connect(&code, &b, tx_b).await.unwrap();

    // B's socket drops mid-countdown.
    f.hub.disconnect(&code, &b, b_subscription).await;

    let frames = drain(&mut rx_a);
    assert_eq!(kinds(&frames), vec!["countdown_aborted", "player_left"]);

    let left = frames.last().unwrap();
    assert_eq!(left["data"]["device_id"], "dev-b");
    assert_eq!(left["data"]["lobby"]["current_players"], 1);
    assert_eq!(left["data"]["lobby"]["status"], "waiting");
    assert_eq!(left["data"]["lobby"]["players"][0]["is_ready"], false);

    // The cancelled countdown never starts the game.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let frames = drain(&mut rx_a);
    assert!(kinds(&frames).is_empty());

    assert!(f.registry.status(&b).await.is_none());
    let remaining = f.registry.status(&a).await.unwrap();
    assert_eq!(remaining.status, LobbyStatus::Waiting);
}

// =========================================================================
// Scenario: last leaver deletes the lobby
// =========================================================================

#[tokio::test(start_paused = true)]
async fn last_leaver_deletes_lobby_without_player_left() {
    let f = fixture();
    let a = dev("dev-a");

    let lobby = f.registry.create(&a).await.unwrap();
    let code = lobby.code.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.broadcaster.subscribe(&code, tx);

    assert_eq!(f.registry.leave(&a, false).await, LeaveOutcome::Deleted);

    let frames = drain(&mut rx);
    assert_eq!(kinds(&frames), vec!["lobby_deleted"]);
    assert_eq!(frames[0]["data"]["reason"], "empty");

    assert_eq!(f.registry.lobby_count().await, 0);
    assert_eq!(f.broadcaster.subscriber_count(&code), 0);
}

// =========================================================================
// Membership and ready-flag rules
// =========================================================================

#[tokio::test]
async fn device_holds_at_most_one_membership() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");

    let lobby = f.registry.create(&a).await.unwrap();
    assert!(matches!(
        f.registry.create(&a).await,
        Err(LobbyError::AlreadyInLobby)
    ));

    let other = f.registry.create(&b).await.unwrap();
    assert!(matches!(
        f.registry.join(&a, &other.code).await,
        Err(LobbyError::AlreadyInLobby)
    ));
    // Joining the own lobby is the same error.
    assert!(matches!(
        f.registry.join(&a, &lobby.code).await,
        Err(LobbyError::AlreadyInLobby)
    ));
}

#[tokio::test]
async fn join_validates_code_and_capacity() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");
    let c = dev("dev-c");

    let lobby = f.registry.create(&a).await.unwrap();

    assert!(matches!(
        f.registry.join(&b, "QQQQ").await,
        Err(LobbyError::NotFound)
    ));
    assert!(matches!(
        f.registry.join(&b, "toolong").await,
        Err(LobbyError::NotFound)
    ));

    // Codes are case-insensitive on input.
    let joined = f.registry.join(&b, &lobby.code.to_lowercase()).await.unwrap();
    assert_eq!(joined.current_players, 2);

    assert!(matches!(
        f.registry.join(&c, &lobby.code).await,
        Err(LobbyError::Full)
    ));
}

#[tokio::test]
async fn membership_change_resets_ready_flags() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");

    let lobby = f.registry.create(&a).await.unwrap();
    let ready = f.registry.set_ready(&a, true).await.unwrap();
    assert!(ready.players[0].is_ready);
    assert_eq!(ready.status, LobbyStatus::Waiting);

    // The join resets A's flag; the post-join snapshot shows nobody ready.
    let joined = f.registry.join(&b, &lobby.code).await.unwrap();
    assert!(joined.players.iter().all(|p| !p.is_ready));
}

#[tokio::test]
async fn leave_resets_remaining_ready_flags() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");

    let lobby = f.registry.create(&a).await.unwrap();
    f.registry.join(&b, &lobby.code).await.unwrap();
    f.registry.set_ready(&a, true).await.unwrap();

    assert_eq!(f.registry.leave(&b, false).await, LeaveOutcome::Left);
    let snapshot = f.registry.status(&a).await.unwrap();
    assert_eq!(snapshot.current_players, 1);
    assert!(!snapshot.players[0].is_ready);
    assert_eq!(snapshot.status, LobbyStatus::Waiting);
}

#[tokio::test]
async fn ready_without_membership_is_rejected() {
    let f = fixture();
    assert!(matches!(
        f.registry.set_ready(&dev("dev-x"), true).await,
        Err(LobbyError::NotInLobby)
    ));
    assert_eq!(f.registry.leave(&dev("dev-x"), false).await, LeaveOutcome::NotMember);
    assert!(f.registry.status(&dev("dev-x")).await.is_none());
}

#[tokio::test]
async fn repeated_ready_is_a_silent_no_op() {
    let f = fixture();
    let a = dev("dev-a");

    let lobby = f.registry.create(&a).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.broadcaster.subscribe(&lobby.code, tx);

    let first = f.registry.set_ready(&a, true).await.unwrap();
    assert_eq!(kinds(&drain(&mut rx)), vec!["ready_status_changed"]);

    // Second identical call: same state back, no event published.
    let second = f.registry.set_ready(&a, true).await.unwrap();
    assert_eq!(second.players[0].is_ready, first.players[0].is_ready);
    assert!(drain(&mut rx).is_empty());
}

// =========================================================================
// Socket gate and invite codes
// =========================================================================

#[tokio::test]
async fn hub_rejects_non_members() {
    let f = fixture();
    let a = dev("dev-a");
    let lobby = f.registry.create(&a).await.unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        f.hub.connect(&lobby.code, &dev("dev-x"), tx).await,
        Err(LobbyError::NotInLobby)
    ));
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        f.hub.connect("ZZZZ", &a, tx).await,
        Err(LobbyError::NotFound)
    ));
}

#[tokio::test]
async fn hub_connect_pushes_initial_snapshot() {
    let f = fixture();
    let a = dev("dev-a");
    let lobby = f.registry.create(&a).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    f.hub.connect(&lobby.code, &a, tx).await.unwrap();

    let frames = drain(&mut rx);
    assert_eq!(kinds(&frames), vec!["player_joined"]);
    assert_eq!(frames[0]["data"]["lobby"]["code"], lobby.code.as_str());
}

#[tokio::test]
async fn live_lobby_codes_are_pairwise_distinct() {
    let f = fixture();
    let mut codes = std::collections::HashSet::new();
    for i in 0..50 {
        let lobby = f.registry.create(&dev(&format!("dev-{i}"))).await.unwrap();
        assert!(codes.insert(lobby.code.clone()), "duplicate code {}", lobby.code);
    }
    assert_eq!(f.registry.lobby_count().await, 50);
}

#[tokio::test]
async fn snapshot_invariants_hold_at_rest() {
    let f = fixture();
    let a = dev("dev-a");
    let b = dev("dev-b");

    let lobby = f.registry.create(&a).await.unwrap();
    f.matchmaker.find_match(&dev("dev-q")).await.unwrap();
    f.registry.join(&b, &lobby.code).await.unwrap();

    let snapshot = f.registry.status(&a).await.unwrap();
    assert_eq!(snapshot.current_players, snapshot.players.len());
    assert!(snapshot.current_players >= 1 && snapshot.current_players <= snapshot.max_players);
    // Countdown state and its timestamp travel together.
    assert_eq!(
        snapshot.status == LobbyStatus::Countdown,
        snapshot.countdown_start_time.is_some()
    );
}
