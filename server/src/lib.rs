//! faceoff-server: real-time matchmaking and lobby coordinator for 1-vs-1
//! game sessions.
//!
//! Players identified by an opaque device id are assembled into two-seat
//! lobbies, either by invite code or through a FIFO matchmaking queue. Each
//! lobby runs a ready-check → countdown → game-started state machine and
//! fans out live updates to subscribed WebSocket clients.
//!
//! Layering, leaves first: code minting and the event sink feed the
//! [`registry::LobbyRegistry`], which owns all lobby state; the
//! [`matchmaking::Matchmaker`] pairs waiters through the registry; the
//! [`hub::ConnectionHub`] routes socket disconnects back into it; the REST
//! and WebSocket handlers in [`rest`] and [`ws`] are thin adaptors on top.

pub mod broadcast;
pub mod builder;
pub mod code;
mod countdown;
pub mod directory;
pub mod error;
pub mod events;
pub mod hub;
pub mod matchmaking;
pub mod persistence;
pub mod registry;
pub mod rest;
pub mod ws;

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use crate::broadcast::Broadcaster;
use crate::directory::PlayerDirectory;
use crate::events::EventSink;
use crate::hub::ConnectionHub;
use crate::matchmaking::{MatchQueue, Matchmaker};
use crate::persistence::Persistence;
use crate::registry::{LobbyRegistry, LobbySettings};
use crate::rest::AppState;
use crate::ws::WsState;

pub use builder::ServerBuilder;
pub use error::LobbyError;
pub use faceoff_protocol as protocol;

/// Configuration for the coordinator process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server.
    pub http_addr: String,
    /// Countdown length before game start.
    pub countdown_seconds: u32,
    /// Grace between `game_started` and lobby deletion.
    pub post_game_grace_seconds: u64,
    /// Invite code length.
    pub code_length: usize,
    /// Seats per lobby.
    pub max_players: usize,
    /// Fixed wait estimate reported to queued players.
    pub queue_eta_seconds: u64,
    /// Opaque connection string handed to the persistence layer, if one is
    /// injected. The coordinator itself never interprets it.
    pub persistence_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            countdown_seconds: 3,
            post_game_grace_seconds: 2,
            code_length: 4,
            max_players: 2,
            queue_eta_seconds: 30,
            persistence_url: None,
        }
    }
}

impl ServerConfig {
    /// Reads overrides from the environment. Unparseable values fall back
    /// to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_addr: env::var("FACEOFF_HTTP_ADDR").unwrap_or(defaults.http_addr),
            countdown_seconds: env_parse("COUNTDOWN_SECONDS", defaults.countdown_seconds),
            post_game_grace_seconds: env_parse(
                "POST_GAME_GRACE_SECONDS",
                defaults.post_game_grace_seconds,
            ),
            code_length: env_parse("CODE_LENGTH", defaults.code_length),
            max_players: env_parse("MAX_PLAYERS", defaults.max_players),
            queue_eta_seconds: env_parse("QUEUE_ETA_SECONDS", defaults.queue_eta_seconds),
            persistence_url: env::var("FACEOFF_PERSISTENCE_URL").ok(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// The coordinator service: builds the component graph and serves it.
pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) directory: Arc<dyn PlayerDirectory>,
    pub(crate) persistence: Arc<dyn Persistence>,
    pub(crate) event_sink: Arc<dyn EventSink>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Wires the singletons together and runs the HTTP server until
    /// shutdown.
    pub async fn run(self) -> std::io::Result<()> {
        let settings = LobbySettings {
            max_players: self.config.max_players,
            code_length: self.config.code_length,
            countdown_seconds: self.config.countdown_seconds,
            post_game_grace_seconds: self.config.post_game_grace_seconds,
        };

        let queue = Arc::new(MatchQueue::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let registry = Arc::new(LobbyRegistry::new(
            settings,
            Arc::clone(&queue),
            Arc::clone(&broadcaster),
            Arc::clone(&self.directory),
            Arc::clone(&self.persistence),
            Arc::clone(&self.event_sink),
        ));
        let matchmaker = Arc::new(Matchmaker::new(
            queue,
            Arc::clone(&registry),
            Arc::clone(&self.event_sink),
            Arc::clone(&self.persistence),
            self.config.queue_eta_seconds,
        ));
        let hub = Arc::new(ConnectionHub::new(
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
        ));

        let app_state = web::Data::new(AppState {
            registry,
            matchmaker,
        });
        let ws_state = web::Data::new(WsState { hub });

        tracing::info!(
            addr = %self.config.http_addr,
            countdown_seconds = self.config.countdown_seconds,
            "faceoff coordinator listening"
        );

        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(app_state.clone())
                .app_data(ws_state.clone())
                .route("/health", web::get().to(rest::health))
                .route("/lobby/create", web::post().to(rest::create_lobby))
                .route("/lobby/join", web::post().to(rest::join_lobby))
                .route("/lobby/leave", web::post().to(rest::leave_lobby))
                .route("/lobby/ready", web::post().to(rest::set_ready))
                .route("/lobby/status", web::get().to(rest::lobby_status))
                .route("/lobby/find_match", web::post().to(rest::find_match))
                .route("/lobby/leave_queue", web::post().to(rest::leave_queue))
                .route("/lobby/queue_status", web::get().to(rest::queue_status))
                .route("/ws/lobby/{code}", web::get().to(ws::lobby_ws))
        })
        .bind(&self.config.http_addr)?
        .run()
        .await
    }
}
