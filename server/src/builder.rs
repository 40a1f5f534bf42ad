//! Builder wiring the coordinator's injected services together.

use std::sync::Arc;

use crate::directory::{AnonymousDirectory, PlayerDirectory};
use crate::events::{EventSink, TracingEventSink};
use crate::persistence::{NoopPersistence, Persistence};
use crate::{Server, ServerConfig};

/// Builder for a [`Server`]. Every capability has a working default: the
/// anonymous directory, the no-op persistence store, and the tracing event
/// sink.
pub struct ServerBuilder {
    config: ServerConfig,
    directory: Option<Arc<dyn PlayerDirectory>>,
    persistence: Option<Arc<dyn Persistence>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            directory: None,
            persistence: None,
            event_sink: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP bind address.
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http_addr = addr.into();
        self
    }

    /// Sets the countdown length in seconds.
    pub fn countdown_seconds(mut self, seconds: u32) -> Self {
        self.config.countdown_seconds = seconds;
        self
    }

    /// Injects the player directory used for display-name resolution.
    pub fn player_directory(mut self, directory: Arc<dyn PlayerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Injects a durable store mirroring lobby and queue state.
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Injects the structured lobby event sink.
    pub fn event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(event_sink);
        self
    }

    pub fn build(self) -> Server {
        Server {
            config: self.config,
            directory: self
                .directory
                .unwrap_or_else(|| Arc::new(AnonymousDirectory)),
            persistence: self
                .persistence
                .unwrap_or_else(|| Arc::new(NoopPersistence)),
            event_sink: self.event_sink.unwrap_or_else(|| Arc::new(TracingEventSink)),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
