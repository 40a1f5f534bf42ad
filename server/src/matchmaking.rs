//! FIFO matchmaking queue and the enqueue-or-pair service.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use faceoff_protocol::{DeviceId, LobbyInfo};

use crate::error::LobbyError;
use crate::events::{EventKind, EventSink};
use crate::persistence::Persistence;
use crate::registry::LobbyRegistry;

/// One waiting player.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub device_id: DeviceId,
    pub queue_time: DateTime<Utc>,
}

/// FIFO storage behind the queue mutex. Deque order is queue-time order
/// with insertion order as the tie-break.
#[derive(Default)]
pub(crate) struct QueueInner {
    entries: VecDeque<QueueEntry>,
}

impl QueueInner {
    /// 1-based position of a device in the queue.
    pub(crate) fn position(&self, device_id: &DeviceId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.device_id == *device_id)
            .map(|i| i + 1)
    }

    pub(crate) fn enqueue(&mut self, device_id: DeviceId) {
        self.entries.push_back(QueueEntry {
            device_id,
            queue_time: Utc::now(),
        });
    }

    pub(crate) fn push_front(&mut self, entry: QueueEntry) {
        self.entries.push_front(entry);
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Removes a device; returns whether anything was removed.
    pub(crate) fn remove(&mut self, device_id: &DeviceId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.device_id != *device_id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The matchmaking FIFO.
///
/// The queue mutex is the outermost lock in the coordinator: it is always
/// taken before the registry index, never after. The registry removes a
/// device from here (under this lock) whenever that device gains lobby
/// membership, which is what makes "queued and seated at once" unreachable.
#[derive(Default)]
pub struct MatchQueue {
    pub(crate) inner: Mutex<QueueInner>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Result of a `find_match` call.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// The device is waiting in the queue.
    Queued {
        position: usize,
        estimated_wait_time: u64,
        /// `false` when the device was already queued and the call was an
        /// idempotent re-read.
        newly_queued: bool,
    },
    /// A waiter was available; both devices are seated in a fresh lobby.
    Matched { lobby: LobbyInfo },
}

/// Result of a `queue_status` call.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub in_queue: bool,
    pub position: Option<usize>,
    pub estimated_wait_time: Option<u64>,
}

/// Pairs callers with the head waiter, or queues them.
pub struct Matchmaker {
    queue: Arc<MatchQueue>,
    registry: Arc<LobbyRegistry>,
    events: Arc<dyn EventSink>,
    persistence: Arc<dyn Persistence>,
    eta_seconds: u64,
}

impl Matchmaker {
    pub fn new(
        queue: Arc<MatchQueue>,
        registry: Arc<LobbyRegistry>,
        events: Arc<dyn EventSink>,
        persistence: Arc<dyn Persistence>,
        eta_seconds: u64,
    ) -> Self {
        Self {
            queue,
            registry,
            events,
            persistence,
            eta_seconds,
        }
    }

    /// Atomic enqueue-or-pair.
    ///
    /// The queue lock is held across the membership check and the pair call
    /// (queue → registry order is fixed), so queue state and lobby
    /// membership cannot diverge mid-operation.
    pub async fn find_match(&self, device_id: &DeviceId) -> Result<MatchOutcome, LobbyError> {
        let mut queue = self.queue.inner.lock().await;
        if self.registry.membership(device_id).await.is_some() {
            return Err(LobbyError::AlreadyInLobby);
        }
        if let Some(position) = queue.position(device_id) {
            return Ok(MatchOutcome::Queued {
                position,
                estimated_wait_time: self.eta_seconds,
                newly_queued: false,
            });
        }
        match queue.pop_front() {
            Some(waiter) => match self.registry.pair(&waiter.device_id, device_id).await {
                Ok(lobby) => {
                    drop(queue);
                    let persistence = Arc::clone(&self.persistence);
                    let waiter_id = waiter.device_id.clone();
                    tokio::spawn(async move { persistence.queue_left(&waiter_id).await });
                    Ok(MatchOutcome::Matched { lobby })
                }
                Err(err) => {
                    // The waiter keeps their place in line.
                    queue.push_front(waiter);
                    Err(err)
                }
            },
            None => {
                queue.enqueue(device_id.clone());
                drop(queue);
                tracing::info!(%device_id, "joined matchmaking queue");
                self.events.record(
                    EventKind::MatchmakingQueueJoin,
                    Some(device_id),
                    json!({ "device_id": device_id.as_str() }),
                );
                let persistence = Arc::clone(&self.persistence);
                let device_id = device_id.clone();
                tokio::spawn(async move { persistence.queue_entered(&device_id).await });
                Ok(MatchOutcome::Queued {
                    position: 1,
                    estimated_wait_time: self.eta_seconds,
                    newly_queued: true,
                })
            }
        }
    }

    /// Removes the device from the queue; idempotent. Returns whether the
    /// device was actually queued.
    pub async fn leave_queue(&self, device_id: &DeviceId) -> bool {
        let removed = self.queue.inner.lock().await.remove(device_id);
        if removed {
            tracing::info!(%device_id, "left matchmaking queue");
            self.events.record(
                EventKind::MatchmakingQueueLeave,
                Some(device_id),
                json!({ "device_id": device_id.as_str() }),
            );
            let persistence = Arc::clone(&self.persistence);
            let device_id = device_id.clone();
            tokio::spawn(async move { persistence.queue_left(&device_id).await });
        }
        removed
    }

    pub async fn queue_status(&self, device_id: &DeviceId) -> QueueStatus {
        match self.queue.inner.lock().await.position(device_id) {
            Some(position) => QueueStatus {
                in_queue: true,
                position: Some(position),
                estimated_wait_time: Some(self.eta_seconds),
            },
            None => QueueStatus {
                in_queue: false,
                position: None,
                estimated_wait_time: None,
            },
        }
    }
}
