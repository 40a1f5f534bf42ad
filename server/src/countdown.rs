//! Cancellable countdown worker driving a lobby into game start.

use std::sync::Arc;
use std::time::Duration;

use faceoff_protocol::LobbyId;

use crate::registry::LobbyRegistry;

/// Spawns the ticker for one countdown instance.
///
/// The instance is identified by the generation captured at start; any
/// transition away from `countdown` bumps the generation and the worker
/// winds down silently at its next check, so a cancel never needs to kill
/// the task.
pub(crate) fn spawn_countdown(
    registry: Arc<LobbyRegistry>,
    lobby_id: LobbyId,
    generation: u64,
) {
    tokio::spawn(run_countdown(registry, lobby_id, generation));
}

async fn run_countdown(registry: Arc<LobbyRegistry>, lobby_id: LobbyId, generation: u64) {
    let seconds = registry.settings().countdown_seconds;
    let grace = registry.settings().post_game_grace_seconds;

    for remaining in (0..seconds).rev() {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if !registry.publish_tick(lobby_id, generation, remaining).await {
            tracing::debug!(%lobby_id, generation, "countdown instance cancelled");
            return;
        }
    }

    let Some(code) = registry.complete_countdown(lobby_id, generation).await else {
        tracing::debug!(%lobby_id, generation, "countdown cancelled before completion");
        return;
    };

    tokio::time::sleep(Duration::from_secs(grace)).await;
    registry.finalize_game(lobby_id).await;
    tracing::debug!(%lobby_id, %code, "post-game grace elapsed");
}
