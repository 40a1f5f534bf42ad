//! REST handlers for the lobby surface.
//!
//! Thin adaptors: parse the device identity, dispatch to the registry or
//! matchmaker, serialize the response. No locking happens here; error kinds
//! map to status codes through `LobbyError`'s `ResponseError` impl.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};

use faceoff_protocol::{
    AckResponse, DeviceId, JoinLobbyRequest, LobbyResponse, MatchmakingResponse,
    QueueStatusResponse, ReadyRequest,
};

use crate::error::LobbyError;
use crate::matchmaking::{MatchOutcome, Matchmaker};
use crate::registry::{LeaveOutcome, LobbyRegistry};

/// Shared application state for REST handlers.
pub struct AppState {
    pub registry: Arc<LobbyRegistry>,
    pub matchmaker: Arc<Matchmaker>,
}

/// Extracts the device identity from the `X-Device-ID` header.
fn device_id(req: &HttpRequest) -> Result<DeviceId, LobbyError> {
    req.headers()
        .get("X-Device-ID")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(DeviceId::from)
        .ok_or(LobbyError::Unauthenticated)
}

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

/// POST /lobby/create — new lobby with a fresh invite code.
pub async fn create_lobby(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let lobby = state.registry.create(&device_id).await?;
    let message = format!("Lobby created with code: {}", lobby.code);
    Ok(HttpResponse::Ok().json(LobbyResponse::with_lobby(lobby, message)))
}

/// POST /lobby/join — take the second seat by invite code.
pub async fn join_lobby(
    req: HttpRequest,
    body: web::Json<JoinLobbyRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let lobby = state.registry.join(&device_id, &body.code).await?;
    Ok(HttpResponse::Ok().json(LobbyResponse::with_lobby(lobby, "Successfully joined lobby")))
}

/// POST /lobby/leave — leave the current lobby; a no-op without one.
pub async fn leave_lobby(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let message = match state.registry.leave(&device_id, false).await {
        LeaveOutcome::Left | LeaveOutcome::Deleted => "Successfully left lobby",
        LeaveOutcome::NotMember => "Not in a lobby",
        LeaveOutcome::Terminal => "Game already started",
    };
    Ok(HttpResponse::Ok().json(AckResponse {
        success: true,
        message: message.to_string(),
    }))
}

/// POST /lobby/ready — flip the ready flag.
pub async fn set_ready(
    req: HttpRequest,
    body: web::Json<ReadyRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let lobby = state.registry.set_ready(&device_id, body.is_ready).await?;
    Ok(HttpResponse::Ok().json(LobbyResponse {
        success: true,
        lobby: Some(lobby),
        message: None,
    }))
}

/// GET /lobby/status — current lobby snapshot, if seated anywhere.
pub async fn lobby_status(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let lobby = state.registry.status(&device_id).await;
    let message = if lobby.is_some() {
        "Current lobby status"
    } else {
        "Player is not in any lobby"
    };
    Ok(HttpResponse::Ok().json(LobbyResponse {
        success: true,
        lobby,
        message: Some(message.to_string()),
    }))
}

/// POST /lobby/find_match — enqueue, or pair with the head waiter.
pub async fn find_match(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let response = match state.matchmaker.find_match(&device_id).await? {
        MatchOutcome::Queued {
            position,
            estimated_wait_time,
            newly_queued,
        } => MatchmakingResponse {
            success: true,
            in_queue: true,
            queue_position: Some(position),
            estimated_wait_time: Some(estimated_wait_time),
            lobby: None,
            message: Some(if newly_queued {
                "Added to matchmaking queue. Waiting for opponent...".to_string()
            } else {
                format!("In queue (position {position})")
            }),
        },
        MatchOutcome::Matched { lobby } => MatchmakingResponse {
            success: true,
            in_queue: false,
            queue_position: None,
            estimated_wait_time: None,
            lobby: Some(lobby),
            message: Some("Match found! Lobby created.".to_string()),
        },
    };
    Ok(HttpResponse::Ok().json(response))
}

/// POST /lobby/leave_queue — drop out of matchmaking; idempotent.
pub async fn leave_queue(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let removed = state.matchmaker.leave_queue(&device_id).await;
    Ok(HttpResponse::Ok().json(AckResponse {
        success: removed,
        message: if removed {
            "Left matchmaking queue"
        } else {
            "Not in queue"
        }
        .to_string(),
    }))
}

/// GET /lobby/queue_status — position and wait estimate.
pub async fn queue_status(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, LobbyError> {
    let device_id = device_id(&req)?;
    let status = state.matchmaker.queue_status(&device_id).await;
    Ok(HttpResponse::Ok().json(QueueStatusResponse {
        success: true,
        in_queue: status.in_queue,
        queue_position: status.position,
        estimated_wait_time: status.estimated_wait_time,
    }))
}
