//! Error kinds surfaced by the coordinator and their HTTP mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use faceoff_protocol::{ErrorBody, ErrorDetail};
use thiserror::Error;

/// Everything a lobby or matchmaking operation can fail with.
///
/// The registry and matchmaker surface these directly; the REST layer maps
/// them onto status codes and the structured error body without any
/// per-handler translation.
#[derive(Debug, Clone, Error)]
pub enum LobbyError {
    #[error("valid device id required in X-Device-ID header")]
    Unauthenticated,

    #[error("lobby not found")]
    NotFound,

    #[error("player is already in a lobby")]
    AlreadyInLobby,

    #[error("player is not in any lobby")]
    NotInLobby,

    #[error("lobby is full")]
    Full,

    #[error("cannot join lobby in current state")]
    NotJoinable,

    #[error("operation not allowed in current lobby state")]
    InvalidState,

    /// Context is kept for the log line only; clients see a generic message.
    #[error("internal error")]
    Internal(String),
}

impl LobbyError {
    /// Stable wire name of this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyError::Unauthenticated => "unauthenticated",
            LobbyError::NotFound => "not_found",
            LobbyError::AlreadyInLobby => "already_in_lobby",
            LobbyError::NotInLobby => "not_in_lobby",
            LobbyError::Full => "full",
            LobbyError::NotJoinable => "not_joinable",
            LobbyError::InvalidState => "invalid_state",
            LobbyError::Internal(_) => "internal",
        }
    }
}

impl ResponseError for LobbyError {
    fn status_code(&self) -> StatusCode {
        match self {
            LobbyError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LobbyError::NotFound => StatusCode::NOT_FOUND,
            LobbyError::AlreadyInLobby
            | LobbyError::NotInLobby
            | LobbyError::Full
            | LobbyError::NotJoinable
            | LobbyError::InvalidState => StatusCode::CONFLICT,
            LobbyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let LobbyError::Internal(context) = self {
            tracing::error!(%context, "internal error surfaced to client");
        }
        let status = self.status_code();
        HttpResponse::build(status).json(ErrorBody {
            success: false,
            error: ErrorDetail {
                kind: self.kind().to_string(),
                message: self.to_string(),
            },
            status_code: status.as_u16(),
        })
    }
}
