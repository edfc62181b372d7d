//! Relay-wide error type.
//!
//! Module errors fold into [`RelayError`], which maps onto the wire
//! [`ErrorKind`] for WebSocket replies and onto status codes for REST
//! responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use linkroom_proto::codec::CodecError;
use linkroom_proto::event::ErrorKind;
use linkroom_proto::room::{RoomKey, RoomKeyError};

use crate::dispatch::DispatchError;
use crate::history::HistoryError;
use crate::media::MediaError;
use crate::presence::PresenceError;
use crate::rooms::MembershipError;
use crate::sink::SinkError;
use crate::validate::ValidationError;

/// Any failure surfaced to a client.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The envelope broke a validation rule.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A room key could not be derived or parsed.
    #[error(transparent)]
    RoomKey(#[from] RoomKeyError),
    /// Presence registry rejected the operation.
    #[error(transparent)]
    Presence(#[from] PresenceError),
    /// Group membership operation failed.
    #[error(transparent)]
    Membership(#[from] MembershipError),
    /// History read or delete failed.
    #[error(transparent)]
    History(#[from] HistoryError),
    /// Dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Direct sink access failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
    /// Media upload failed.
    #[error(transparent)]
    Media(#[from] MediaError),
    /// A frame could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The acting user is not a participant of the room.
    #[error("{user} may not access room {room}")]
    NotParticipant {
        /// Acting user.
        user: String,
        /// Target room.
        room: RoomKey,
    },
    /// A request argument was unusable.
    #[error("{0}")]
    InvalidArgument(String),
    /// The room is unknown.
    #[error("room {0} not found")]
    RoomNotFound(String),
    /// The request carried no user identity.
    #[error("missing or empty x-user-id header")]
    Unauthenticated,
    /// A spawned dispatch did not run to completion.
    #[error("message dispatch aborted: {0}")]
    DispatchAborted(String),
}

impl RelayError {
    /// Wire category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::RoomKey(_) | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Presence(e) => match e {
                PresenceError::AlreadyAuthenticated { .. } => ErrorKind::AlreadyAuthenticated,
                PresenceError::NotAuthenticated | PresenceError::UnknownConnection(_) => {
                    ErrorKind::NotAuthenticated
                }
            },
            Self::Membership(e) => match e {
                MembershipError::NotFound(_) => ErrorKind::RoomNotFound,
                MembershipError::NotMember { .. }
                | MembershipError::CreatorRemoval
                | MembershipError::CapacityReached => ErrorKind::Forbidden,
                MembershipError::EmptyName
                | MembershipError::NameTooLong(_)
                | MembershipError::NoMembers
                | MembershipError::BlankMember
                | MembershipError::RoomKey(_) => ErrorKind::InvalidArgument,
                MembershipError::Persistence(_) => ErrorKind::PersistenceFailed,
            },
            Self::History(e) => match e {
                HistoryError::InvalidPage
                | HistoryError::InvalidPageSize
                | HistoryError::NoMessageIds => ErrorKind::InvalidArgument,
                HistoryError::RoomNotFound(_) => ErrorKind::RoomNotFound,
                HistoryError::Sink(_) => ErrorKind::PersistenceFailed,
            },
            Self::Media(MediaError::Empty) => ErrorKind::InvalidArgument,
            Self::Dispatch(_) | Self::Sink(_) | Self::Media(_) | Self::DispatchAborted(_) => {
                ErrorKind::PersistenceFailed
            }
            Self::Codec(_) => ErrorKind::Protocol,
            Self::NotParticipant { .. } => ErrorKind::Forbidden,
            Self::RoomNotFound(_) => ErrorKind::RoomNotFound,
            Self::Unauthenticated => ErrorKind::NotAuthenticated,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::InvalidArgument | ErrorKind::Protocol => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotAuthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::RoomNotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyAuthenticated => StatusCode::CONFLICT,
            ErrorKind::PersistenceFailed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
