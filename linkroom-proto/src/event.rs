//! Named events carried over the realtime transport.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}`. [`ClientEvent`] flows from the
//! client to the relay, [`ServerEvent`] from the relay to the client.

use serde::{Deserialize, Serialize};

use crate::message::{Envelope, MediaRef, MessageId, UserId};
use crate::room::RoomKey;

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Binds the connection to a user. Must precede every other event.
    #[serde(rename_all = "camelCase")]
    Authenticate {
        /// The user the connection acts for.
        user_id: UserId,
    },

    /// Joins the direct room shared with `other_user_id`.
    #[serde(rename_all = "camelCase")]
    JoinChat {
        /// Optional echo of the caller's own id; must match the
        /// authenticated user when present.
        #[serde(default)]
        user_id: Option<UserId>,
        /// The other participant.
        other_user_id: UserId,
    },

    /// Joins a room by its canonical key.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room key in string form.
        room_id: String,
    },

    /// Leaves a previously joined room.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Room key in string form.
        room_id: String,
    },

    /// Submits a message for persistence and fan-out.
    SendMessage(SendMessage),
}

/// Client-supplied message fields, validated by the relay before relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessage {
    /// Target room key in string form.
    pub room_id: Option<String>,
    /// Claimed sender; only checked against the authenticated user.
    pub sender_id: Option<UserId>,
    /// Other participant of a direct room, used when `room_id` is absent.
    pub receiver_id: Option<UserId>,
    /// Text body.
    pub content: Option<String>,
    /// Media reference.
    pub media: Option<MediaRef>,
}

/// Public identity attached to delivered messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User identifier.
    pub id: UserId,
    /// Name to display.
    pub display_name: String,
    /// Avatar location, if any.
    pub avatar_ref: Option<String>,
}

impl UserProfile {
    /// Display name used when the directory cannot resolve a user.
    pub const PLACEHOLDER_NAME: &'static str = "Unknown";

    /// The stand-in profile for a user the directory could not resolve.
    #[must_use]
    pub fn placeholder(id: UserId) -> Self {
        Self {
            id,
            display_name: Self::PLACEHOLDER_NAME.to_string(),
            avatar_ref: None,
        }
    }
}

/// An envelope decorated with its sender's profile for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    /// The persisted envelope.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Sender profile at delivery time.
    pub sender: UserProfile,
}

/// Failure categories reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Malformed or incomplete envelope.
    Validation,
    /// Bad argument outside envelope validation.
    InvalidArgument,
    /// The acting user may not perform the operation.
    Forbidden,
    /// The durable sink could not record the message; retry the send.
    PersistenceFailed,
    /// Unknown room.
    RoomNotFound,
    /// The connection is already bound to a different user.
    AlreadyAuthenticated,
    /// The connection has not authenticated yet.
    NotAuthenticated,
    /// Undecodable or oversized frame.
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::InvalidArgument => "invalidArgument",
            Self::Forbidden => "forbidden",
            Self::PersistenceFailed => "persistenceFailed",
            Self::RoomNotFound => "roomNotFound",
            Self::AlreadyAuthenticated => "alreadyAuthenticated",
            Self::NotAuthenticated => "notAuthenticated",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Events the relay pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// The connection is now bound to `user_id`.
    #[serde(rename_all = "camelCase")]
    Authenticated {
        /// Bound user.
        user_id: UserId,
    },

    /// The connection joined a room.
    #[serde(rename_all = "camelCase")]
    Joined {
        /// Joined room.
        room_id: RoomKey,
    },

    /// The connection left a room.
    #[serde(rename_all = "camelCase")]
    Left {
        /// Left room.
        room_id: RoomKey,
    },

    /// A message delivered live to a room member.
    ReceiveMessage(DeliveredMessage),

    /// Acknowledges a durably recorded send to its originating connection.
    #[serde(rename_all = "camelCase")]
    MessageSent {
        /// Identifier assigned at persistence.
        message_id: MessageId,
        /// Room the message went to.
        room_id: RoomKey,
        /// Number of live connections that received it.
        delivered: usize,
    },

    /// A request failed.
    Error {
        /// Failure category.
        kind: ErrorKind,
        /// Human-readable description.
        reason: String,
    },
}

impl ServerEvent {
    /// Builds an [`ServerEvent::Error`].
    #[must_use]
    pub fn error(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self::Error {
            kind,
            reason: reason.into(),
        }
    }
}
