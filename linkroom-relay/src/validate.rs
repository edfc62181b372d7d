//! Envelope validation.
//!
//! Turns client-supplied [`SendMessage`] fields into an [`EnvelopeDraft`]
//! ready for persistence. The sender always comes from the authenticated
//! connection; a client-supplied `senderId` is only compared against it.

use linkroom_proto::event::SendMessage;
use linkroom_proto::message::{MediaRef, UserId};
use linkroom_proto::room::{RoomKey, RoomKeyError, SelfChatPolicy, derive_direct_room_key};

/// Maximum text body length in characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Which validation rule an inbound message broke.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Neither `roomId` nor `receiverId` was given.
    #[error("message has no room or recipient")]
    MissingTarget,
    /// The room or recipient could not be turned into a room key.
    #[error("invalid room: {0}")]
    InvalidRoom(#[from] RoomKeyError),
    /// `roomId` and `receiverId` name different rooms.
    #[error("roomId {room} does not match recipient {receiver}")]
    TargetMismatch {
        /// Room given by the client.
        room: RoomKey,
        /// Recipient given by the client.
        receiver: UserId,
    },
    /// Neither non-blank content nor media was given.
    #[error("message has neither content nor media")]
    EmptyMessage,
    /// The claimed sender is not the authenticated user.
    #[error("senderId {claimed} does not match authenticated user {authenticated}")]
    SenderMismatch {
        /// Sender claimed in the payload.
        claimed: UserId,
        /// User bound to the connection.
        authenticated: UserId,
    },
    /// Content exceeds [`MAX_CONTENT_CHARS`].
    #[error("content too long: {actual} characters (max {max})")]
    ContentTooLong {
        /// Permitted maximum.
        max: usize,
        /// Observed length.
        actual: usize,
    },
    /// A media reference without a URL.
    #[error("media reference has an empty url")]
    EmptyMediaUrl,
}

/// A validated message awaiting persistence.
///
/// Only [`validate`] constructs drafts, so every draft names a room, carries
/// the authenticated sender, and has content or media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeDraft {
    room: RoomKey,
    sender: UserId,
    content: Option<String>,
    media: Option<MediaRef>,
}

impl EnvelopeDraft {
    /// Target room.
    #[must_use]
    pub const fn room(&self) -> &RoomKey {
        &self.room
    }

    /// Authenticated sender.
    #[must_use]
    pub const fn sender(&self) -> &UserId {
        &self.sender
    }

    /// Text body.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Media reference.
    #[must_use]
    pub const fn media(&self) -> Option<&MediaRef> {
        self.media.as_ref()
    }

    /// Splits the draft into its parts.
    #[must_use]
    pub fn into_parts(self) -> (RoomKey, UserId, Option<String>, Option<MediaRef>) {
        (self.room, self.sender, self.content, self.media)
    }
}

/// Checks `payload` submitted by the authenticated `sender`.
///
/// # Errors
///
/// Returns the first [`ValidationError`] rule the payload breaks.
pub fn validate(
    sender: &UserId,
    payload: SendMessage,
    policy: SelfChatPolicy,
) -> Result<EnvelopeDraft, ValidationError> {
    let SendMessage {
        room_id,
        sender_id,
        receiver_id,
        content,
        media,
    } = payload;

    if let Some(claimed) = sender_id
        && claimed != *sender
    {
        return Err(ValidationError::SenderMismatch {
            claimed,
            authenticated: sender.clone(),
        });
    }

    let room = resolve_target(sender, room_id.as_deref(), receiver_id, policy)?;

    let content = content.filter(|text| !text.trim().is_empty());
    if let Some(text) = &content {
        let actual = text.chars().count();
        if actual > MAX_CONTENT_CHARS {
            return Err(ValidationError::ContentTooLong {
                max: MAX_CONTENT_CHARS,
                actual,
            });
        }
    }

    if let Some(media) = &media
        && media.url.trim().is_empty()
    {
        return Err(ValidationError::EmptyMediaUrl);
    }

    if content.is_none() && media.is_none() {
        return Err(ValidationError::EmptyMessage);
    }

    Ok(EnvelopeDraft {
        room,
        sender: sender.clone(),
        content,
        media,
    })
}

fn resolve_target(
    sender: &UserId,
    room_id: Option<&str>,
    receiver_id: Option<UserId>,
    policy: SelfChatPolicy,
) -> Result<RoomKey, ValidationError> {
    let derived = receiver_id
        .map(|receiver| {
            derive_direct_room_key(sender, &receiver, policy).map(|key| (key, receiver))
        })
        .transpose()?;

    match (room_id, derived) {
        (Some(raw), derived) => {
            let room: RoomKey = raw.parse()?;
            if let Some((key, receiver)) = derived
                && key != room
            {
                return Err(ValidationError::TargetMismatch { room, receiver });
            }
            Ok(room)
        }
        (None, Some((key, _))) => Ok(key),
        (None, None) => Err(ValidationError::MissingTarget),
    }
}
