//! Room identifiers and the direct-room key deriver.
//!
//! A [`RoomKey`] names the target of a set of envelopes. Direct rooms are
//! derived from the unordered pair of participants so both sides arrive at
//! the same key; group rooms wrap an externally assigned identifier.
//!
//! String form:
//! - direct: `dm:<lo>:<hi>` where `lo <= hi` lexicographically
//! - group: `group:<id>`

use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// Separator between the parts of a room key's string form.
pub const SEPARATOR: char = ':';

const DIRECT_PREFIX: &str = "dm";
const GROUP_PREFIX: &str = "group";

/// Errors produced while deriving or parsing a [`RoomKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomKeyError {
    /// An identifier was empty.
    #[error("room identifiers must not be empty")]
    EmptyIdentifier,
    /// An identifier contained the key separator.
    #[error("identifier {0:?} must not contain '{SEPARATOR}'")]
    InvalidIdentifier(String),
    /// Both participants of a direct room were the same user.
    #[error("self-chat is not allowed")]
    SelfChat,
    /// The string is not a canonical room key.
    #[error("malformed room key: {0:?}")]
    Malformed(String),
}

/// Whether a user may open a direct room with themself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelfChatPolicy {
    /// `derive_direct_room_key(a, a)` fails with [`RoomKeyError::SelfChat`].
    #[default]
    Reject,
    /// A self-room collapses to `dm:<a>:<a>`.
    Allow,
}

impl SelfChatPolicy {
    /// Maps a configuration flag onto a policy.
    #[must_use]
    pub const fn from_allow(allow: bool) -> Self {
        if allow { Self::Allow } else { Self::Reject }
    }
}

/// Which shape of room a key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Two-party room derived from the participant pair.
    Direct,
    /// Room with externally managed membership.
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Repr {
    Direct { lo: UserId, hi: UserId },
    Group(String),
}

/// Canonical room identifier. Constructed only through
/// [`derive_direct_room_key`], [`RoomKey::group`] or parsing of the
/// canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey(Repr);

/// Derives the key of the direct room shared by `a` and `b`.
///
/// The result depends only on the unordered pair: the identifiers are sorted
/// before they are joined.
///
/// # Errors
///
/// Returns [`RoomKeyError::EmptyIdentifier`] or
/// [`RoomKeyError::InvalidIdentifier`] for unusable identifiers, and
/// [`RoomKeyError::SelfChat`] when `a == b` under [`SelfChatPolicy::Reject`].
pub fn derive_direct_room_key(
    a: &UserId,
    b: &UserId,
    policy: SelfChatPolicy,
) -> Result<RoomKey, RoomKeyError> {
    check_identifier(a.as_str())?;
    check_identifier(b.as_str())?;
    if a == b && policy == SelfChatPolicy::Reject {
        return Err(RoomKeyError::SelfChat);
    }
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Ok(RoomKey(Repr::Direct {
        lo: lo.clone(),
        hi: hi.clone(),
    }))
}

fn check_identifier(id: &str) -> Result<(), RoomKeyError> {
    if id.trim().is_empty() {
        return Err(RoomKeyError::EmptyIdentifier);
    }
    if id.contains(SEPARATOR) {
        return Err(RoomKeyError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

impl RoomKey {
    /// Wraps an externally assigned group room identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RoomKeyError::EmptyIdentifier`] or
    /// [`RoomKeyError::InvalidIdentifier`].
    pub fn group(id: &str) -> Result<Self, RoomKeyError> {
        check_identifier(id)?;
        Ok(Self(Repr::Group(id.to_string())))
    }

    /// Returns the kind of room this key names.
    #[must_use]
    pub const fn kind(&self) -> RoomKind {
        match self.0 {
            Repr::Direct { .. } => RoomKind::Direct,
            Repr::Group(_) => RoomKind::Group,
        }
    }

    /// Returns the sorted participant pair of a direct room.
    #[must_use]
    pub const fn participants(&self) -> Option<(&UserId, &UserId)> {
        match &self.0 {
            Repr::Direct { lo, hi } => Some((lo, hi)),
            Repr::Group(_) => None,
        }
    }

    /// Returns the group identifier of a group room.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        match &self.0 {
            Repr::Group(id) => Some(id),
            Repr::Direct { .. } => None,
        }
    }

    /// Returns `true` for a direct room whose two participants are the same.
    #[must_use]
    pub fn is_self_room(&self) -> bool {
        matches!(&self.0, Repr::Direct { lo, hi } if lo == hi)
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Repr::Direct { lo, hi } => write!(f, "{DIRECT_PREFIX}{SEPARATOR}{lo}{SEPARATOR}{hi}"),
            Repr::Group(id) => write!(f, "{GROUP_PREFIX}{SEPARATOR}{id}"),
        }
    }
}

impl std::str::FromStr for RoomKey {
    type Err = RoomKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RoomKeyError::Malformed(s.to_string());
        let mut parts = s.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(DIRECT_PREFIX), Some(lo), Some(hi), None) => {
                check_identifier(lo).map_err(|_| malformed())?;
                check_identifier(hi).map_err(|_| malformed())?;
                // Only the sorted form is canonical.
                if lo > hi {
                    return Err(malformed());
                }
                Ok(Self(Repr::Direct {
                    lo: UserId::new(lo),
                    hi: UserId::new(hi),
                }))
            }
            (Some(GROUP_PREFIX), Some(id), None, None) => Self::group(id).map_err(|_| malformed()),
            _ => Err(malformed()),
        }
    }
}

impl TryFrom<String> for RoomKey {
    type Error = RoomKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.to_string()
    }
}
