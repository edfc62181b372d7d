//! Presence registry: which live connection acts for which user and which
//! rooms each connection has joined.
//!
//! The registry is the only in-memory structure mutated by many connections
//! at once. A single lock guards both the per-connection room sets and the
//! per-room member index, so the two views never disagree and concurrent
//! join/leave calls on the same room cannot lose updates. Critical sections
//! never await.

use std::collections::{HashMap, HashSet};

use linkroom_proto::event::ServerEvent;
use linkroom_proto::message::UserId;
use linkroom_proto::room::RoomKey;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Channel feeding a connection's WebSocket writer task.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Identifies one transport connection for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh connection identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle stage of a registered connection. A disconnected connection
/// has no entry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, no user bound yet.
    Connecting,
    /// Bound to a user, in no room.
    Authenticated,
    /// Bound to a user and joined to at least one room.
    Joined,
}

/// Errors from presence operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// The connection was never registered or has disconnected.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// The connection is already bound to another user.
    #[error("connection already authenticated as {current}")]
    AlreadyAuthenticated {
        /// The user the connection is bound to.
        current: UserId,
    },
    /// The operation requires an authenticated connection.
    #[error("connection has not authenticated")]
    NotAuthenticated,
}

/// A live member of a room, as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct LiveMember {
    /// The member connection.
    pub connection_id: ConnectionId,
    /// User the connection acts for.
    pub user_id: UserId,
    /// Channel to the connection's writer.
    pub outbound: Outbound,
}

struct ConnectionEntry {
    user: Option<UserId>,
    rooms: HashSet<RoomKey>,
    outbound: Outbound,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

impl Inner {
    fn unindex(&mut self, connection_id: ConnectionId, room: &RoomKey) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Thread-safe registry of live connections and their room memberships.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<Inner>,
}

impl PresenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection in the `Connecting` state.
    ///
    /// Re-registering an id replaces its outbound channel and keeps nothing
    /// else.
    pub fn register(&self, connection_id: ConnectionId, outbound: Outbound) {
        let mut inner = self.inner.write();
        let old = inner.connections.insert(
            connection_id,
            ConnectionEntry {
                user: None,
                rooms: HashSet::new(),
                outbound,
            },
        );
        if let Some(old) = old {
            for room in &old.rooms {
                inner.unindex(connection_id, room);
            }
        }
    }

    /// Binds a connection to a user.
    ///
    /// Repeating the call with the same user is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::AlreadyAuthenticated`] if the connection is
    /// bound to a different user, or [`PresenceError::UnknownConnection`].
    pub fn authenticate(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<(), PresenceError> {
        let mut inner = self.inner.write();
        let entry = inner
            .connections
            .get_mut(&connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))?;
        if let Some(current) = &entry.user {
            if *current != user_id {
                return Err(PresenceError::AlreadyAuthenticated {
                    current: current.clone(),
                });
            }
            return Ok(());
        }
        entry.user = Some(user_id);
        Ok(())
    }

    /// Adds `room` to the connection's memberships. Idempotent.
    ///
    /// Returns `true` if the connection was not already in the room.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::NotAuthenticated`] before authentication, or
    /// [`PresenceError::UnknownConnection`].
    pub fn join_room(
        &self,
        connection_id: ConnectionId,
        room: &RoomKey,
    ) -> Result<bool, PresenceError> {
        let mut inner = self.inner.write();
        let entry = inner
            .connections
            .get_mut(&connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))?;
        if entry.user.is_none() {
            return Err(PresenceError::NotAuthenticated);
        }
        let newly = entry.rooms.insert(room.clone());
        inner
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(connection_id);
        Ok(newly)
    }

    /// Removes `room` from the connection's memberships. No-op if absent.
    ///
    /// Returns `true` if the connection was in the room.
    pub fn leave_room(&self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        let mut inner = self.inner.write();
        let was_member = inner
            .connections
            .get_mut(&connection_id)
            .is_some_and(|entry| entry.rooms.remove(room));
        inner.unindex(connection_id, room);
        was_member
    }

    /// Removes the connection from every room it joined and deletes its
    /// entry. Returns the rooms it was in.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Vec<RoomKey> {
        let mut inner = self.inner.write();
        let Some(entry) = inner.connections.remove(&connection_id) else {
            return Vec::new();
        };
        let rooms: Vec<RoomKey> = entry.rooms.into_iter().collect();
        for room in &rooms {
            inner.unindex(connection_id, room);
        }
        rooms
    }

    /// Returns the connections currently joined to `room`. Empty when no one
    /// is online.
    pub fn members_of(&self, room: &RoomKey) -> HashSet<ConnectionId> {
        self.inner.read().rooms.get(room).cloned().unwrap_or_default()
    }

    /// Snapshot of the room's live members with their outbound channels.
    pub fn live_members(&self, room: &RoomKey) -> Vec<LiveMember> {
        let inner = self.inner.read();
        let Some(members) = inner.rooms.get(room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| {
                let entry = inner.connections.get(id)?;
                Some(LiveMember {
                    connection_id: *id,
                    user_id: entry.user.clone()?,
                    outbound: entry.outbound.clone(),
                })
            })
            .collect()
    }

    /// Removes every connection of `user_id` from `room`. Returns the
    /// evicted connections.
    pub fn evict_user(&self, room: &RoomKey, user_id: &UserId) -> Vec<ConnectionId> {
        let mut inner = self.inner.write();
        let Some(members) = inner.rooms.get(room) else {
            return Vec::new();
        };
        let evicted: Vec<ConnectionId> = members
            .iter()
            .filter(|id| {
                inner
                    .connections
                    .get(id)
                    .is_some_and(|entry| entry.user.as_ref() == Some(user_id))
            })
            .copied()
            .collect();
        for id in &evicted {
            if let Some(entry) = inner.connections.get_mut(id) {
                entry.rooms.remove(room);
            }
            inner.unindex(*id, room);
        }
        evicted
    }

    /// Current lifecycle stage, or `None` once disconnected.
    pub fn state(&self, connection_id: ConnectionId) -> Option<ConnectionState> {
        let inner = self.inner.read();
        let entry = inner.connections.get(&connection_id)?;
        Some(match (&entry.user, entry.rooms.is_empty()) {
            (None, _) => ConnectionState::Connecting,
            (Some(_), true) => ConnectionState::Authenticated,
            (Some(_), false) => ConnectionState::Joined,
        })
    }

    /// The user bound to a connection, if authenticated.
    pub fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.inner
            .read()
            .connections
            .get(&connection_id)
            .and_then(|entry| entry.user.clone())
    }

    /// Rooms the connection has joined.
    pub fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<RoomKey> {
        self.inner
            .read()
            .connections
            .get(&connection_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }
}
