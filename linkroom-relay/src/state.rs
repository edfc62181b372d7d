//! Shared relay state and room access rules.

use std::sync::Arc;

use linkroom_proto::message::UserId;
use linkroom_proto::room::{RoomKey, RoomKind, SelfChatPolicy, derive_direct_room_key};

use crate::config::RelayConfig;
use crate::directory::{StaticDirectory, UserDirectory};
use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::history::HistoryReader;
use crate::media::{LocalMediaStore, MediaStore};
use crate::presence::PresenceRegistry;
use crate::rooms::{GroupRegistry, MembershipError};
use crate::sink::{DurableSink, MemorySink, SinkError};
use crate::store::FileSink;

/// Default maximum inbound frame size in bytes (64 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Everything the session handler and REST handlers share.
pub struct RelayState {
    /// Live connections and their joined rooms.
    pub presence: Arc<PresenceRegistry>,
    /// Durable message and media-record storage.
    pub sink: Arc<dyn DurableSink>,
    /// Group rooms and their membership.
    pub groups: Arc<GroupRegistry>,
    /// Profile lookups.
    pub directory: Arc<dyn UserDirectory>,
    /// Blob storage for uploads.
    pub media: Arc<dyn MediaStore>,
    /// Persist-then-fan-out pipeline.
    pub dispatcher: Dispatcher,
    /// History pagination and deletes.
    pub history: HistoryReader,
    max_payload_size: usize,
    self_chat: SelfChatPolicy,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// In-memory state with an empty directory, default limits and uploads
    /// written under the system temp directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_components(
            Arc::new(MemorySink::new()),
            Arc::new(StaticDirectory::default()),
            Arc::new(LocalMediaStore::new(
                std::env::temp_dir().join("linkroom-uploads"),
            )),
        )
    }

    /// State over the given collaborators, with default limits and an empty
    /// group registry journaling to `sink`.
    pub fn with_components(
        sink: Arc<dyn DurableSink>,
        directory: Arc<dyn UserDirectory>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        let groups = GroupRegistry::with_sink(Arc::clone(&sink));
        Self::assemble(sink, groups, directory, media)
    }

    /// State over the given collaborators, with the group registry rebuilt
    /// from the groups already recorded in `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the sink cannot list its groups.
    pub async fn restore(
        sink: Arc<dyn DurableSink>,
        directory: Arc<dyn UserDirectory>,
        media: Arc<dyn MediaStore>,
    ) -> Result<Self, SinkError> {
        let groups = GroupRegistry::restore(Arc::clone(&sink)).await?;
        Ok(Self::assemble(sink, groups, directory, media))
    }

    fn assemble(
        sink: Arc<dyn DurableSink>,
        groups: GroupRegistry,
        directory: Arc<dyn UserDirectory>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let groups = Arc::new(groups);
        Self {
            dispatcher: Dispatcher::new(
                Arc::clone(&presence),
                Arc::clone(&sink),
                Arc::clone(&directory),
            ),
            history: HistoryReader::new(Arc::clone(&sink), Arc::clone(&groups)),
            presence,
            sink,
            groups,
            directory,
            media,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            self_chat: SelfChatPolicy::Reject,
        }
    }

    /// Builds the state described by a resolved configuration, opening and
    /// replaying the message log when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the message log cannot be opened or replayed.
    pub async fn from_config(config: &RelayConfig) -> Result<Self, SinkError> {
        let sink: Arc<dyn DurableSink> = match &config.data_file {
            Some(path) => Arc::new(FileSink::open(path).await?),
            None => {
                tracing::warn!("no data file configured, messages are kept in memory only");
                Arc::new(MemorySink::new())
            }
        };
        let directory = Arc::new(StaticDirectory::new(config.users.iter().cloned()));
        let media = Arc::new(LocalMediaStore::new(&config.media_dir));

        Ok(Self::restore(sink, directory, media)
            .await?
            .with_limits(
                config.max_payload_size,
                config.default_page_size,
                config.max_page_size,
            )
            .with_self_chat(config.self_chat))
    }

    /// Overrides the frame size and history page limits.
    #[must_use]
    pub fn with_limits(
        mut self,
        max_payload_size: usize,
        default_page_size: usize,
        max_page_size: usize,
    ) -> Self {
        self.max_payload_size = max_payload_size;
        self.history = self
            .history
            .with_page_limits(default_page_size, max_page_size);
        self
    }

    /// Overrides the self-chat policy.
    #[must_use]
    pub const fn with_self_chat(mut self, policy: SelfChatPolicy) -> Self {
        self.self_chat = policy;
        self
    }

    /// Maximum inbound frame size in bytes.
    #[must_use]
    pub const fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Self-chat policy in force.
    #[must_use]
    pub const fn self_chat_policy(&self) -> SelfChatPolicy {
        self.self_chat
    }

    /// Parses a client-supplied room key.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RoomKey`] for a non-canonical key.
    pub fn parse_room(&self, raw: &str) -> Result<RoomKey, RelayError> {
        Ok(raw.parse()?)
    }

    /// Derives the direct room of `user` and `other` under the configured
    /// self-chat policy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RoomKey`] for blank or separator-bearing ids,
    /// or a self-room the policy rejects.
    pub fn direct_room(&self, user: &UserId, other: &UserId) -> Result<RoomKey, RelayError> {
        Ok(derive_direct_room_key(user, other, self.self_chat)?)
    }

    /// Checks that `user` may join, send to, read, or prune `room`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotParticipant`] if `user` is not one of a
    /// direct room's pair or not a member of a group,
    /// [`RelayError::RoomNotFound`] for an unknown group, or
    /// [`RelayError::InvalidArgument`] for a self-room the policy rejects.
    pub async fn authorize_room(&self, user: &UserId, room: &RoomKey) -> Result<(), RelayError> {
        match room.kind() {
            RoomKind::Direct => {
                if room.is_self_room() && self.self_chat == SelfChatPolicy::Reject {
                    return Err(RelayError::InvalidArgument(
                        "self-chat is not allowed".to_string(),
                    ));
                }
                let is_participant = room
                    .participants()
                    .is_some_and(|(lo, hi)| lo == user || hi == user);
                if is_participant {
                    Ok(())
                } else {
                    Err(not_participant(user, room))
                }
            }
            RoomKind::Group => {
                let id = room
                    .group_id()
                    .ok_or_else(|| RelayError::RoomNotFound(room.to_string()))?;
                match self.groups.is_member(id, user).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(not_participant(user, room)),
                    Err(MembershipError::NotFound(_)) => {
                        Err(RelayError::RoomNotFound(room.to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Removes `member` from a group and evicts their live connections from
    /// the group's room. Returns whether the member was in the group.
    ///
    /// # Errors
    ///
    /// Propagates [`MembershipError`] from the registry.
    pub async fn remove_group_member(
        &self,
        group_id: &str,
        requester: &UserId,
        member: &UserId,
    ) -> Result<bool, RelayError> {
        let removed = self.groups.remove_member(group_id, requester, member).await?;
        if removed {
            let room = RoomKey::group(group_id)?;
            let evicted = self.presence.evict_user(&room, member);
            if !evicted.is_empty() {
                tracing::info!(
                    room_id = %room,
                    member = %member,
                    connections = evicted.len(),
                    "evicted removed member from room"
                );
            }
        }
        Ok(removed)
    }
}

fn not_participant(user: &UserId, room: &RoomKey) -> RelayError {
    RelayError::NotParticipant {
        user: user.to_string(),
        room: room.clone(),
    }
}
