//! Durable sink boundary and its in-memory implementation.
//!
//! The dispatcher persists every envelope through a [`DurableSink`] before
//! any live delivery. The sink stamps each envelope with its id, creation
//! timestamp and per-room sequence number in the same critical section as
//! the append, so persistence order and history order always agree.

use std::collections::HashMap;

use async_trait::async_trait;
use linkroom_proto::message::{Envelope, MediaRecord, MessageId, Timestamp};
use linkroom_proto::room::RoomKey;
use tokio::sync::RwLock;

use crate::rooms::{GroupChange, GroupRoom};
use crate::validate::EnvelopeDraft;

/// Errors from the durable sink. All of them surface to clients as
/// `PersistenceFailed`.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The backing store could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Reading or writing the backing store failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be encoded or decoded.
    #[error("record encoding failed: {0}")]
    Encoding(String),
}

/// Persistence collaborator for envelopes, room-owned media records and
/// group membership changes.
#[async_trait]
pub trait DurableSink: Send + Sync {
    /// Durably records a validated message and returns the stamped envelope.
    async fn persist(&self, draft: EnvelopeDraft) -> Result<Envelope, SinkError>;

    /// Returns page `page` (1-based) of the room's history, newest first.
    async fn query(
        &self,
        room: &RoomKey,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Envelope>, SinkError>;

    /// Whether the room has ever had persisted history.
    async fn has_room(&self, room: &RoomKey) -> Result<bool, SinkError>;

    /// Deletes every message of the room. Returns how many were removed.
    async fn delete_all(&self, room: &RoomKey) -> Result<usize, SinkError>;

    /// Deletes the listed messages of the room. Returns how many were removed.
    async fn delete_by_ids(&self, room: &RoomKey, ids: &[MessageId]) -> Result<usize, SinkError>;

    /// Records a media reference owned by the room.
    async fn record_media(&self, room: &RoomKey, record: MediaRecord) -> Result<(), SinkError>;

    /// Lists the room's media references in upload order.
    async fn list_media(&self, room: &RoomKey) -> Result<Vec<MediaRecord>, SinkError>;

    /// Durably records a change to group membership.
    async fn record_group(&self, change: &GroupChange) -> Result<(), SinkError>;

    /// Every group as of the last recorded change, oldest first.
    async fn load_groups(&self) -> Result<Vec<GroupRoom>, SinkError>;
}

#[derive(Debug, Default)]
struct RoomLog {
    /// Ascending by `(created_at, seq)`.
    messages: Vec<Envelope>,
    next_seq: u64,
    last_created_at: Timestamp,
    media: Vec<MediaRecord>,
}

impl RoomLog {
    fn stamp(&self, draft: EnvelopeDraft) -> Envelope {
        let (room_id, sender_id, content, media) = draft.into_parts();
        // Wall clocks step backwards; history order must not.
        let created_at = Timestamp::now().max(self.last_created_at);
        Envelope {
            id: MessageId::new(),
            room_id,
            sender_id,
            content,
            media,
            created_at,
            seq: self.next_seq + 1,
        }
    }

    fn push(&mut self, envelope: Envelope) {
        self.next_seq = self.next_seq.max(envelope.seq);
        self.last_created_at = self.last_created_at.max(envelope.created_at);
        self.messages.push(envelope);
    }
}

/// In-memory [`DurableSink`]. Survives nothing; used for tests and as the
/// state behind [`crate::store::FileSink`].
#[derive(Debug, Default)]
pub struct MemorySink {
    rooms: RwLock<HashMap<RoomKey, RoomLog>>,
    groups: RwLock<HashMap<String, GroupRoom>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps a draft as the next envelope of its room without recording it.
    pub(crate) async fn prepare(&self, draft: EnvelopeDraft) -> Envelope {
        let rooms = self.rooms.read().await;
        match rooms.get(draft.room()) {
            Some(log) => log.stamp(draft),
            None => RoomLog::default().stamp(draft),
        }
    }

    /// Appends an already stamped envelope.
    pub(crate) async fn insert(&self, envelope: Envelope) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(envelope.room_id.clone())
            .or_default()
            .push(envelope);
    }

    pub(crate) async fn remove_all(&self, room: &RoomKey) -> usize {
        let mut rooms = self.rooms.write().await;
        rooms
            .get_mut(room)
            .map_or(0, |log| std::mem::take(&mut log.messages).len())
    }

    pub(crate) async fn remove_ids(&self, room: &RoomKey, ids: &[MessageId]) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(log) = rooms.get_mut(room) else {
            return 0;
        };
        let before = log.messages.len();
        log.messages.retain(|envelope| !ids.contains(&envelope.id));
        before - log.messages.len()
    }

    pub(crate) async fn push_media(&self, room: &RoomKey, record: MediaRecord) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room.clone()).or_default().media.push(record);
    }

    pub(crate) async fn apply_group(&self, change: GroupChange) {
        change.apply(&mut *self.groups.write().await);
    }
}

#[async_trait]
impl DurableSink for MemorySink {
    async fn persist(&self, draft: EnvelopeDraft) -> Result<Envelope, SinkError> {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(draft.room().clone()).or_default();
        let envelope = log.stamp(draft);
        log.push(envelope.clone());
        drop(rooms);
        Ok(envelope)
    }

    async fn query(
        &self,
        room: &RoomKey,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Envelope>, SinkError> {
        let rooms = self.rooms.read().await;
        let Some(log) = rooms.get(room) else {
            return Ok(Vec::new());
        };
        let skip = page.saturating_sub(1).saturating_mul(page_size);
        Ok(log
            .messages
            .iter()
            .rev()
            .skip(skip)
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn has_room(&self, room: &RoomKey) -> Result<bool, SinkError> {
        Ok(self.rooms.read().await.contains_key(room))
    }

    async fn delete_all(&self, room: &RoomKey) -> Result<usize, SinkError> {
        Ok(self.remove_all(room).await)
    }

    async fn delete_by_ids(&self, room: &RoomKey, ids: &[MessageId]) -> Result<usize, SinkError> {
        Ok(self.remove_ids(room, ids).await)
    }

    async fn record_media(&self, room: &RoomKey, record: MediaRecord) -> Result<(), SinkError> {
        self.push_media(room, record).await;
        Ok(())
    }

    async fn list_media(&self, room: &RoomKey) -> Result<Vec<MediaRecord>, SinkError> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room).map(|log| log.media.clone()).unwrap_or_default())
    }

    async fn record_group(&self, change: &GroupChange) -> Result<(), SinkError> {
        self.apply_group(change.clone()).await;
        Ok(())
    }

    async fn load_groups(&self) -> Result<Vec<GroupRoom>, SinkError> {
        let mut groups: Vec<GroupRoom> = self.groups.read().await.values().cloned().collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(groups)
    }
}
