//! Fixtures shared by the unit tests of several modules.

use std::path::PathBuf;

use async_trait::async_trait;
use linkroom_proto::event::SendMessage;
use linkroom_proto::message::{Envelope, MediaRecord, MessageId, UserId};
use linkroom_proto::room::{RoomKey, SelfChatPolicy};
use tokio::sync::Semaphore;

use crate::rooms::{GroupChange, GroupRoom};
use crate::sink::{DurableSink, MemorySink, SinkError};
use crate::validate::{EnvelopeDraft, validate};

/// A text draft from `sender` to the group room `room`.
pub fn draft(room: &str, sender: &str, text: &str) -> EnvelopeDraft {
    let payload = SendMessage {
        room_id: Some(format!("group:{room}")),
        content: Some(text.to_string()),
        ..SendMessage::default()
    };
    validate(&UserId::new(sender), payload, SelfChatPolicy::Reject).expect("fixture draft is valid")
}

/// A unique path under the system temp directory.
pub fn scratch_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("linkroom-{label}-{}.log", uuid::Uuid::now_v7()))
}

/// A sink whose backing store is always down.
pub struct FailingSink;

fn down() -> SinkError {
    SinkError::Unavailable("store offline".into())
}

#[async_trait]
impl DurableSink for FailingSink {
    async fn persist(&self, _draft: EnvelopeDraft) -> Result<Envelope, SinkError> {
        Err(down())
    }

    async fn query(&self, _: &RoomKey, _: usize, _: usize) -> Result<Vec<Envelope>, SinkError> {
        Err(down())
    }

    async fn has_room(&self, _: &RoomKey) -> Result<bool, SinkError> {
        Err(down())
    }

    async fn delete_all(&self, _: &RoomKey) -> Result<usize, SinkError> {
        Err(down())
    }

    async fn delete_by_ids(&self, _: &RoomKey, _: &[MessageId]) -> Result<usize, SinkError> {
        Err(down())
    }

    async fn record_media(&self, _: &RoomKey, _: MediaRecord) -> Result<(), SinkError> {
        Err(down())
    }

    async fn list_media(&self, _: &RoomKey) -> Result<Vec<MediaRecord>, SinkError> {
        Err(down())
    }

    async fn record_group(&self, _: &GroupChange) -> Result<(), SinkError> {
        Err(down())
    }

    async fn load_groups(&self) -> Result<Vec<GroupRoom>, SinkError> {
        Err(down())
    }
}

/// A memory sink whose `persist` blocks until [`GatedSink::release`] is
/// called once per pending write.
pub struct GatedSink {
    pub inner: MemorySink,
    gate: Semaphore,
}

impl GatedSink {
    pub fn new() -> Self {
        Self {
            inner: MemorySink::new(),
            gate: Semaphore::new(0),
        }
    }

    /// Lets one blocked `persist` through.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl DurableSink for GatedSink {
    async fn persist(&self, draft: EnvelopeDraft) -> Result<Envelope, SinkError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| SinkError::Unavailable("gate closed".into()))?
            .forget();
        self.inner.persist(draft).await
    }

    async fn query(&self, room: &RoomKey, page: usize, size: usize) -> Result<Vec<Envelope>, SinkError> {
        self.inner.query(room, page, size).await
    }

    async fn has_room(&self, room: &RoomKey) -> Result<bool, SinkError> {
        self.inner.has_room(room).await
    }

    async fn delete_all(&self, room: &RoomKey) -> Result<usize, SinkError> {
        self.inner.delete_all(room).await
    }

    async fn delete_by_ids(&self, room: &RoomKey, ids: &[MessageId]) -> Result<usize, SinkError> {
        self.inner.delete_by_ids(room, ids).await
    }

    async fn record_media(&self, room: &RoomKey, record: MediaRecord) -> Result<(), SinkError> {
        self.inner.record_media(room, record).await
    }

    async fn list_media(&self, room: &RoomKey) -> Result<Vec<MediaRecord>, SinkError> {
        self.inner.list_media(room).await
    }

    async fn record_group(&self, change: &GroupChange) -> Result<(), SinkError> {
        self.inner.record_group(change).await
    }

    async fn load_groups(&self) -> Result<Vec<GroupRoom>, SinkError> {
        self.inner.load_groups().await
    }
}
