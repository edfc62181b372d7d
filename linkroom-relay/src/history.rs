//! Pagination reader and administrative deletes over the durable sink.

use std::sync::Arc;

use linkroom_proto::message::{Envelope, MessageId};
use linkroom_proto::room::{RoomKey, RoomKind};
use serde::Serialize;

use crate::rooms::GroupRegistry;
use crate::sink::{DurableSink, SinkError};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: usize = 100;

/// Errors from history reads and deletes.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Pages are numbered from 1.
    #[error("page must be at least 1")]
    InvalidPage,
    /// A page must hold at least one message.
    #[error("page size must be at least 1")]
    InvalidPageSize,
    /// The room has no history and no membership record.
    #[error("room {0} not found")]
    RoomNotFound(RoomKey),
    /// A selective delete listed no ids.
    #[error("no message ids given")]
    NoMessageIds,
    /// The sink failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// One page of a room's history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Room the page belongs to.
    pub room_id: RoomKey,
    /// 1-based page number.
    pub page: usize,
    /// Page size actually applied.
    pub page_size: usize,
    /// Messages, strictly descending by `(createdAt, seq)`.
    pub messages: Vec<Envelope>,
}

/// Reads and prunes room history.
#[derive(Clone)]
pub struct HistoryReader {
    sink: Arc<dyn DurableSink>,
    groups: Arc<GroupRegistry>,
    default_page_size: usize,
    max_page_size: usize,
}

impl HistoryReader {
    /// Creates a reader with the default page limits.
    pub fn new(sink: Arc<dyn DurableSink>, groups: Arc<GroupRegistry>) -> Self {
        Self {
            sink,
            groups,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    /// Overrides the page limits. A zero default falls back to 1 and the
    /// maximum never drops below the default.
    #[must_use]
    pub fn with_page_limits(mut self, default_page_size: usize, max_page_size: usize) -> Self {
        self.default_page_size = default_page_size.max(1);
        self.max_page_size = max_page_size.max(self.default_page_size);
        self
    }

    /// Returns page `page` of the room's history.
    ///
    /// `page` defaults to 1 and `page_size` to the configured default; page
    /// sizes above the configured maximum are clamped. A page past the end
    /// is empty.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidPage`] or [`HistoryError::InvalidPageSize`]
    /// for zero values, [`HistoryError::RoomNotFound`] if the room has neither
    /// history nor a membership record, or [`HistoryError::Sink`].
    pub async fn list_messages(
        &self,
        room: &RoomKey,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<HistoryPage, HistoryError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(HistoryError::InvalidPage);
        }
        let page_size = match page_size {
            Some(0) => return Err(HistoryError::InvalidPageSize),
            Some(size) => size.min(self.max_page_size),
            None => self.default_page_size,
        };

        if !self.sink.has_room(room).await? && !self.has_membership_record(room).await {
            return Err(HistoryError::RoomNotFound(room.clone()));
        }

        let messages = self.sink.query(room, page, page_size).await?;
        Ok(HistoryPage {
            room_id: room.clone(),
            page,
            page_size,
            messages,
        })
    }

    /// Deletes the room's whole history. Returns how many messages went.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Sink`].
    pub async fn delete_all_messages(&self, room: &RoomKey) -> Result<usize, HistoryError> {
        let removed = self.sink.delete_all(room).await?;
        tracing::info!(room_id = %room, removed, "history cleared");
        Ok(removed)
    }

    /// Deletes the listed messages of the room. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoMessageIds`] for an empty list, or
    /// [`HistoryError::Sink`].
    pub async fn delete_selected_messages(
        &self,
        room: &RoomKey,
        ids: &[MessageId],
    ) -> Result<usize, HistoryError> {
        if ids.is_empty() {
            return Err(HistoryError::NoMessageIds);
        }
        let removed = self.sink.delete_by_ids(room, ids).await?;
        tracing::info!(room_id = %room, requested = ids.len(), removed, "messages deleted");
        Ok(removed)
    }

    /// Direct rooms are never recorded on their own; group rooms are known
    /// while the group exists.
    async fn has_membership_record(&self, room: &RoomKey) -> bool {
        match (room.kind(), room.group_id()) {
            (RoomKind::Group, Some(id)) => self.groups.contains(id).await,
            _ => false,
        }
    }
}
