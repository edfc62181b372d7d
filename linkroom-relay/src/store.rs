//! Append-only file sink.
//!
//! [`FileSink`] keeps the working state in a [`MemorySink`] and mirrors every
//! mutation to a log file before applying it, so the file is the system of
//! record across restarts. The file is a sequence of length-prefixed
//! postcard records:
//!
//! ```text
//! [u32 length (LE)][postcard bytes] [u32 length (LE)][postcard bytes] ...
//! ```
//!
//! On open the log is replayed. A truncated trailing frame (crash during a
//! write) is dropped and the file is cut back to its last complete record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use linkroom_proto::message::{Envelope, MediaRecord, MessageId};
use linkroom_proto::room::RoomKey;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::rooms::{GroupChange, GroupRoom};
use crate::sink::{DurableSink, MemorySink, SinkError};
use crate::validate::EnvelopeDraft;

/// Length of the frame header.
const PREFIX_LEN: usize = 4;

/// One mutation of the durable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum LogRecord {
    Persisted(Envelope),
    DeletedAll(RoomKey),
    DeletedIds(RoomKey, Vec<MessageId>),
    MediaRecorded(RoomKey, MediaRecord),
    Group(GroupChange),
}

/// Encodes a record with a 4-byte little-endian length prefix.
fn encode_framed(record: &LogRecord) -> Result<Vec<u8>, SinkError> {
    let payload = postcard::to_allocvec(record).map_err(|e| SinkError::Encoding(e.to_string()))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        SinkError::Encoding(format!("record too large for framing: {} bytes", payload.len()))
    })?;
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes the frame at the start of `bytes`.
///
/// Returns the record and the number of bytes consumed, or `None` if the
/// buffer ends before the frame does.
fn decode_framed(bytes: &[u8]) -> Result<Option<(LogRecord, usize)>, SinkError> {
    let Some(prefix) = bytes.get(..PREFIX_LEN) else {
        return Ok(None);
    };
    let len_bytes: [u8; PREFIX_LEN] = prefix
        .try_into()
        .map_err(|_| SinkError::Encoding("failed to read length prefix".into()))?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    let total_len = PREFIX_LEN + payload_len;
    let Some(payload) = bytes.get(PREFIX_LEN..total_len) else {
        return Ok(None);
    };
    let record = postcard::from_bytes(payload).map_err(|e| SinkError::Encoding(e.to_string()))?;
    Ok(Some((record, total_len)))
}

struct LogFile {
    file: File,
    /// Length of the valid prefix of the file.
    len: u64,
}

/// [`DurableSink`] backed by an append-only log file.
pub struct FileSink {
    path: PathBuf,
    memory: MemorySink,
    log: Mutex<LogFile>,
}

impl FileSink {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be read or opened, or
    /// [`SinkError::Encoding`] if a complete record in it cannot be decoded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let memory = MemorySink::new();
        let mut offset = 0;
        let mut replayed = 0usize;
        while let Some((record, consumed)) = decode_framed(&bytes[offset..])? {
            apply(&memory, record).await;
            offset += consumed;
            replayed += 1;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let len = offset as u64;
        if offset < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                dropped = bytes.len() - offset,
                "dropping truncated trailing record"
            );
            file.set_len(len).await?;
        }

        tracing::info!(path = %path.display(), records = replayed, "message log replayed");

        Ok(Self {
            path,
            memory,
            log: Mutex::new(LogFile { file, len }),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Applies a replayed or freshly written record to the working state.
async fn apply(memory: &MemorySink, record: LogRecord) {
    match record {
        LogRecord::Persisted(envelope) => memory.insert(envelope).await,
        LogRecord::DeletedAll(room) => {
            memory.remove_all(&room).await;
        }
        LogRecord::DeletedIds(room, ids) => {
            memory.remove_ids(&room, &ids).await;
        }
        LogRecord::MediaRecorded(room, media) => memory.push_media(&room, media).await,
        LogRecord::Group(change) => memory.apply_group(change).await,
    }
}

impl LogFile {
    /// Appends one record and flushes it to disk. On failure the file is cut
    /// back to its previous length.
    async fn append(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        let frame = encode_framed(record)?;
        let result = async {
            self.file.write_all(&frame).await?;
            self.file.sync_data().await
        }
        .await;
        match result {
            Ok(()) => {
                self.len += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.file.set_len(self.len).await {
                    tracing::error!(error = %rollback, "failed to roll back partial log write");
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl DurableSink for FileSink {
    async fn persist(&self, draft: EnvelopeDraft) -> Result<Envelope, SinkError> {
        // The log lock serializes every mutation, so the stamp taken here is
        // still the next one when it is inserted.
        let mut log = self.log.lock().await;
        let envelope = self.memory.prepare(draft).await;
        log.append(&LogRecord::Persisted(envelope.clone())).await?;
        self.memory.insert(envelope.clone()).await;
        drop(log);
        Ok(envelope)
    }

    async fn query(
        &self,
        room: &RoomKey,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Envelope>, SinkError> {
        self.memory.query(room, page, page_size).await
    }

    async fn has_room(&self, room: &RoomKey) -> Result<bool, SinkError> {
        self.memory.has_room(room).await
    }

    async fn delete_all(&self, room: &RoomKey) -> Result<usize, SinkError> {
        let mut log = self.log.lock().await;
        if !self.memory.has_room(room).await? {
            return Ok(0);
        }
        log.append(&LogRecord::DeletedAll(room.clone())).await?;
        Ok(self.memory.remove_all(room).await)
    }

    async fn delete_by_ids(&self, room: &RoomKey, ids: &[MessageId]) -> Result<usize, SinkError> {
        let mut log = self.log.lock().await;
        log.append(&LogRecord::DeletedIds(room.clone(), ids.to_vec()))
            .await?;
        Ok(self.memory.remove_ids(room, ids).await)
    }

    async fn record_media(&self, room: &RoomKey, record: MediaRecord) -> Result<(), SinkError> {
        let mut log = self.log.lock().await;
        log.append(&LogRecord::MediaRecorded(room.clone(), record.clone()))
            .await?;
        self.memory.push_media(room, record).await;
        Ok(())
    }

    async fn list_media(&self, room: &RoomKey) -> Result<Vec<MediaRecord>, SinkError> {
        self.memory.list_media(room).await
    }

    async fn record_group(&self, change: &GroupChange) -> Result<(), SinkError> {
        let mut log = self.log.lock().await;
        log.append(&LogRecord::Group(change.clone())).await?;
        self.memory.apply_group(change.clone()).await;
        Ok(())
    }

    async fn load_groups(&self) -> Result<Vec<GroupRoom>, SinkError> {
        self.memory.load_groups().await
    }
}
