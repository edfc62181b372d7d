//! Media blob storage. Envelopes and room media lists only ever hold the
//! returned URL.

use std::path::PathBuf;

use async_trait::async_trait;
use linkroom_proto::message::{MediaKind, MediaRef};
use uuid::Uuid;

/// URL prefix of stored blobs.
pub const UPLOAD_PREFIX: &str = "/uploads";

/// Errors from a [`MediaStore`].
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The upload had no bytes.
    #[error("no file uploaded")]
    Empty,
    /// Writing the blob failed.
    #[error("failed to store media: {0}")]
    Io(#[from] std::io::Error),
}

/// Stores uploaded blobs and hands back a reference to them.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Stores `bytes` of the given MIME type.
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<MediaRef, MediaError>;
}

/// [`MediaStore`] writing blobs into a local directory.
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    dir: PathBuf,
}

impl LocalMediaStore {
    /// Stores blobs under `dir`, creating it on first upload.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or_default();
    match essence.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<MediaRef, MediaError> {
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!("{}.{}", Uuid::now_v7(), extension_for(content_type));
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        tracing::debug!(file = %name, size = bytes.len(), "media stored");
        Ok(MediaRef {
            url: format!("{UPLOAD_PREFIX}/{name}"),
            kind: MediaKind::from_mime(content_type),
        })
    }
}
