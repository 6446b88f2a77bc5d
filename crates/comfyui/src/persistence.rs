//! Media persistence: download engine outputs into the local output root.
//!
//! Each descriptor is fetched through `/view` and streamed straight to disk
//! under a fresh randomized name, so concurrent jobs (or repeated downloads
//! of the same remote file) never collide. A failed download aborts the
//! batch; files written before the failure stay on disk.

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use animegen_core::error::CoreError;
use animegen_core::media::{MediaDescriptor, MediaKind, MediaRecord, TYPE_LOCAL};
use animegen_core::naming::{local_media_filename, resolve_extension};
use animegen_core::storage::OutputRoot;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Errors raised while persisting a batch.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The engine answered `/view` with a non-success status.
    #[error("Unable to download generated {kind} '{filename}': HTTP {status}")]
    Download {
        kind: String,
        filename: String,
        status: u16,
    },

    /// The request failed before a status was received, or mid-stream.
    #[error("Failed to download '{filename}': {source}")]
    Transfer {
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Downloads media from one engine into one output root.
#[derive(Debug, Clone)]
pub struct MediaStore {
    api: ComfyUIApi,
    root: OutputRoot,
}

impl MediaStore {
    pub fn new(api: ComfyUIApi, root: OutputRoot) -> Self {
        Self { api, root }
    }

    pub fn root(&self) -> &OutputRoot {
        &self.root
    }

    /// Download every descriptor, in order, and describe what was written.
    pub async fn persist(
        &self,
        media: &[MediaDescriptor],
        job_id: &str,
        kind: &MediaKind,
    ) -> Result<Vec<MediaRecord>, PersistError> {
        tokio::fs::create_dir_all(self.root.path())
            .await
            .map_err(|source| PersistError::Io {
                path: self.root.path().display().to_string(),
                source,
            })?;

        let mut records = Vec::with_capacity(media.len());
        for (offset, descriptor) in media.iter().enumerate() {
            let record = self.persist_one(descriptor, job_id, kind, offset + 1).await?;
            records.push(record);
        }

        tracing::info!(
            job_id,
            kind = %kind,
            count = records.len(),
            root = %self.root.path().display(),
            "Persisted generated media",
        );
        Ok(records)
    }

    async fn persist_one(
        &self,
        descriptor: &MediaDescriptor,
        job_id: &str,
        kind: &MediaKind,
        index: usize,
    ) -> Result<MediaRecord, PersistError> {
        let mut remote = descriptor.clone();
        if remote.filename.is_empty() {
            remote.filename = format!("{job_id}_{index}");
        }

        let response = self.api.view(&remote).await.map_err(|e| match e {
            ComfyUIApiError::ApiError { status, .. } => PersistError::Download {
                kind: kind.singular().to_string(),
                filename: remote.filename.clone(),
                status,
            },
            other => PersistError::Transfer {
                filename: remote.filename.clone(),
                source: other,
            },
        })?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let extension = resolve_extension(
            remote.format.as_deref(),
            &remote.filename,
            content_type.as_deref(),
            kind,
        );
        let local_name = local_media_filename(job_id, kind, index, &extension);
        let path = self.root.resolve(&local_name)?;
        let io_error = |source| PersistError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut file = tokio::fs::File::create(&path).await.map_err(io_error)?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PersistError::Transfer {
                filename: remote.filename.clone(),
                source: e.into(),
            })?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;
        drop(file);

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot stat persisted file");
                None
            }
        };
        tracing::debug!(
            job_id,
            remote = %remote.filename,
            local = %local_name,
            bytes = written,
            "Downloaded media",
        );

        Ok(MediaRecord {
            filename: local_name.clone(),
            local_path: local_name,
            media_type: TYPE_LOCAL.to_string(),
            subfolder: String::new(),
            mime_type: content_type.unwrap_or_else(|| kind.default_mime().to_string()),
            size,
            prompt_id: job_id.to_string(),
            original_name: remote.filename.clone(),
            format: remote.format.clone(),
            original: remote,
            created_at: chrono::Utc::now(),
        })
    }
}
