//! Upload bridge: get a source image into the engine's `input` namespace.
//!
//! Three sources end in the same multipart `POST /upload/image`:
//!
//! * a file the engine already produced (downloaded through `/view` first),
//! * a file previously persisted under the local output root,
//! * a base64 `data:` URL sent by the browser.
//!
//! The engine-assigned name is what workflows reference afterwards.

use animegen_core::data_url::decode_data_url;
use animegen_core::error::CoreError;
use animegen_core::media::{MediaDescriptor, TYPE_INPUT};
use animegen_core::naming::{
    extension_for_mime, file_extension, mime_for_filename, sanitize_filename, upload_filename,
    DEFAULT_UPLOAD_NAME,
};
use animegen_core::storage::OutputRoot;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Name prefix for engine outputs re-uploaded as a source image.
pub const ENGINE_SOURCE_PREFIX: &str = "video_source";

/// Name prefix for user-provided images (local files and data URLs).
pub const USER_UPLOAD_PREFIX: &str = "user_upload";

const FALLBACK_MIME: &str = "image/png";
const FALLBACK_EXTENSION: &str = ".png";

/// An image now available in the engine's `input` namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Name to put into a workflow's image input.
    pub name: String,
    pub subfolder: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Fetching the source from the engine failed.
    #[error("Unable to retrieve source image '{filename}': {source}")]
    Retrieve {
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },

    /// The upload request itself failed.
    #[error("Unable to upload image: {0}")]
    Api(#[from] ComfyUIApiError),

    /// Bad input or a local file problem.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl UploadError {
    /// HTTP status returned by the engine, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Retrieve { source, .. } | Self::Api(source) => source.status(),
            Self::Core(_) => None,
        }
    }
}

/// Uploads source images to one engine.
#[derive(Debug, Clone)]
pub struct UploadBridge {
    api: ComfyUIApi,
    root: OutputRoot,
}

impl UploadBridge {
    pub fn new(api: ComfyUIApi, root: OutputRoot) -> Self {
        Self { api, root }
    }

    /// Download a file from the engine's namespace and upload it as input.
    pub async fn reupload_engine_file(&self, media: &MediaDescriptor) -> Result<UploadedImage, UploadError> {
        let retrieve_error = |source| UploadError::Retrieve {
            filename: media.filename.clone(),
            source,
        };
        let response = self.api.view(media).await.map_err(retrieve_error)?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(FALLBACK_MIME)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| retrieve_error(ComfyUIApiError::from(e)))?;

        let extension = file_extension(&media.filename).unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        let upload_name = upload_filename(ENGINE_SOURCE_PREFIX, &extension);
        tracing::debug!(
            remote = %media.filename,
            upload_name = %upload_name,
            bytes = bytes.len(),
            "Re-uploading engine output as source image",
        );
        self.send(bytes.to_vec(), upload_name, &content_type).await
    }

    /// Upload a file previously persisted under the output root.
    ///
    /// The name is validated before the filesystem is touched, so traversal
    /// attempts fail as such and not as missing files.
    pub async fn upload_local(&self, local_filename: &str) -> Result<UploadedImage, UploadError> {
        let path = self.root.resolve(local_filename)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::NotFound(format!("Local media file not found: {local_filename}")).into());
            }
            Err(e) => return Err(CoreError::Io(e).into()),
        };

        let mime_type = mime_for_filename(local_filename).unwrap_or_else(|| FALLBACK_MIME.to_string());
        self.upload_bytes(bytes, local_filename, &mime_type).await
    }

    /// Decode a `data:` URL and upload its content.
    pub async fn upload_data_url(
        &self,
        data_url: &str,
        filename: Option<&str>,
        mime_override: Option<&str>,
    ) -> Result<UploadedImage, UploadError> {
        let decoded = decode_data_url(data_url, mime_override)?;
        self.upload_bytes(
            decoded.bytes,
            filename.unwrap_or(DEFAULT_UPLOAD_NAME),
            &decoded.mime_type,
        )
        .await
    }

    /// Upload raw bytes under a fresh `user_upload_*` name.
    ///
    /// The extension comes from the sanitized `filename`, then from
    /// `mime_type`, then defaults to `.png`.
    pub async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<UploadedImage, UploadError> {
        if bytes.is_empty() {
            return Err(CoreError::Validation("Empty image content provided".into()).into());
        }

        let base_name = Some(sanitize_filename(filename))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
        let extension = file_extension(&base_name)
            .or_else(|| extension_for_mime(mime_type))
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        let mime_type = if mime_type.is_empty() { FALLBACK_MIME } else { mime_type };

        self.send(bytes, upload_filename(USER_UPLOAD_PREFIX, &extension), mime_type)
            .await
    }

    async fn send(&self, bytes: Vec<u8>, upload_name: String, mime_type: &str) -> Result<UploadedImage, UploadError> {
        let response = self
            .api
            .upload_image(bytes, &upload_name, mime_type, TYPE_INPUT)
            .await?;

        let name = response.name.filter(|n| !n.is_empty()).unwrap_or(upload_name);
        tracing::info!(name = %name, subfolder = %response.subfolder, "Uploaded source image");
        Ok(UploadedImage {
            name,
            subfolder: response.subfolder,
        })
    }
}
