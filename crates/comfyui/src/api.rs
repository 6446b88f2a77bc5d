//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, cancellation, history retrieval, media
//! download (`/view`) and image upload (`/upload/image`) using [`reqwest`].
//! Every method surfaces non-success statuses as
//! [`ComfyUIApiError::ApiError`]; deciding whether a failure is fatal or
//! merely "not yet available" is left to the caller.

use std::time::Duration;

use serde::Deserialize;

use animegen_core::media::MediaDescriptor;

/// Timeout for history lookups, which are polled frequently.
const HISTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for uploads and the download half of a re-upload.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for streamed downloads of generated media.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue, when reported.
    #[serde(default)]
    pub number: Option<i64>,
    /// Per-node validation errors the engine accepted the prompt with.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Response of `/upload/image`.
#[derive(Debug, Default, Deserialize)]
pub struct UploadResponse {
    /// Name the engine stored the file under.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub image_type: Option<String>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A success status whose body could not be decoded.
    #[error("Unexpected ComfyUI response ({status}): {reason}; body: {body}")]
    InvalidResponse {
        status: u16,
        body: String,
        reason: String,
    },
}

impl ComfyUIApiError {
    /// `true` when retrying can never help because the request could not
    /// even be built (e.g. a malformed base URL).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_builder())
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::ApiError { status, .. } | Self::InvalidResponse { status, .. } => Some(*status),
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Rejections are never swallowed: any non-2xx status comes
    /// back as [`ComfyUIApiError::ApiError`] with the raw body.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Cancel a queued or running execution.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The shape of the
    /// returned JSON differs between ComfyUI versions.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve the whole history collection (`GET /history`).
    pub async fn get_full_history(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history", self.api_url))
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Request a file from the engine (`GET /view`).
    ///
    /// Returns the successful response unread so the caller can stream it.
    pub async fn view(&self, media: &MediaDescriptor) -> Result<reqwest::Response, ComfyUIApiError> {
        let media_type = if media.media_type.is_empty() {
            animegen_core::media::TYPE_OUTPUT
        } else {
            media.media_type.as_str()
        };
        let mut query = vec![("filename", media.filename.as_str()), ("type", media_type)];
        if !media.subfolder.is_empty() {
            query.push(("subfolder", media.subfolder.as_str()));
        }
        if let Some(format) = media.format.as_deref() {
            query.push(("format", format));
        }

        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&query)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        Self::ensure_success(response).await
    }

    /// Upload raw image bytes (`POST /upload/image`, `overwrite=true`).
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        upload_name: &str,
        mime_type: &str,
        image_type: &str,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(upload_name.to_string())
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("type", image_type.to_string())
            .text("overwrite", "true")
            .part("image", part);

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Upload response was not JSON, using generated name");
            UploadResponse::default()
        }))
    }

    // ---- private helpers ----

    /// Ensure the response is a plain `200 OK`; ComfyUI answers every
    /// endpoint used here with exactly that. Returns the response unchanged
    /// on success, or a [`ComfyUIApiError::ApiError`] containing the status
    /// and body text otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ComfyUIApiError::InvalidResponse {
            status,
            body,
            reason: e.to_string(),
        })
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
