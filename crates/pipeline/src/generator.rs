//! Generation jobs against one ComfyUI instance.
//!
//! [`Generator`] ties the pieces together: it instantiates a template from
//! the shared [`TemplateStore`], applies a recipe, uploads the source image
//! when the recipe needs one, submits under a fresh client id, waits with
//! the [`CompletionWatcher`] and persists whatever was produced.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use animegen_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use animegen_comfyui::client::ComfyUIClient;
use animegen_comfyui::endpoint::EngineEndpoint;
use animegen_comfyui::persistence::{MediaStore, PersistError};
use animegen_comfyui::resolver::OutputResolver;
use animegen_comfyui::upload::{UploadBridge, UploadError, UploadedImage};
use animegen_comfyui::watcher::{CompletionWatcher, WatchConfig, WatchError, WatchRequest, DEFAULT_MAX_WAIT};
use animegen_core::error::CoreError;
use animegen_core::generation::{
    apply_image_edit, apply_image_to_video, apply_text_to_image, ImageEditParams, ImageToVideoParams,
    OutputTarget, TextToImageParams,
};
use animegen_core::media::MediaRecord;
use animegen_core::storage::OutputRoot;
use animegen_core::workflow::{JobDocument, TemplateKind, TemplateStore};

use crate::source::{SourceImage, SourceOrigin};
use crate::status::{JobContext, JobStatus};

/// Result of a successful generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub prompt_id: String,
    pub client_id: String,
    pub status: JobStatus,
    /// Seed written into the sampler, for recipes that take one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub media: Vec<MediaRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Unable to upload source image: {0}")]
    Upload(#[from] UploadError),

    #[error("Failed to queue workflow: {0}")]
    Submit(#[source] ComfyUIApiError),

    #[error("Failed while waiting for job {prompt_id}: {source}")]
    Watch {
        prompt_id: String,
        #[source]
        source: WatchError,
    },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("{kind} generation completed but no output was returned")]
    NoOutput { kind: String, prompt_id: String },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Engine and storage settings for a [`Generator`].
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub endpoint: EngineEndpoint,
    pub output_root: OutputRoot,
    pub watch: WatchConfig,
    pub max_wait: Duration,
}

impl GeneratorConfig {
    pub fn new(endpoint: EngineEndpoint, output_root: OutputRoot) -> Self {
        Self {
            endpoint,
            output_root,
            watch: WatchConfig::default(),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Runs generation jobs on one ComfyUI instance. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Generator {
    templates: Arc<TemplateStore>,
    api: ComfyUIApi,
    watcher: CompletionWatcher,
    media: MediaStore,
    uploads: UploadBridge,
    max_wait: Duration,
}

impl Generator {
    pub fn new(templates: Arc<TemplateStore>, config: GeneratorConfig) -> Self {
        let api = ComfyUIApi::new(config.endpoint.api_url().to_string());
        let watcher = CompletionWatcher::new(
            OutputResolver::new(api.clone()),
            ComfyUIClient::new(config.endpoint.clone()),
            config.watch,
        );
        Self {
            media: MediaStore::new(api.clone(), config.output_root.clone()),
            uploads: UploadBridge::new(api.clone(), config.output_root),
            templates,
            api,
            watcher,
            max_wait: config.max_wait,
        }
    }

    /// Text to image.
    pub async fn generate_images(
        &self,
        params: &TextToImageParams,
        ctx: &JobContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        finish(self.text_to_image(params, ctx).await, ctx)
    }

    /// Animate a source image.
    pub async fn generate_video(
        &self,
        params: &ImageToVideoParams,
        source: &SourceImage,
        ctx: &JobContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        finish(self.image_to_video(params, source, ctx).await, ctx)
    }

    /// Edit a source image from a prompt.
    pub async fn edit_image(
        &self,
        params: &ImageEditParams,
        source: &SourceImage,
        ctx: &JobContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        finish(self.image_edit(params, source, ctx).await, ctx)
    }

    /// Put a source image into the engine's input namespace.
    pub async fn upload_source(&self, source: &SourceImage) -> Result<UploadedImage, GenerationError> {
        let uploaded = match source.origin() {
            SourceOrigin::DataUrl {
                data_url,
                filename,
                mime_type,
            } => self.uploads.upload_data_url(data_url, filename, mime_type).await?,
            SourceOrigin::Local(filename) => self.uploads.upload_local(filename).await?,
            SourceOrigin::Engine(descriptor) => self.uploads.reupload_engine_file(&descriptor).await?,
        };
        Ok(uploaded)
    }

    async fn text_to_image(
        &self,
        params: &TextToImageParams,
        ctx: &JobContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        let mut doc = self.document(TemplateKind::TextToImage)?;
        let seed = apply_text_to_image(&mut doc, params)?;
        self.run(doc, OutputTarget::text_to_image(), Some(seed), ctx).await
    }

    async fn image_to_video(
        &self,
        params: &ImageToVideoParams,
        source: &SourceImage,
        ctx: &JobContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        if source.is_empty() {
            return Err(CoreError::Validation("No source image provided for video mode".into()).into());
        }
        let mut doc = self.document(TemplateKind::ImageToVideo)?;
        let uploaded = self.upload_source(source).await?;
        apply_image_to_video(&mut doc, params, &uploaded.name);
        self.run(doc, OutputTarget::image_to_video(), None, ctx).await
    }

    async fn image_edit(
        &self,
        params: &ImageEditParams,
        source: &SourceImage,
        ctx: &JobContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        if source.is_empty() {
            return Err(CoreError::Validation("No source image provided for edit mode".into()).into());
        }
        let mut doc = self.document(TemplateKind::ImageEdit)?;
        let uploaded = self.upload_source(source).await?;
        let seed = apply_image_edit(&mut doc, params, &uploaded.name);
        self.run(doc, OutputTarget::image_edit(), Some(seed), ctx).await
    }

    fn document(&self, kind: TemplateKind) -> Result<JobDocument, CoreError> {
        Ok(self.templates.get(kind)?.instantiate())
    }

    async fn run(
        &self,
        doc: JobDocument,
        target: OutputTarget,
        seed: Option<u64>,
        ctx: &JobContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let submitted = self
            .api
            .submit_workflow(&doc.to_value(), &client_id)
            .await
            .map_err(GenerationError::Submit)?;
        let prompt_id = submitted.prompt_id;

        tracing::info!(
            prompt_id = %prompt_id,
            client_id = %client_id,
            kind = %target.kind,
            queue_number = ?submitted.number,
            "Workflow submitted to ComfyUI",
        );
        ctx.set(JobStatus::Waiting {
            prompt_id: prompt_id.clone(),
        });

        let request = WatchRequest {
            client_id: client_id.clone(),
            job_id: prompt_id.clone(),
            target_nodes: target.nodes.clone(),
            kind: target.kind.clone(),
            max_wait: self.max_wait,
        };
        let media = match self.watcher.await_completion(&request, ctx.cancel_token()).await {
            Ok(media) => media,
            Err(WatchError::Cancelled) => {
                self.cancel_remote(&prompt_id).await;
                return Err(GenerationError::Cancelled);
            }
            Err(source) => return Err(GenerationError::Watch { prompt_id, source }),
        };

        if media.is_empty() {
            return Err(GenerationError::NoOutput {
                kind: capitalize(target.kind.singular()),
                prompt_id,
            });
        }

        ctx.set(JobStatus::Persisting {
            prompt_id: prompt_id.clone(),
            count: media.len(),
        });
        let records = self.media.persist(&media, &prompt_id, &target.kind).await?;
        let status = JobStatus::Completed {
            prompt_id: prompt_id.clone(),
            count: records.len(),
        };

        Ok(GenerationOutcome {
            prompt_id,
            client_id,
            status,
            seed,
            media: records,
        })
    }

    /// Ask the engine to drop a job the caller gave up on. Best effort.
    async fn cancel_remote(&self, prompt_id: &str) {
        match self.api.cancel_execution(prompt_id).await {
            Ok(()) => tracing::info!(prompt_id, "Cancelled ComfyUI job"),
            Err(e) => tracing::warn!(prompt_id, error = %e, "Failed to cancel ComfyUI job"),
        }
    }
}

/// Publish the terminal status for `outcome`.
fn finish(
    outcome: Result<GenerationOutcome, GenerationError>,
    ctx: &JobContext,
) -> Result<GenerationOutcome, GenerationError> {
    match &outcome {
        Ok(o) => ctx.set(o.status.clone()),
        Err(GenerationError::Cancelled) => ctx.set(JobStatus::Cancelled),
        Err(e) => {
            tracing::error!(error = %e, "Generation failed");
            ctx.set(JobStatus::Failed { error: e.to_string() });
        }
    }
    outcome
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_first_letter() {
        assert_eq!(capitalize("video"), "Video");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn no_output_message_names_kind() {
        let err = GenerationError::NoOutput {
            kind: "Video".into(),
            prompt_id: "p".into(),
        };
        assert_eq!(err.to_string(), "Video generation completed but no output was returned");
    }
}
