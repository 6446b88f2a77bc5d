//! Worker configuration loaded from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use animegen_comfyui::endpoint::{EndpointError, EngineEndpoint, DEFAULT_COMFYUI_HOST, DEFAULT_COMFYUI_PORT};
use animegen_comfyui::watcher::DEFAULT_MAX_WAIT;
use animegen_core::error::CoreError;
use animegen_core::storage::DEFAULT_OUTPUT_DIR;
use animegen_core::workflow::{candidate_paths, TemplateKind, TemplateStore};

/// Worker configuration.
///
/// | Env var                 | Default                        |
/// |-------------------------|--------------------------------|
/// | `COMFYUI_URL`           | built from host and port       |
/// | `COMFYUI_HOST`          | `127.0.0.1`                    |
/// | `COMFYUI_PORT`          | `8188` (`443` selects HTTPS)   |
/// | `OUTPUT_DIR`            | `output`                       |
/// | `IMAGE_WORKFLOW_PATH`   | bundled text-to-image workflow |
/// | `VIDEO_WORKFLOW_PATH`   | bundled image-to-video workflow|
/// | `EDIT_WORKFLOW_PATH`    | bundled image-edit workflow    |
/// | `COMFYUI_MAX_WAIT_SECS` | `300`                          |
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub endpoint: EngineEndpoint,
    pub output_dir: PathBuf,
    pub image_workflow: String,
    pub video_workflow: String,
    pub edit_workflow: String,
    pub max_wait: Duration,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// Unparseable numbers fall back to their defaults with a warning; only
    /// an invalid `COMFYUI_URL` is an error.
    pub fn from_env() -> Result<Self, EndpointError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EndpointError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let endpoint = match var("COMFYUI_URL") {
            Some(url) => EngineEndpoint::parse(&url)?,
            None => {
                let host = var("COMFYUI_HOST").unwrap_or_else(|| DEFAULT_COMFYUI_HOST.to_string());
                let port = parse_or("COMFYUI_PORT", var("COMFYUI_PORT"), DEFAULT_COMFYUI_PORT);
                EngineEndpoint::from_host_port(&host, port)?
            }
        };

        let max_wait = parse_or(
            "COMFYUI_MAX_WAIT_SECS",
            var("COMFYUI_MAX_WAIT_SECS"),
            DEFAULT_MAX_WAIT.as_secs(),
        );

        Ok(Self {
            endpoint,
            output_dir: PathBuf::from(var("OUTPUT_DIR").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())),
            image_workflow: var("IMAGE_WORKFLOW_PATH")
                .unwrap_or_else(|| TemplateKind::TextToImage.default_path().to_string()),
            video_workflow: var("VIDEO_WORKFLOW_PATH")
                .unwrap_or_else(|| TemplateKind::ImageToVideo.default_path().to_string()),
            edit_workflow: var("EDIT_WORKFLOW_PATH")
                .unwrap_or_else(|| TemplateKind::ImageEdit.default_path().to_string()),
            max_wait: Duration::from_secs(max_wait),
        })
    }

    pub fn workflow_path(&self, kind: TemplateKind) -> &str {
        match kind {
            TemplateKind::TextToImage => &self.image_workflow,
            TemplateKind::ImageToVideo => &self.video_workflow,
            TemplateKind::ImageEdit => &self.edit_workflow,
        }
    }

    /// Load the templates for `kinds`, trying each configured path as given,
    /// relative to `base_dir`, then the bundled default under `base_dir`.
    pub fn load_templates(&self, base_dir: &Path, kinds: &[TemplateKind]) -> Result<TemplateStore, CoreError> {
        let mut store = TemplateStore::new();
        for &kind in kinds {
            let candidates = candidate_paths(self.workflow_path(kind), base_dir, kind.default_path());
            store.load(kind, &candidates)?;
            tracing::debug!(kind = kind.label(), "Workflow template loaded");
        }
        Ok(store)
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid number in environment, using default");
            default
        }),
    }
}
