//! Workflow template store.
//!
//! A template is a ComfyUI API-format workflow: an ordered object mapping
//! node id to `{"class_type": ..., "inputs": {...}}`. Templates are loaded
//! once and never mutated; each job works on its own deep copy
//! ([`JobDocument`]) obtained from [`JobTemplate::instantiate`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Template kinds
// ---------------------------------------------------------------------------

/// Default template location for text-to-image jobs.
pub const DEFAULT_IMAGE_WORKFLOW: &str = "workflows/text-to-image/text-to-image-illustrious.json";

/// Default template location for image-to-video jobs.
pub const DEFAULT_VIDEO_WORKFLOW: &str = "workflows/image-to-video/video_wan2_2_14B_i2v_remix.json";

/// Default template location for image-edit jobs.
pub const DEFAULT_EDIT_WORKFLOW: &str = "workflows/edit-image/edit-image-qwen-2509.json";

/// The job families the generator knows how to parameterize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    TextToImage,
    ImageToVideo,
    ImageEdit,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 3] = [Self::TextToImage, Self::ImageToVideo, Self::ImageEdit];

    /// Path used when no override is configured.
    pub fn default_path(self) -> &'static str {
        match self {
            Self::TextToImage => DEFAULT_IMAGE_WORKFLOW,
            Self::ImageToVideo => DEFAULT_VIDEO_WORKFLOW,
            Self::ImageEdit => DEFAULT_EDIT_WORKFLOW,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TextToImage => "text-to-image",
            Self::ImageToVideo => "image-to-video",
            Self::ImageEdit => "image-edit",
        }
    }
}

// ---------------------------------------------------------------------------
// Template and per-job document
// ---------------------------------------------------------------------------

/// Immutable master copy of a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    nodes: Map<String, Value>,
}

impl JobTemplate {
    /// Wrap a parsed workflow. The top level must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(nodes) => {
                for (id, node) in &nodes {
                    if node.get("inputs").and_then(Value::as_object).is_none() {
                        tracing::debug!(node_id = %id, "Template node has no inputs object");
                    }
                }
                Ok(Self { nodes })
            }
            other => Err(CoreError::Validation(format!(
                "Workflow must be a JSON object of nodes, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Read and parse a template from a single file.
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_value(serde_json::from_str(&text)?)
    }

    /// Load from the first candidate path that exists.
    pub fn from_candidates(candidates: &[PathBuf]) -> Result<Self, CoreError> {
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| CoreError::TemplateNotFound {
                candidates: candidates.to_vec(),
            })?;
        let template = Self::from_file(path)?;
        tracing::info!(path = %path.display(), nodes = template.node_count(), "Workflow loaded");
        Ok(template)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Deep copy for one job.
    pub fn instantiate(&self) -> JobDocument {
        JobDocument {
            nodes: self.nodes.clone(),
        }
    }
}

/// A per-job, mutable copy of a template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobDocument {
    nodes: Map<String, Value>,
}

impl JobDocument {
    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Class tag of a node, e.g. `KSamplerAdvanced`.
    pub fn class_type(&self, node_id: &str) -> Option<&str> {
        self.nodes.get(node_id)?.get("class_type")?.as_str()
    }

    pub fn input(&self, node_id: &str, name: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.get("inputs")?.get(name)
    }

    pub fn input_str(&self, node_id: &str, name: &str) -> Option<&str> {
        self.input(node_id, name)?.as_str()
    }

    pub fn has_input(&self, node_id: &str, name: &str) -> bool {
        self.input(node_id, name).is_some()
    }

    /// Set a named input on a node.
    ///
    /// Returns `false` (and changes nothing) when the node does not exist or
    /// has no `inputs` object.
    pub fn set_input(&mut self, node_id: &str, name: &str, value: impl Into<Value>) -> bool {
        match self
            .nodes
            .get_mut(node_id)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
        {
            Some(inputs) => {
                inputs.insert(name.to_string(), value.into());
                true
            }
            None => false,
        }
    }

    /// The document as a JSON value, ready for submission.
    pub fn to_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Candidate locations for a configured template path: as given, relative
/// to `base_dir`, then the built-in default relative to `base_dir`.
pub fn candidate_paths(configured: &str, base_dir: &Path, default_relative: &str) -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(configured), base_dir.join(configured)];
    let fallback = base_dir.join(default_relative);
    if !candidates.contains(&fallback) {
        candidates.push(fallback);
    }
    candidates
}

/// All templates the process knows about, loaded at startup.
///
/// Build it with [`insert`](Self::insert) / [`load`](Self::load), then share
/// it behind an `Arc`; lookups hand out `Arc<JobTemplate>` handles.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: HashMap<TemplateKind, Arc<JobTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: TemplateKind, template: JobTemplate) {
        self.templates.insert(kind, Arc::new(template));
    }

    /// Load `kind` from the first existing candidate path.
    pub fn load(&mut self, kind: TemplateKind, candidates: &[PathBuf]) -> Result<(), CoreError> {
        let template = JobTemplate::from_candidates(candidates)?;
        self.insert(kind, template);
        Ok(())
    }

    pub fn get(&self, kind: TemplateKind) -> Result<Arc<JobTemplate>, CoreError> {
        self.templates
            .get(&kind)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("{} workflow template", kind.label())))
    }

    pub fn contains(&self, kind: TemplateKind) -> bool {
        self.templates.contains_key(&kind)
    }
}
