//! Generation recipes: parameter substitution for the bundled workflows.
//!
//! Each recipe knows which node ids of its template carry the prompt,
//! resolution, sampler and source-image inputs, and which nodes produce the
//! final output. Recipes only touch a [`JobDocument`]; they never mutate the
//! master template and never perform I/O.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::media::MediaKind;
use crate::workflow::JobDocument;

// ---------------------------------------------------------------------------
// Node ids: text to image (Illustrious)
// ---------------------------------------------------------------------------

const T2I_POSITIVE_NODES: &[&str] = &["6", "15"];
const T2I_NEGATIVE_NODES: &[&str] = &["7", "16"];
const T2I_LATENT_NODE: &str = "5";
const T2I_SAMPLER_NODES: &[&str] = &["10", "11"];
/// SaveImage node.
pub const T2I_OUTPUT_NODES: &[&str] = &["19"];

/// Marker some prompt templates use to split a fixed preamble from the
/// user prompt.
const PROMPT_START_MARKER: &str = "<Prompt Start>";
const PROMPT_STYLE_PREFIX: &str = "Digital anime illustration";

// ---------------------------------------------------------------------------
// Node ids: image to video (Wan 2.2 i2v)
// ---------------------------------------------------------------------------

const I2V_POSITIVE_NODE: &str = "93";
const I2V_NEGATIVE_NODE: &str = "89";
const I2V_LATENT_NODE: &str = "98";
const I2V_FPS_NODE: &str = "94";
const I2V_IMAGE_NODE: &str = "97";
/// SaveVideo first, CreateVideo as fallback.
pub const I2V_OUTPUT_NODES: &[&str] = &["108", "94"];

// ---------------------------------------------------------------------------
// Node ids: image edit (Qwen 2509)
// ---------------------------------------------------------------------------

const EDIT_IMAGE_NODE: &str = "78";
const EDIT_POSITIVE_NODE: &str = "111";
const EDIT_NEGATIVE_NODE: &str = "110";
const EDIT_LATENT_NODE: &str = "112";
const EDIT_SCALE_NODE: &str = "93";
const EDIT_SAMPLER_NODE: &str = "3";
pub const EDIT_OUTPUT_NODES: &[&str] = &["60"];

/// Lower bound for the edit workflow's megapixel scale.
const MIN_EDIT_MEGAPIXELS: f64 = 0.1;

/// Default sampler steps.
pub const DEFAULT_STEPS: u32 = 20;

// ---------------------------------------------------------------------------
// Output targets
// ---------------------------------------------------------------------------

/// Where a job's result appears in the engine history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// Node ids in priority order.
    pub nodes: Vec<String>,
    pub kind: MediaKind,
}

impl OutputTarget {
    pub fn new(nodes: &[&str], kind: MediaKind) -> Self {
        Self {
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            kind,
        }
    }

    pub fn text_to_image() -> Self {
        Self::new(T2I_OUTPUT_NODES, MediaKind::Images)
    }

    pub fn image_to_video() -> Self {
        Self::new(I2V_OUTPUT_NODES, MediaKind::Videos)
    }

    pub fn image_edit() -> Self {
        Self::new(EDIT_OUTPUT_NODES, MediaKind::Images)
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

fn default_dimension() -> u32 {
    1024
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToImageParams {
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageToVideoParams {
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Number of frames.
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEditParams {
    pub positive_prompt: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Random sampler seed in `0..=u32::MAX`.
pub fn random_seed() -> u64 {
    u64::from(rand::random::<u32>())
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

/// Parameterize the text-to-image workflow. Returns the seed used.
pub fn apply_text_to_image(doc: &mut JobDocument, params: &TextToImageParams) -> Result<u64, CoreError> {
    if params.positive_prompt.trim().is_empty() {
        return Err(CoreError::Validation("Positive prompt is required".into()));
    }

    let base_positive = first_text(doc, T2I_POSITIVE_NODES, "text");
    let positive = match base_positive.as_deref() {
        Some(base) if base.contains(PROMPT_START_MARKER) => {
            let preamble = base.split(PROMPT_START_MARKER).next().unwrap_or_default();
            format!(
                "{preamble}{PROMPT_START_MARKER} {PROMPT_STYLE_PREFIX} {}",
                params.positive_prompt
            )
        }
        Some(base) => format!("{base} {}", params.positive_prompt).trim().to_string(),
        None => params.positive_prompt.clone(),
    };
    for node in T2I_POSITIVE_NODES {
        doc.set_input(node, "text", positive.as_str());
    }

    if let Some(negative) = params.negative_prompt.as_deref().filter(|n| !n.is_empty()) {
        let combined = append_text(first_text(doc, T2I_NEGATIVE_NODES, "text"), negative);
        for node in T2I_NEGATIVE_NODES {
            doc.set_input(node, "text", combined.as_str());
        }
    }

    doc.set_input(T2I_LATENT_NODE, "width", params.width);
    doc.set_input(T2I_LATENT_NODE, "height", params.height);

    let seed = params.seed.unwrap_or_else(random_seed);
    for node in T2I_SAMPLER_NODES {
        if doc.has_input(node, "steps") {
            doc.set_input(node, "steps", params.steps);
        }
        if doc.has_input(node, "noise_seed") {
            doc.set_input(node, "noise_seed", seed);
        }
    }
    Ok(seed)
}

/// Parameterize the image-to-video workflow around an uploaded source image.
pub fn apply_image_to_video(doc: &mut JobDocument, params: &ImageToVideoParams, source_image: &str) {
    doc.set_input(I2V_POSITIVE_NODE, "text", params.positive_prompt.as_str());

    if let Some(negative) = params.negative_prompt.as_deref().filter(|n| !n.is_empty()) {
        let base = doc.input_str(I2V_NEGATIVE_NODE, "text").map(str::to_string);
        doc.set_input(I2V_NEGATIVE_NODE, "text", append_text(base, negative));
    }

    if let Some(length) = params.length {
        doc.set_input(I2V_LATENT_NODE, "length", length);
    }
    if let Some(fps) = params.fps {
        doc.set_input(I2V_FPS_NODE, "fps", fps);
    }
    if let Some(width) = params.width {
        doc.set_input(I2V_LATENT_NODE, "width", width);
    }
    if let Some(height) = params.height {
        doc.set_input(I2V_LATENT_NODE, "height", height);
    }

    doc.set_input(I2V_IMAGE_NODE, "image", source_image);
}

/// Parameterize the image-edit workflow. Returns the seed used.
pub fn apply_image_edit(doc: &mut JobDocument, params: &ImageEditParams, source_image: &str) -> u64 {
    doc.set_input(EDIT_IMAGE_NODE, "image", source_image);
    doc.set_input(EDIT_POSITIVE_NODE, "prompt", params.positive_prompt.as_str());
    doc.set_input(EDIT_NEGATIVE_NODE, "prompt", "");

    if let (Some(width), Some(height)) = (params.width, params.height) {
        doc.set_input(EDIT_LATENT_NODE, "width", width);
        doc.set_input(EDIT_LATENT_NODE, "height", height);
        doc.set_input(EDIT_SCALE_NODE, "megapixels", edit_megapixels(width, height));
    }

    let seed = params.seed.unwrap_or_else(random_seed);
    doc.set_input(EDIT_SAMPLER_NODE, "steps", params.steps);
    doc.set_input(EDIT_SAMPLER_NODE, "seed", seed);
    seed
}

/// `max(w*h / 1e6, 0.1)` rounded to two decimals.
pub fn edit_megapixels(width: u32, height: u32) -> f64 {
    let mp = (f64::from(width) * f64::from(height) / 1_000_000.0).max(MIN_EDIT_MEGAPIXELS);
    (mp * 100.0).round() / 100.0
}

fn first_text(doc: &JobDocument, nodes: &[&str], input: &str) -> Option<String> {
    nodes
        .iter()
        .filter_map(|node| doc.input_str(node, input))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

fn append_text(base: Option<String>, extra: &str) -> String {
    match base {
        Some(base) if !base.is_empty() => format!("{base} {extra}").trim().to_string(),
        _ => extra.to_string(),
    }
}
