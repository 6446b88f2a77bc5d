//! Media data model shared by the resolver, the watcher and persistence.
//!
//! A [`MediaDescriptor`] points at a file inside the engine's own output
//! namespace and must be downloaded before use. A [`MediaRecord`] describes
//! a file that has already been persisted under the local output root.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Engine namespace for generated files.
pub const TYPE_OUTPUT: &str = "output";

/// Engine namespace for uploaded source files.
pub const TYPE_INPUT: &str = "input";

/// Namespace tag carried by locally persisted records.
pub const TYPE_LOCAL: &str = "local";

// ---------------------------------------------------------------------------
// Media kind
// ---------------------------------------------------------------------------

/// The kind of media a caller is waiting for.
///
/// Doubles as the output-block key the resolver looks up first and as the
/// category segment of persisted filenames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Images,
    Videos,
    /// Any other output key reported by a custom node.
    Other(String),
}

impl MediaKind {
    /// Parse from the output-block key, e.g. `"images"`.
    pub fn from_key(key: &str) -> Self {
        match key {
            "images" => Self::Images,
            "videos" => Self::Videos,
            other => Self::Other(other.to_string()),
        }
    }

    /// Output-block key requested first.
    pub fn as_key(&self) -> &str {
        match self {
            Self::Images => "images",
            Self::Videos => "videos",
            Self::Other(key) => key,
        }
    }

    /// Ordered list of output keys to search: the requested key first,
    /// then the spellings other engine versions use for the same thing.
    pub fn lookup_keys(&self) -> Vec<&str> {
        let mut keys = vec![self.as_key()];
        match self {
            Self::Images => keys.extend(["image", "files"]),
            Self::Videos => keys.extend(["video", "files", "images"]),
            Self::Other(_) => keys.extend(["videos", "images", "files"]),
        }
        keys
    }

    /// Singular noun used in user-facing messages.
    pub fn singular(&self) -> &str {
        match self {
            Self::Images => "image",
            Self::Videos => "video",
            Self::Other(key) => key.strip_suffix('s').unwrap_or(key),
        }
    }

    /// Extension used when nothing better is known (with leading dot).
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Videos => ".mp4",
            _ => ".png",
        }
    }

    /// Mime type recorded when the engine sent no `Content-Type`.
    pub fn default_mime(&self) -> &'static str {
        match self {
            Self::Videos => "video/mp4",
            _ => "image/png",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_key())
    }
}

// ---------------------------------------------------------------------------
// Remote descriptor
// ---------------------------------------------------------------------------

/// A file inside the engine's namespace, as reported by its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Engine namespace (`output`, `input`, `temp`).
    #[serde(rename = "type", default = "default_type")]
    pub media_type: String,
    /// Container format hint (e.g. `mp4`) reported by video nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

fn default_type() -> String {
    TYPE_OUTPUT.to_string()
}

impl MediaDescriptor {
    /// Descriptor for a file in the engine's `output` namespace root.
    pub fn output(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: String::new(),
            media_type: default_type(),
            format: None,
        }
    }

    /// Normalize one raw history item.
    ///
    /// Objects keep `filename`, `subfolder` and `type` (with defaults) plus a
    /// `format`/`extension` hint; bare strings become a filename in the
    /// output namespace. Anything else yields `None`.
    pub fn from_raw(item: &serde_json::Value) -> Option<Self> {
        match item {
            serde_json::Value::Object(obj) => {
                let text = |key: &str| obj.get(key).and_then(|v| v.as_str());
                let media_type = text("type")
                    .filter(|t| !t.is_empty())
                    .unwrap_or(TYPE_OUTPUT);
                let format = text("format")
                    .or_else(|| text("extension"))
                    .filter(|f| !f.is_empty())
                    .map(str::to_string);
                Some(Self {
                    filename: text("filename").unwrap_or_default().to_string(),
                    subfolder: text("subfolder").unwrap_or_default().to_string(),
                    media_type: media_type.to_string(),
                    format,
                })
            }
            serde_json::Value::String(name) => Some(Self::output(name.clone())),
            _ => None,
        }
    }
}

/// Normalize a raw item list. Items with an empty filename are kept; the
/// caller decides whether they are usable.
pub fn normalize_items(items: &[serde_json::Value]) -> Vec<MediaDescriptor> {
    items.iter().filter_map(MediaDescriptor::from_raw).collect()
}

// ---------------------------------------------------------------------------
// Local record
// ---------------------------------------------------------------------------

/// A downloaded artifact living under the local output root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Opaque local filename (no path separators).
    pub filename: String,
    /// Same as `filename`; relative to the output root.
    pub local_path: String,
    /// Always [`TYPE_LOCAL`].
    #[serde(rename = "type")]
    pub media_type: String,
    pub subfolder: String,
    pub mime_type: String,
    /// Bytes written, `None` when the size could not be read back.
    pub size: Option<u64>,
    pub prompt_id: JobId,
    pub original_name: String,
    pub original: MediaDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub created_at: Timestamp,
}
