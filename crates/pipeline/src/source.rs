//! Source-image references for the video and edit jobs.
//!
//! The browser sends the same object shape for every kind of source: a
//! pasted image carries a `data_url`, a previously persisted result has
//! `type == "local"`, anything else is a file in the engine's namespace.

use serde::{Deserialize, Serialize};

use animegen_core::media::{MediaDescriptor, TYPE_LOCAL, TYPE_OUTPUT};

/// A source image as referenced by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Where the bytes of a [`SourceImage`] come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin<'a> {
    DataUrl {
        data_url: &'a str,
        filename: Option<&'a str>,
        mime_type: Option<&'a str>,
    },
    /// A file under the local output root.
    Local(&'a str),
    /// A file in the engine's own namespace.
    Engine(MediaDescriptor),
}

impl SourceImage {
    /// Reference a file in the engine's `output` namespace.
    pub fn engine(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            media_type: TYPE_OUTPUT.to_string(),
            ..Self::default()
        }
    }

    /// Reference a file previously persisted under the output root.
    pub fn local(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            media_type: TYPE_LOCAL.to_string(),
            ..Self::default()
        }
    }

    /// Reference inline `data:` URL content.
    pub fn data_url(data_url: impl Into<String>) -> Self {
        Self {
            data_url: Some(data_url.into()),
            ..Self::default()
        }
    }

    /// `true` when neither a filename nor inline data is present.
    pub fn is_empty(&self) -> bool {
        self.filename.is_empty() && self.data_url.as_deref().map_or(true, str::is_empty)
    }

    /// Classify the reference. Inline data wins over everything else.
    pub fn origin(&self) -> SourceOrigin<'_> {
        if let Some(data_url) = non_empty(&self.data_url) {
            let filename = Some(self.filename.as_str())
                .filter(|f| !f.is_empty())
                .or_else(|| non_empty(&self.original_name));
            return SourceOrigin::DataUrl {
                data_url,
                filename,
                mime_type: non_empty(&self.mime_type),
            };
        }

        if self.media_type.eq_ignore_ascii_case(TYPE_LOCAL) {
            let name = non_empty(&self.local_path).unwrap_or(self.filename.as_str());
            return SourceOrigin::Local(name);
        }

        let media_type = if self.media_type.is_empty() {
            TYPE_OUTPUT
        } else {
            self.media_type.as_str()
        };
        SourceOrigin::Engine(MediaDescriptor {
            filename: self.filename.clone(),
            subfolder: self.subfolder.clone(),
            media_type: media_type.to_string(),
            format: None,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
