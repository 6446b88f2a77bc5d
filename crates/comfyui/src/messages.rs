//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum and decides which of them
//! mean "this job is done" for a watcher.

use serde::Deserialize;

/// All known ComfyUI WebSocket message types.
///
/// Deserialized via the adjacently-tagged `"type"` field with associated
/// `"data"` content. `prompt_id` is optional everywhere because older
/// ComfyUI builds omit it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(PromptData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node has finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// The whole prompt finished successfully (newer ComfyUI builds).
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptData),

    /// Execution was interrupted by a user or another client.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptData),

    /// Execution failed with an error.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptData {
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None` (null or absent), execution of the prompt has
/// completed and the queue moved on.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Why the event stream considers a job finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal {
    /// One of the watched output nodes reported `executed`.
    NodeExecuted(String),
    /// The engine served the prompt from cache.
    Cached,
    /// `executing` with no node: the queue moved past the prompt.
    QueueDrained,
    Succeeded,
    Interrupted,
    /// The engine reported an error; outputs may still be partially present.
    Failed {
        node_id: Option<String>,
        message: String,
    },
}

impl ComfyUIMessage {
    /// Prompt id the message is tagged with, if any.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Status(_) => None,
            Self::ExecutionStart(d) | Self::ExecutionSuccess(d) | Self::ExecutionInterrupted(d) => {
                d.prompt_id.as_deref()
            }
            Self::ExecutionCached(d) => d.prompt_id.as_deref(),
            Self::Executing(d) => d.prompt_id.as_deref(),
            Self::Progress(d) => d.prompt_id.as_deref(),
            Self::Executed(d) => d.prompt_id.as_deref(),
            Self::ExecutionError(d) => d.prompt_id.as_deref(),
        }
    }

    /// Interpret the message for a watcher waiting on `job_id`.
    ///
    /// Messages explicitly tagged with another prompt never signal. An
    /// `executed` message only signals when its node is one of
    /// `target_nodes`.
    pub fn completion_signal(&self, job_id: &str, target_nodes: &[String]) -> Option<CompletionSignal> {
        if self.prompt_id().is_some_and(|id| id != job_id) {
            return None;
        }
        match self {
            Self::Executed(d) if target_nodes.iter().any(|n| *n == d.node) => {
                Some(CompletionSignal::NodeExecuted(d.node.clone()))
            }
            Self::ExecutionCached(_) => Some(CompletionSignal::Cached),
            Self::Executing(d) if d.node.as_deref().map_or(true, str::is_empty) => {
                Some(CompletionSignal::QueueDrained)
            }
            Self::ExecutionSuccess(_) => Some(CompletionSignal::Succeeded),
            Self::ExecutionInterrupted(_) => Some(CompletionSignal::Interrupted),
            Self::ExecutionError(d) => Some(CompletionSignal::Failed {
                node_id: d.node_id.clone(),
                message: d.exception_message.clone(),
            }),
            _ => None,
        }
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log unknown types and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
