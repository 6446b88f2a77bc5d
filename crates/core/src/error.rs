use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A local media reference tried to escape the output root.
    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("Workflow template not found in any of: {candidates:?}")]
    TemplateNotFound { candidates: Vec<PathBuf> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
