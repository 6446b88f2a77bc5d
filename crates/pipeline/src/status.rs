//! Per-request job status.
//!
//! Each generation call owns one [`JobContext`]: the caller keeps a
//! receiver to follow progress, the generator publishes transitions. There
//! is no process-wide status registry.

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Building the document and uploading the source image.
    Preparing,
    /// Accepted by the engine, waiting for outputs.
    Waiting { prompt_id: String },
    /// Outputs resolved, downloading.
    Persisting { prompt_id: String, count: usize },
    Completed { prompt_id: String, count: usize },
    Cancelled,
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled | Self::Failed { .. })
    }
}

/// Cancellation and status reporting for a single request.
#[derive(Debug, Clone)]
pub struct JobContext {
    cancel: CancellationToken,
    status: watch::Sender<JobStatus>,
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl JobContext {
    pub fn new(cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(JobStatus::Preparing);
        Self { cancel, status }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn set(&self, status: JobStatus) {
        tracing::debug!(?status, "Job status changed");
        self.status.send_replace(status);
    }
}
